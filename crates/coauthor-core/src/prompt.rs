//! Prompt construction for every task the workbench supports.
//!
//! The builder concatenates three preamble tiers — enforced rules, the
//! prose master preamble, the persona — followed by the rendered context
//! bundle and a task-specific instruction. The rules preamble and the
//! prose preamble are deliberately separate pieces of text: rules come
//! from user-editable storage and change per project, while the prose
//! preamble is a fixed content-shaping contract for prose projects.
//!
//! Discussion tasks do not use the context bundle at all: their context
//! is the `{prior content, discussion transcript}` pair carried inside
//! the task itself.

use crate::models::{
    ContextBundle, DiscussKind, DiscussTask, DivisionSpec, GenerationRequest, Persona,
    ProjectKind, ReviewKind, Rule, RuleMode, TaskKind,
};

/// Render the enforced-rules preamble. Rules in `warn` or `off` mode are
/// excluded entirely, not de-emphasized. Empty when nothing is enforced.
pub fn rules_preamble(rules: &[Rule]) -> String {
    let enforced: Vec<&str> = rules
        .iter()
        .filter(|r| r.mode == RuleMode::Enforce)
        .map(|r| r.text.as_str())
        .collect();

    if enforced.is_empty() {
        return String::new();
    }

    format!(
        "עליך לציית לכללים הבאים באופן מוחלט ומדויק:\n- {}\n\n",
        enforced.join("\n- ")
    )
}

/// The master preamble for prose projects: literary register, the notes
/// blob as ground truth, and a hard ban on visual-media vocabulary.
pub fn prose_master_preamble() -> &'static str {
    "תפקידך הוא לשמש כעוזר מקצועי לסופר, המתמחה בכתיבת רומני פרוזה. כל המחשבה והפלט שלך חייבים להיות בסגנון ספרותי.\n\
     הטקסט ב'קובץ כללי' מהווה את הבסיס וההקשר של עולם הסיפור. עליך להתייחס למידע הקיים בו כאמת המוחלטת של הסיפור עד כה, וכל תוכן חדש שאתה יוצר חייב להיות עקבי והמשכי לבסיס זה.\n\
     מכיוון שזהו פרויקט פרוזה, חל איסור מוחלט להשתמש בכל מונח של מדיה ויזואלית: 'פריימים', 'פאנלים', 'תסריט למאייר', 'זוויות מצלמה' או דיאלוג בפורמט תסריט.\n\n"
}

/// Persona line for brainstorm/write calls.
pub fn persona_preamble(persona: Persona) -> &'static str {
    match persona {
        Persona::Assistant => {
            "הפרסונה שלך היא 'עוזר ישיר'. תפקידך להיות תמציתי ומדויק.\n\n"
        }
        Persona::Partner => {
            "הפרסונה שלך היא 'שותף יצירתי מקצועי'. חשוב ברמה גבוהה והצע רעיונות מקוריים.\n\n"
        }
    }
}

/// Render the context bundle into one labeled block: files, then notes
/// (or the chapter focus, which replaces them), then chat history.
pub fn render_context(bundle: &ContextBundle) -> String {
    let mut out = String::new();

    if !bundle.file_context.is_empty() {
        out.push_str(&bundle.file_context);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
    }

    if let Some(focus) = &bundle.chapter_focus {
        out.push_str("בהתייחס לפרק המבוקש מתוך 'קובץ כללי':\n---\n");
        out.push_str(focus);
        out.push_str("\n---\n\n");
    } else if !bundle.notes_context.is_empty() {
        out.push_str("להלן קטעים רלוונטיים מתוך 'קובץ כללי' להתייחסותך:\n");
        out.push_str(&bundle.notes_context);
        out.push_str("\n\n");
    }

    if !bundle.history_context.is_empty() {
        out.push_str("היסטוריית שיחה קודמת:\n");
        out.push_str(&bundle.history_context);
        out.push_str("\n\n");
    }

    out
}

/// Build the final prompt for a generation request.
///
/// `rules` is the merged global+project list; only enforce-mode rules are
/// rendered. For `BreakdownChapter`, `chapter_synopsis` must already hold
/// the result of the separate extraction call (see
/// [`chapter_extraction_prompt`]).
pub fn build_prompt(req: &GenerationRequest, rules: &[Rule]) -> String {
    let mut preamble = rules_preamble(rules);

    if req.project_kind == ProjectKind::Prose {
        preamble.push_str(prose_master_preamble());
    }

    if matches!(req.task, TaskKind::Brainstorm | TaskKind::Write(_)) {
        preamble.push_str(persona_preamble(req.persona));
    }

    match &req.task {
        TaskKind::Discuss(task) => discussion_prompt(task),
        TaskKind::DivideSynopsis { spec, synopsis } => {
            division_prompt(spec, synopsis, &preamble, &render_context(&req.context))
        }
        TaskKind::BreakdownChapter {
            chapter_synopsis, ..
        } => breakdown_prompt(
            &preamble,
            &render_context(&req.context),
            chapter_synopsis,
            req,
        ),
        TaskKind::Brainstorm | TaskKind::Write(_) => {
            let context = render_context(&req.context);
            format!(
                "{preamble}{context}בהתבסס על כל ההקשר שסופק, ענה על הבקשה הבאה: {}",
                req.free_text
            )
        }
    }
}

/// Step one of `breakdown_chapter`: pull just the requested chapter's
/// synopsis out of the full synopsis. The result feeds [`build_prompt`].
pub fn chapter_extraction_prompt(chapter_title: &str, full_synopsis: &str) -> String {
    format!(
        "From the following synopsis, extract only the text of the chapter titled '{chapter_title}'. \
         Return only that text, with no preamble.\n\nSYNOPSIS:\n{full_synopsis}"
    )
}

fn breakdown_prompt(
    preamble: &str,
    context: &str,
    chapter_synopsis: &str,
    req: &GenerationRequest,
) -> String {
    match req.project_kind {
        ProjectKind::Comic => {
            let layout = req.comic_layout.unwrap_or_default();
            comic_breakdown_prompt(preamble, context, chapter_synopsis, &layout)
        }
        ProjectKind::Prose => prose_breakdown_prompt(preamble, context, chapter_synopsis),
    }
}

/// Comic script for one chapter: pages and frames, every frame carries text.
pub fn comic_breakdown_prompt(
    preamble: &str,
    context: &str,
    chapter_synopsis: &str,
    layout: &crate::models::ComicLayout,
) -> String {
    format!(
        "{preamble}{context}להלן תקציר של פרק בקומיקס:\n---\n{chapter_synopsis}\n---\n\
         המשימה שלך היא לכתוב את התסריט המפורט עבור הפרק. פרק את התקציר לעמודים ופריימים, \
         לפי מבנה של {} עמודים ו-{} פריימים לעמוד.\n\n\
         **כלל ברזל: בכל פריים חייב להופיע טקסט כלשהו, בין אם הרהור או דיאלוג. אין ליצור פריימים ללא טקסט.**\n\n\
         הקפד על הפורמט: מספר פריים, אחריו הטקסט (הרהור מסומן 'הרהור:'), ובשורה נפרדת תיאור ויזואלי בסוגריים מרובעים.\n\
         החזר אך ורק את התסריט המעוצב, ללא כל משפט פתיחה או סיכום.",
        layout.pages_per_chapter(),
        layout.frames_per_page
    )
}

/// Prose outline for one chapter: scenes with bolded titles.
pub fn prose_breakdown_prompt(preamble: &str, context: &str, chapter_synopsis: &str) -> String {
    format!(
        "{preamble}{context}בהתבסס על תקציר הפרק הבא, כתוב מתווה מפורט של הפרק, מחולק לסצנות הגיוניות.\n\n\
         **הקפד על הפורמט הבא עבור כל סצנה:**\n\
         1. כותרת הסצנה בשורה נפרדת, מודגשת ב-2 כוכביות (לדוגמה: **סצנה 1: הכותרת**).\n\
         2. מתחת לכותרת, תיאור קצר של ההתרחשות המרכזית, התפתחות הדמויות והאווירה.\n\
         3. שורת רווח אחת בין סצנה לסצנה.\n\n\
         החזר רק את טקסט המתווה בפורמט זה, ללא כל הקדמה או סיכום.\n\n\
         **תקציר הפרק:**\n---\n{chapter_synopsis}\n---"
    )
}

/// The synopsis-division instruction. The contract is explicit in the
/// rendered text: the model inserts heading markers only and preserves
/// the original text verbatim — downstream consumers treat the output as
/// structurally-annotated original text, not a new composition.
pub fn division_prompt(
    spec: &DivisionSpec,
    synopsis_text: &str,
    preamble: &str,
    context: &str,
) -> String {
    let goal = match spec {
        DivisionSpec::Comic { num_chapters } => format!(
            "Your task is to act as a literary editor and divide the following synopsis into exactly {num_chapters} chapters."
        ),
        DivisionSpec::Prose {
            min_words,
            max_words,
        } => format!(
            "Your task is to act as a professional literary editor and divide the following prose synopsis into logical chapters. \
             Aim for chapters that, when fully written, would run between {min_words} and {max_words} words; narrative cohesion \
             always outweighs the word-count guideline."
        ),
    };

    format!(
        "{preamble}{context}{goal} You must do this by ONLY inserting chapter headings (e.g., 'פרק 1:') into the original text.\n\n\
         **CRITICAL INSTRUCTIONS TO FOLLOW EXACTLY:**\n\n\
         1. **PRESERVE ALL CONTENT:** You are strictly forbidden from summarizing, editing, rewriting, shortening, or altering \
         the original content in any way. Your final output MUST contain 100% of the original text.\n\
         2. **NARRATIVE LOGIC:** The division must follow narrative logic. A chapter is a dramatic unit, not a measure of length.\n\
         3. **FINAL VERIFICATION:** Before you answer, verify that the last sentence of your output is identical to the last \
         sentence of the original input.\n\
         4. **NO PREAMBLE:** Do not add any conversational text. Your response must begin directly with \"פרק 1\".\n\n\
         **The full text to be divided is below:**\n---\n{synopsis_text}"
    )
}

/// Review prompt for a single chunk. Proofreading is mechanical and runs
/// without the rules preamble, matching the general/proofread split of
/// the review surface.
pub fn review_chunk_prompt(kind: ReviewKind, rules_preamble: &str, text: &str) -> String {
    match kind {
        ReviewKind::General => format!(
            "{rules_preamble}המשימה שלך היא לבצע ביקורת ספרותית מקיפה על הקטע הבא: עלילה, קצב, דמויות, עקביות וסגנון.\n\n{text}"
        ),
        ReviewKind::Proofread => format!(
            "בצע הגהה על הטקסט הבא ותקן שגיאות כתיב, דקדוק ופיסוק:\n\n{text}"
        ),
    }
}

/// Synthesis prompt: unify the ordered partial reports into one document.
/// Parts are presented in their original chunk order.
pub fn synthesis_prompt(kind: ReviewKind, parts: &[String]) -> String {
    let kind_label = match kind {
        ReviewKind::General => "ביקורת כללית",
        ReviewKind::Proofread => "הגהה",
    };

    format!(
        "הדוחות הבאים הם {} ממצאים חלקיים ({kind_label}), שנוצרו מחלקים עוקבים של אותו טקסט, לפי סדרם המקורי. \
         אחד אותם לדוח אחד קוהרנטי ומקיף, תוך שמירה על סדר החלקים ובלי לאבד ממצאים.\n\n{}",
        parts.len(),
        parts.join("\n\n---\n\n")
    )
}

/// Follow-up question against an existing review report.
pub fn review_followup_prompt(input_text: &str, report: &str, question: &str) -> String {
    format!(
        "אתה מנהל דיון על דוח ביקורת שכתבת.\n\nהטקסט המקורי שנבדק:\n---\n{input_text}\n---\n\
         דוח הביקורת שכתבת:\n---\n{report}\n---\n\
         השאלה החדשה של המשתמש: {question}\nענה בקצרה ולעניין."
    )
}

fn discussion_prompt(task: &DiscussTask) -> String {
    let surrounding = task.surrounding.as_deref().unwrap_or("");
    match task.kind {
        DiscussKind::SynopsisUpdate => format!(
            "You are a senior editor helping a writer develop a synopsis. Rewrite and improve the current draft based on \
             the ideas and conclusions of the discussion: integrate the new plot points and character developments, \
             restructuring where needed, into a single cohesive synopsis.\n\
             Return ONLY the new, rewritten synopsis, with no preamble or explanations.\n\n\
             **Current Synopsis Draft:**\n---\n{}\n---\n\n\
             **Discussion Transcript:**\n---\n{}\n---",
            task.prior, task.transcript
        ),
        DiscussKind::DivisionUpdate => format!(
            "You are an expert editor. The synopsis below is already divided into chapters; re-divide it according to the \
             requested changes in the discussion (merge, split, move chapters). You must not alter, summarize, or rewrite \
             the content itself — only move, add, or remove chapter headings (e.g., \"פרק 1:\"). The final word count must \
             be identical to the original.\n\
             Return ONLY the re-divided synopsis; your response must begin directly with \"פרק 1\".\n\n\
             **Original Divided Synopsis:**\n---\n{}\n---\n\n\
             **Discussion Transcript:**\n---\n{}\n---",
            task.prior, task.transcript
        ),
        DiscussKind::ChapterSummary => format!(
            "You are an expert editor. Rewrite the chapter synopsis below according to the conclusions of the discussion, \
             while staying consistent with the full story synopsis. Preserve the original tone; add nothing that the \
             discussion did not decide.\n\
             Return ONLY the rewritten chapter synopsis, with no preamble.\n\n\
             **Full Story Synopsis (for context):**\n---\n{surrounding}\n---\n\n\
             **Original Chapter Synopsis:**\n---\n{}\n---\n\n\
             **Discussion Transcript:**\n---\n{}\n---",
            task.prior, task.transcript
        ),
        DiscussKind::SceneUpdate => format!(
            "You are an expert editor. Rewrite the scene description below according to the conclusions of the discussion, \
             while staying consistent with the overall chapter outline.\n\
             Return ONLY the rewritten scene description, with no preamble.\n\n\
             **Full Chapter Outline (for context):**\n---\n{surrounding}\n---\n\n\
             **Original Scene Description:**\n---\n{}\n---\n\n\
             **Discussion Transcript:**\n---\n{}\n---",
            task.prior, task.transcript
        ),
        DiscussKind::DraftUpdate => format!(
            "You are an expert literary editor. Rewrite the scene draft below according to the conclusions of the \
             discussion, keeping it consistent with the scene's description from the outline. The output is a complete, \
             improved prose draft.\n\
             Return ONLY the rewritten draft, with no preamble.\n\n\
             **Original Scene Description (for context):**\n---\n{surrounding}\n---\n\n\
             **Original Scene Draft:**\n---\n{}\n---\n\n\
             **Discussion Transcript:**\n---\n{}\n---",
            task.prior, task.transcript
        ),
    }
}
