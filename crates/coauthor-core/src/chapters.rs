//! Regex-driven chapter segmentation of synopses and notes.
//!
//! A chapter heading is the keyword `פרק` followed by an identifier of
//! digits or Hebrew letters, then the rest of the heading line (a title,
//! punctuation). Heading detection is free-text regex matching — the same
//! phrase appearing mid-sentence will be treated as a heading. That
//! fragility is inherited by contract; callers that need reliable
//! boundaries should divide the text explicitly first.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ChapterSegment;

/// A full heading line: keyword, identifier, rest of line.
static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)פרק\s+[0-9א-ת]+[^\n]*").expect("valid heading regex"));

/// Just the keyword + identifier, for locating the *next* heading.
static HEADING_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)פרק\s+([0-9א-ת]+)").expect("valid heading-start regex"));

/// An explicit chapter request inside a free-text query,
/// e.g. `תן לי את פרק 2` or `עיין בפרק ה`.
static CHAPTER_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:עיין בפרק|פרק)\s+([0-9א-ת]+)").expect("valid reference regex"));

/// Split a text into chapter segments.
///
/// Each segment's `title` is the raw matched heading line and `content`
/// is the raw span up to the next heading (or end of text), so
/// concatenating `title` + `content` over all segments reproduces the
/// input exactly from the first heading onward. Text before the first
/// heading is not part of any segment.
///
/// Returns an empty list when the text contains no headings — the caller
/// decides whether that means "treat as one chapter" or "ask the user to
/// divide first".
pub fn split_into_chapters(text: &str) -> Vec<ChapterSegment> {
    let matches: Vec<_> = HEADING.find_iter(text).collect();
    let mut segments = Vec::with_capacity(matches.len());

    for (i, m) in matches.iter().enumerate() {
        let content_end = matches.get(i + 1).map(|n| n.start()).unwrap_or(text.len());
        segments.push(ChapterSegment {
            title: m.as_str().to_string(),
            content: text[m.end()..content_end].to_string(),
        });
    }

    segments
}

/// Extract the identifier (`1`, `12`, `ה`, …) from a heading line.
pub fn heading_identifier(title: &str) -> Option<String> {
    HEADING_START
        .captures(title)
        .map(|c| c[1].to_string())
}

/// Return the raw content of the chapter whose identifier matches
/// `identifier` exactly, or `None` when no heading matches.
///
/// The identifier is regex-escaped (metacharacters in it stay literal)
/// and boundary-guarded, so requesting chapter `1` will not land on
/// `פרק 12`. When the same identifier appears more than once — say,
/// referenced in passing and again as the real heading — the *first*
/// occurrence wins. That is a heuristic, not a guarantee of picking the
/// semantically right one.
pub fn extract_chapter(text: &str, identifier: &str) -> Option<String> {
    let pattern = format!(r"(?i)פרק\s+{}\b[^\n]*", regex::escape(identifier));
    let start_re = Regex::new(&pattern).ok()?;

    let heading = start_re.find(text)?;
    let content_start = heading.end();

    let content_end = HEADING_START
        .find_at(text, content_start)
        .map(|m| m.start())
        .unwrap_or(text.len());

    Some(text[content_start..content_end].to_string())
}

/// Detect an explicit chapter reference in a free-text query and return
/// its identifier.
pub fn find_chapter_reference(query: &str) -> Option<String> {
    CHAPTER_REFERENCE
        .captures(query)
        .map(|c| c[1].to_string())
}

/// Strip any conversational preamble a model added before the first
/// heading of a division result. Models are instructed to start at
/// `פרק 1` but do not always comply; the divided text must begin at the
/// first heading for downstream parsing.
pub fn clean_division_output(raw: &str) -> String {
    match HEADING_START.find(raw) {
        Some(m) => raw[m.start()..].to_string(),
        None => raw.trim().to_string(),
    }
}
