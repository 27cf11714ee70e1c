//! Text extraction for uploaded files.
//!
//! Uploads arrive as raw bytes plus a filename; extraction dispatches on
//! the extension and returns plain UTF-8 text that then gets its own
//! vector index. Supported: `.txt`, `.pdf`, `.docx`.

use anyhow::{bail, Context, Result};
use std::io::Read;

/// Maximum decompressed bytes read from a DOCX XML entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Lowercased extension of a filename, including the dot.
pub fn guess_ext(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!(".{}", ext.to_lowercase()),
        _ => String::new(),
    }
}

/// Extract plain text from an uploaded file's bytes.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String> {
    match guess_ext(filename).as_str() {
        ".txt" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        ".pdf" => pdf_extract::extract_text_from_mem(bytes)
            .with_context(|| format!("PDF extraction failed for {filename}")),
        ".docx" => extract_docx(bytes).with_context(|| format!("DOCX extraction failed for {filename}")),
        other => bail!("Unsupported file type: '{other}' ({filename})"),
    }
}

/// Pull the text runs (`w:t`) out of `word/document.xml`, with a newline
/// at each paragraph end.
fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .context("word/document.xml not found")?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            bail!("word/document.xml exceeds size limit");
        }
    }

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(doc_xml.as_slice());
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_text => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == b"p" {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => bail!("DOCX XML parse error: {e}"),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
