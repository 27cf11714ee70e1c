//! Fixed-window text chunker with overlap.
//!
//! Splits a text into windows of `size` bytes, advancing by
//! `size - overlap` each step so consecutive windows share an overlap
//! region. The final window is truncated to the remaining text. Window
//! edges are snapped back to UTF-8 character boundaries, so `size` is an
//! upper bound, never exceeded and never splitting a character.
//!
//! Three independent profiles use this chunker with different sizes:
//! retrieval slices (small), index builds (medium), and review chunking
//! (large). The sizes live in the application config, not here.
//!
//! # Guarantees
//!
//! - Every character of the input appears in at least one chunk.
//! - Chunks are produced in left-to-right order.
//! - Empty input yields an empty list, not a single empty chunk.
//! - Degenerate parameters self-correct: `overlap >= size` is treated as
//!   no overlap and `size == 0` as 1, so the walk always makes progress.

use crate::models::TextChunk;

/// Split `text` into overlapping windows of at most `size` bytes.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<TextChunk> {
    let size = size.max(1);
    let overlap = if overlap >= size { 0 } else { overlap };

    let n = text.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < n {
        let mut end = floor_char_boundary(text, (start + size).min(n));
        if end <= start {
            // size smaller than the character at `start`; take that one character
            end = ceil_char_boundary(text, start + 1);
        }

        chunks.push(TextChunk {
            content: text[start..end].to_string(),
            start_offset: start,
            end_offset: end,
        });

        if end == n {
            break;
        }

        let mut next = floor_char_boundary(text, end.saturating_sub(overlap));
        if next <= start {
            next = end;
        }
        start = next;
    }

    chunks
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Snap a byte index forward to the nearest valid UTF-8 char boundary.
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk_text("", 100, 10).is_empty());
    }

    #[test]
    fn test_short_input_single_chunk() {
        let chunks = chunk_text("hello", 100, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "hello");
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 5);
    }

    #[test]
    fn test_every_byte_covered() {
        let text = "abcdefghijklmnopqrstuvwxyz".repeat(10);
        let chunks = chunk_text(&text, 17, 5);
        let mut covered = vec![false; text.len()];
        for c in &chunks {
            for flag in &mut covered[c.start_offset..c.end_offset] {
                *flag = true;
            }
        }
        assert!(covered.iter().all(|&b| b), "uncovered byte in input");
    }

    #[test]
    fn test_windows_overlap() {
        let text = "0123456789".repeat(5);
        let chunks = chunk_text(&text, 20, 4);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_offset, pair[0].end_offset - 4);
        }
    }

    #[test]
    fn test_final_window_truncated() {
        let chunks = chunk_text("0123456789", 4, 0);
        assert_eq!(
            chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>(),
            vec!["0123", "4567", "89"]
        );
    }

    #[test]
    fn test_overlap_ge_size_self_corrects() {
        // Must not loop forever; behaves as overlap = 0.
        let chunks = chunk_text("0123456789", 4, 4);
        assert_eq!(chunks.len(), 3);
        let chunks = chunk_text("0123456789", 4, 9);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_zero_size_self_corrects() {
        let chunks = chunk_text("abc", 0, 0);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_deterministic() {
        let text = "שורה ראשונה\nשורה שניה\nשורה שלישית".repeat(20);
        let a = chunk_text(&text, 50, 10);
        let b = chunk_text(&text, 50, 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hebrew_boundaries_respected() {
        // Hebrew letters are 2 bytes; odd sizes land mid-character and
        // must snap without panicking or splitting a letter.
        let text = "אבגדהוזחטיכלמנסעפצקרשת";
        for size in 1..=7 {
            let chunks = chunk_text(text, size, 0);
            assert!(!chunks.is_empty());
            let rebuilt: String = chunks.iter().map(|c| c.content.as_str()).collect();
            assert_eq!(rebuilt, text);
        }
    }

    #[test]
    fn test_no_empty_chunks() {
        let text = "some text that will be chunked";
        let chunks = chunk_text(text, 7, 3);
        assert!(chunks.iter().all(|c| !c.content.is_empty()));
    }

    #[test]
    fn test_order_is_left_to_right() {
        let chunks = chunk_text(&"x".repeat(100), 10, 2);
        for pair in chunks.windows(2) {
            assert!(pair[0].start_offset < pair[1].start_offset);
        }
    }
}
