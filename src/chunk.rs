//! Overlapping character-window chunker.
//!
//! Splits parsed document text into [`Chunk`]s of at most `chunk_size`
//! characters, each starting `chunk_size - chunk_overlap` characters (or
//! fewer, when a separator cut lands earlier) after its predecessor.
//!
//! Two strategies are available through [`Splitter`]:
//!
//! - **Fixed**: a plain sliding window over the characters.
//! - **Recursive**: paragraphs (blank-line separated) are hard boundaries;
//!   a paragraph longer than `chunk_size` is windowed with each cut pulled
//!   back to the last newline, sentence end, or space inside the window.
//!
//! Sizes are counted in characters, never bytes, so multi-byte text is
//! never cut inside a code point.
//!
//! # Guarantees
//!
//! - Every character of the input is covered by at least one chunk.
//! - Chunks are in source order and hold `1..=chunk_size` characters.
//! - Consecutive chunks share `prev.end - next.start` characters, never more
//!   than `chunk_overlap`.
//!
//! # Example
//!
//! ```rust
//! use docqa::chunk::split_text;
//! use docqa::config::Splitter;
//!
//! let spans = split_text("abcdefghij", 4, 1, Splitter::Fixed).unwrap();
//! let texts: Vec<&str> = spans.iter().map(|s| s.text).collect();
//! assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{ChunkingConfig, Splitter};
use crate::error::{RagError, Result};
use crate::models::Chunk;

/// Separators tried, in order, when pulling a window cut back inside a paragraph.
const CUT_SEPARATORS: [&str; 3] = ["\n", ". ", " "];

/// A borrowed chunk of text with its character offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'a> {
    pub start: usize,
    pub end: usize,
    pub text: &'a str,
}

/// Reject configurations that cannot make progress.
pub fn validate(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 || chunk_overlap >= chunk_size {
        return Err(RagError::InvalidChunkConfig {
            chunk_size,
            chunk_overlap,
        });
    }
    Ok(())
}

/// Split text into ordered, overlapping spans.
pub fn split_text(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    splitter: Splitter,
) -> Result<Vec<Span<'_>>> {
    validate(chunk_size, chunk_overlap)?;

    // offsets[i] is the byte offset of char i; offsets[n] == text.len()
    let mut offsets: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
    offsets.push(text.len());
    let char_count = offsets.len() - 1;

    let mut ranges = Vec::new();
    match splitter {
        Splitter::Fixed => {
            window(text, &offsets, 0, char_count, chunk_size, chunk_overlap, false, &mut ranges)
        }
        Splitter::Recursive => {
            for (seg_start, seg_end) in paragraph_segments(text, &offsets) {
                window(
                    text,
                    &offsets,
                    seg_start,
                    seg_end,
                    chunk_size,
                    chunk_overlap,
                    true,
                    &mut ranges,
                );
            }
        }
    }

    Ok(ranges
        .into_iter()
        .map(|(start, end)| Span {
            start,
            end,
            text: &text[offsets[start]..offsets[end]],
        })
        .collect())
}

/// Split a document's text into [`Chunk`]s with stable ids and content hashes.
pub fn chunk_document(document: &str, text: &str, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    let spans = split_text(text, config.chunk_size, config.chunk_overlap, config.splitter)?;
    Ok(spans
        .into_iter()
        .enumerate()
        .map(|(i, span)| make_chunk(document, i as i64, span))
        .collect())
}

/// Window `[from, to)` (char offsets) and append `(start, end)` ranges.
#[allow(clippy::too_many_arguments)]
fn window(
    text: &str,
    offsets: &[usize],
    from: usize,
    to: usize,
    chunk_size: usize,
    chunk_overlap: usize,
    prefer_separators: bool,
    out: &mut Vec<(usize, usize)>,
) {
    let mut start = from;
    while start < to {
        let hard_end = (start + chunk_size).min(to);
        let end = if hard_end < to && prefer_separators {
            separator_cut(text, offsets, start, hard_end, chunk_overlap).unwrap_or(hard_end)
        } else {
            hard_end
        };
        out.push((start, end));
        if end >= to {
            break;
        }
        // end > start + chunk_overlap always holds, so this advances
        start = end - chunk_overlap;
    }
}

/// Last separator boundary inside the window that still advances past the overlap.
fn separator_cut(
    text: &str,
    offsets: &[usize],
    start: usize,
    hard_end: usize,
    chunk_overlap: usize,
) -> Option<usize> {
    let slice = &text[offsets[start]..offsets[hard_end]];
    for sep in CUT_SEPARATORS {
        if let Some(pos) = slice.rfind(sep) {
            let cut_byte = offsets[start] + pos + sep.len();
            let cut = char_index_of(offsets, cut_byte);
            if cut > start + chunk_overlap {
                return Some(cut);
            }
        }
    }
    None
}

fn char_index_of(offsets: &[usize], byte: usize) -> usize {
    offsets.partition_point(|&b| b < byte)
}

/// Cut text at blank lines. The newline run stays with the preceding segment.
fn paragraph_segments(text: &str, offsets: &[usize]) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut seg_start_byte = 0;
    let mut search_from = 0;

    while let Some(pos) = text[search_from..].find("\n\n") {
        let mut end_byte = search_from + pos + 2;
        while end_byte < bytes.len() && bytes[end_byte] == b'\n' {
            end_byte += 1;
        }
        segments.push((seg_start_byte, end_byte));
        seg_start_byte = end_byte;
        search_from = end_byte;
    }
    if seg_start_byte < text.len() {
        segments.push((seg_start_byte, text.len()));
    }

    segments
        .into_iter()
        .map(|(s, e)| (char_index_of(offsets, s), char_index_of(offsets, e)))
        .collect()
}

fn make_chunk(document: &str, index: i64, span: Span<'_>) -> Chunk {
    Chunk {
        id: chunk_id(document, index),
        document: document.to_string(),
        chunk_index: index,
        start: span.start,
        end: span.end,
        text: span.text.to_string(),
        hash: hash_text(span.text),
    }
}

/// Name-based UUID so a rebuild from the same documents yields the same ids.
pub fn chunk_id(document: &str, index: i64) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", document, index).as_bytes(),
    )
    .to_string()
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts<'a>(spans: &[Span<'a>]) -> Vec<&'a str> {
        spans.iter().map(|s| s.text).collect()
    }

    /// Drop each span's overlap with its predecessor and concatenate.
    fn reconstruct(spans: &[Span<'_>]) -> String {
        let mut out = String::new();
        let mut covered: usize = 0;
        for s in spans {
            let skip = covered.saturating_sub(s.start);
            out.extend(s.text.chars().skip(skip));
            covered = covered.max(s.end);
        }
        out
    }

    fn assert_invariants(text: &str, spans: &[Span<'_>], size: usize, overlap: usize) {
        assert_eq!(reconstruct(spans), text);
        for s in spans {
            let n = s.text.chars().count();
            assert!(n >= 1 && n <= size, "span {:?} has {} chars", s.text, n);
            assert_eq!(n, s.end - s.start);
        }
        for pair in spans.windows(2) {
            assert!(pair[1].start > pair[0].start, "no forward progress");
            assert!(pair[1].start <= pair[0].end, "gap between spans");
            assert!(pair[0].end - pair[1].start <= overlap);
        }
        if let (Some(first), Some(last)) = (spans.first(), spans.last()) {
            assert_eq!(first.start, 0);
            assert_eq!(last.end, text.chars().count());
        }
    }

    #[test]
    fn fixed_windows_step_by_size_minus_overlap() {
        let spans = split_text("abcdefghij", 4, 1, Splitter::Fixed).unwrap();
        assert_eq!(texts(&spans), vec!["abcd", "defg", "ghij"]);
        assert_invariants("abcdefghij", &spans, 4, 1);
    }

    #[test]
    fn trailing_short_chunk_is_kept() {
        let spans = split_text("abcdefgh", 5, 2, Splitter::Fixed).unwrap();
        assert_eq!(texts(&spans), vec!["abcde", "defgh"]);

        let spans = split_text("abcdefghi", 5, 2, Splitter::Fixed).unwrap();
        assert_eq!(texts(&spans), vec!["abcde", "defgh", "ghi"]);
    }

    #[test]
    fn text_shorter_than_size_is_one_chunk() {
        let spans = split_text("short", 100, 10, Splitter::Fixed).unwrap();
        assert_eq!(texts(&spans), vec!["short"]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_text("", 10, 2, Splitter::Recursive).unwrap().is_empty());
    }

    #[test]
    fn overlap_equal_or_larger_than_size_fails_fast() {
        for (size, overlap) in [(10, 10), (10, 11), (0, 0)] {
            let err = split_text("abc", size, overlap, Splitter::Fixed).unwrap_err();
            assert!(matches!(err, RagError::InvalidChunkConfig { .. }));
        }
    }

    #[test]
    fn three_paragraphs_become_three_chunks() {
        let text = "A.\n\nB.\n\nC.";
        let spans = split_text(text, 10, 2, Splitter::Recursive).unwrap();
        assert!(spans.len() >= 3);
        assert_eq!(texts(&spans), vec!["A.\n\n", "B.\n\n", "C."]);
        assert_invariants(text, &spans, 10, 2);
    }

    #[test]
    fn long_paragraph_prefers_word_boundaries() {
        let text = "alpha beta gamma delta epsilon";
        let spans = split_text(text, 12, 3, Splitter::Recursive).unwrap();
        assert_invariants(text, &spans, 12, 3);
        assert_eq!(spans[0].text, "alpha beta ");
    }

    #[test]
    fn unbroken_run_falls_back_to_hard_cut() {
        let text = "x".repeat(25);
        let spans = split_text(&text, 10, 2, Splitter::Recursive).unwrap();
        assert_eq!(spans[0].text.len(), 10);
        assert_invariants(&text, &spans, 10, 2);
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let text = "héllo wörld ünïcødé ☃☃☃ naïve café";
        for splitter in [Splitter::Fixed, Splitter::Recursive] {
            let spans = split_text(text, 7, 2, splitter).unwrap();
            assert_invariants(text, &spans, 7, 2);
        }
    }

    #[test]
    fn reconstruction_holds_across_configs() {
        let text = "The first paragraph talks about parsing.\nIt has two lines.\n\n\n\
                    Second paragraph. It discusses chunking in detail, with several sentences. \
                    And a third one here.\n\nThird.";
        for splitter in [Splitter::Fixed, Splitter::Recursive] {
            for (size, overlap) in [(5, 0), (10, 2), (16, 15), (40, 8), (500, 50)] {
                let spans = split_text(text, size, overlap, splitter).unwrap();
                assert_invariants(text, &spans, size, overlap);
            }
        }
    }

    #[test]
    fn chunk_document_assigns_contiguous_indices_and_stable_ids() {
        let cfg = ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 2,
            splitter: Splitter::Recursive,
        };
        let a = chunk_document("notes.txt", "A.\n\nB.\n\nC.", &cfg).unwrap();
        let b = chunk_document("notes.txt", "A.\n\nB.\n\nC.", &cfg).unwrap();
        for (i, c) in a.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.hash, hash_text(&c.text));
        }
        assert_eq!(a, b);
        assert_ne!(a[0].id, a[1].id);
    }
}
