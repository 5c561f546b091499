//! Markdown chunking for embedding.
//!
//! Splits a file into size-bounded, line-overlapped chunks. Sizes are
//! counted in Unicode scalar values, with one extra character per line for
//! the reconstructed newline; slicing never splits a code point. Chunking is
//! deterministic for fixed settings and content.

use super::hash_text;
use crate::config::ChunkingSettings;

/// A size-bounded fragment of a Markdown file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    /// 1-based inclusive source-line range.
    pub line_start: usize,
    pub line_end: usize,
    /// SHA-256 of `content`.
    pub hash: String,
}

/// Effective character budgets derived from the settings.
fn budgets(settings: &ChunkingSettings) -> (usize, usize) {
    let max_chars = settings
        .min_chars
        .max(settings.tokens * settings.chars_per_token);
    let overlap_chars = settings.overlap * settings.chars_per_token;
    (max_chars, overlap_chars)
}

/// Slice a line into segments of at most `max_chars` characters, preserving
/// order. An empty line yields one empty segment (it still advances the
/// position and can act as a natural break).
fn segment_line(line: &str, max_chars: usize) -> Vec<String> {
    if line.is_empty() {
        return vec![String::new()];
    }
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for ch in line.chars() {
        if count == max_chars {
            segments.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Split `content` into ordered chunks under the given settings.
///
/// Empty files yield zero chunks. Whitespace-only chunks are kept — the
/// sync engine drops them, not the chunker.
pub fn chunk_markdown(content: &str, settings: &ChunkingSettings) -> Vec<Chunk> {
    if content.is_empty() {
        return Vec::new();
    }

    let (max_chars, overlap_chars) = budgets(settings);
    let mut chunks: Vec<Chunk> = Vec::new();
    // (segment text, source line number)
    let mut current: Vec<(String, usize)> = Vec::new();
    let mut current_chars = 0usize;

    fn flush(current: &[(String, usize)], chunks: &mut Vec<Chunk>) {
        if current.is_empty() {
            return;
        }
        let text = current
            .iter()
            .map(|(segment, _)| segment.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        chunks.push(Chunk {
            line_start: current[0].1,
            line_end: current[current.len() - 1].1,
            hash: hash_text(&text),
            content: text,
        });
    }

    // Keep the tail entries whose cumulative size first reaches the overlap
    // budget; they become the prefix of the next chunk.
    fn carry_overlap(
        current: &mut Vec<(String, usize)>,
        current_chars: &mut usize,
        overlap_chars: usize,
    ) {
        if overlap_chars == 0 {
            current.clear();
            *current_chars = 0;
            return;
        }
        let mut acc = 0usize;
        let mut keep_from = current.len();
        while keep_from > 0 {
            keep_from -= 1;
            acc += current[keep_from].0.chars().count() + 1;
            if acc >= overlap_chars {
                break;
            }
        }
        current.drain(..keep_from);
        *current_chars = current
            .iter()
            .map(|(segment, _)| segment.chars().count() + 1)
            .sum();
    }

    for (idx, line) in content.split('\n').enumerate() {
        let line_no = idx + 1;
        for segment in segment_line(line, max_chars) {
            let segment_size = segment.chars().count() + 1;
            if current_chars + segment_size > max_chars && !current.is_empty() {
                flush(&current, &mut chunks);
                carry_overlap(&mut current, &mut current_chars, overlap_chars);
            }
            current.push((segment, line_no));
            current_chars += segment_size;
        }
    }
    flush(&current, &mut chunks);

    chunks
}
