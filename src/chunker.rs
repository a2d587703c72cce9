//! Paragraph/sentence-aware text chunking.
//!
//! A pure function of (text, options): identical input always yields an
//! identical chunk set, which is what makes re-processing reproducible.
//! Paragraphs are greedily accumulated up to the size budget; each new chunk
//! is seeded with an overlap tail from the end of the previous one, cut at a
//! sentence boundary when one falls inside the window, else a word boundary,
//! else a hard character cut.

use serde::{Deserialize, Serialize};

use crate::config::ChunkingConfig;

/// Chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOptions {
    /// Character budget per chunk.
    pub chunk_size_chars: usize,
    /// Overlap tail length seeded into each subsequent chunk.
    pub overlap_chars: usize,
    /// Chunks shorter than this are dropped, except the first/only chunk.
    pub min_chunk_chars: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size_chars: 4000,
            overlap_chars: 800,
            min_chunk_chars: 200,
        }
    }
}

impl ChunkOptions {
    /// Clamp to values windowing can make progress with: the overlap must
    /// stay strictly below the chunk size.
    fn normalized(&self) -> ChunkOptions {
        let chunk_size_chars = self.chunk_size_chars.max(1);
        ChunkOptions {
            chunk_size_chars,
            overlap_chars: self.overlap_chars.min(chunk_size_chars - 1),
            min_chunk_chars: self.min_chunk_chars,
        }
    }
}

impl From<&ChunkingConfig> for ChunkOptions {
    fn from(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size_chars: config.chunk_size_chars,
            overlap_chars: config.overlap_chars,
            min_chunk_chars: config.min_chunk_chars,
        }
    }
}

/// One chunk of a document, densely indexed in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    /// Zero-based, gap-free index.
    pub index: u32,
    pub text: String,
    /// Rough token count (chars / 4).
    pub token_estimate: u32,
}

/// Estimate tokens from character length.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as u32).div_ceil(4)
}

/// Split text into overlapping chunks. See module docs for the policy.
pub fn chunk(text: &str, options: &ChunkOptions) -> Vec<ChunkPiece> {
    let options = &options.normalized();
    let normalized = text.replace("\r\n", "\n");
    let paragraphs: Vec<&str> = normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    if paragraphs.is_empty() {
        return Vec::new();
    }

    let mut assembled: Vec<String> = Vec::new();
    let mut buffer = String::new();

    for paragraph in paragraphs {
        let joined_len = if buffer.is_empty() {
            paragraph.len()
        } else {
            buffer.len() + 2 + paragraph.len()
        };

        if !buffer.is_empty() && joined_len > options.chunk_size_chars {
            let tail = overlap_tail(&buffer, options.overlap_chars);
            close_chunk(&mut assembled, buffer, options);
            buffer = tail;
        }

        if !buffer.is_empty() {
            buffer.push_str("\n\n");
        }
        buffer.push_str(paragraph);
    }

    if !buffer.is_empty() {
        close_chunk(&mut assembled, buffer, options);
    }

    // A paragraph larger than the budget can leave oversized chunks; re-split
    // those by sentence with the same overlap policy.
    let mut flattened: Vec<String> = Vec::new();
    for piece in assembled {
        if piece.len() > options.chunk_size_chars {
            flattened.extend(split_by_sentences(&piece, options));
        } else {
            flattened.push(piece);
        }
    }

    // Dense re-index after all splitting
    flattened
        .into_iter()
        .enumerate()
        .map(|(i, text)| ChunkPiece {
            index: i as u32,
            token_estimate: estimate_tokens(&text),
            text,
        })
        .collect()
}

/// Close the running buffer into the chunk list, applying the minimum-size
/// drop rule. The very first chunk is always kept so short documents are
/// never empty-chunked.
fn close_chunk(assembled: &mut Vec<String>, buffer: String, options: &ChunkOptions) {
    if buffer.len() < options.min_chunk_chars && !assembled.is_empty() {
        return;
    }
    assembled.push(buffer);
}

/// Take the overlap tail from the end of a closed chunk.
///
/// The cut lands on a sentence boundary when one exists within roughly 1.5x
/// the overlap window, else a word boundary, else a hard character cut.
fn overlap_tail(text: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 {
        return String::new();
    }
    if text.len() <= overlap_chars {
        return text.to_string();
    }

    let max_window = overlap_chars + overlap_chars / 2;
    let window_start = floor_char_boundary(text, text.len().saturating_sub(max_window));
    let ideal_cut = floor_char_boundary(text, text.len() - overlap_chars);

    if let Some(cut) = sentence_cut(text, window_start, ideal_cut) {
        return text[cut..].trim_start().to_string();
    }
    if let Some(cut) = word_cut(text, window_start, ideal_cut) {
        return text[cut..].trim_start().to_string();
    }
    text[ideal_cut..].to_string()
}

/// Find the sentence boundary closest to the ideal cut within the window.
/// A boundary is the position after a terminator ('.', '!', '?') followed by
/// whitespace.
fn sentence_cut(text: &str, window_start: usize, ideal_cut: usize) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (offset, c) in text[window_start..].char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let after = window_start + offset + c.len_utf8();
            if after < text.len() && text[after..].starts_with(char::is_whitespace) {
                let candidate = after;
                best = match best {
                    Some(current) if current.abs_diff(ideal_cut) <= candidate.abs_diff(ideal_cut) => {
                        Some(current)
                    }
                    _ => Some(candidate),
                };
            }
        }
    }
    best
}

/// Find the whitespace boundary closest to the ideal cut within the window.
fn word_cut(text: &str, window_start: usize, ideal_cut: usize) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (offset, c) in text[window_start..].char_indices() {
        if c.is_whitespace() {
            let candidate = window_start + offset + c.len_utf8();
            if candidate >= text.len() {
                continue;
            }
            best = match best {
                Some(current) if current.abs_diff(ideal_cut) <= candidate.abs_diff(ideal_cut) => {
                    Some(current)
                }
                _ => Some(candidate),
            };
        }
    }
    best
}

/// Largest char boundary at or below `index`.
fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Greedily pack sentences into budget-sized chunks with overlap seeding.
fn split_by_sentences(text: &str, options: &ChunkOptions) -> Vec<String> {
    let sentences = split_sentences(text);
    let mut out: Vec<String> = Vec::new();
    let mut buffer = String::new();
    // True while the buffer holds nothing but a seeded overlap tail
    let mut seeded_only = false;

    for sentence in sentences {
        if sentence.len() > options.chunk_size_chars {
            // A single runaway sentence: flush, then hard-window it
            if !buffer.is_empty() && !seeded_only {
                out.push(std::mem::take(&mut buffer));
            }
            out.extend(hard_windows(&sentence, options));
            if let Some(last) = out.last() {
                buffer = overlap_tail(last, options.overlap_chars);
                seeded_only = true;
            }
            continue;
        }

        let joined_len = if buffer.is_empty() {
            sentence.len()
        } else {
            buffer.len() + 1 + sentence.len()
        };
        if !buffer.is_empty() && joined_len > options.chunk_size_chars {
            let tail = overlap_tail(&buffer, options.overlap_chars);
            out.push(std::mem::take(&mut buffer));
            buffer = tail;
        }
        if !buffer.is_empty() {
            buffer.push(' ');
        }
        buffer.push_str(&sentence);
        seeded_only = false;
    }

    if !buffer.is_empty() && !seeded_only {
        // Overlap-only remainders below the minimum are dropped
        if buffer.len() >= options.min_chunk_chars || out.is_empty() {
            out.push(buffer);
        }
    }

    out
}

/// Split text into sentences, keeping terminators attached.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + c.len_utf8();
            let at_boundary = match chars.peek() {
                Some((_, next)) => next.is_whitespace(),
                None => true,
            };
            if at_boundary {
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = end;
            }
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Fixed-size character windows with overlap, for text with no usable
/// boundaries at all.
fn hard_windows(text: &str, options: &ChunkOptions) -> Vec<String> {
    let step = options
        .chunk_size_chars
        .saturating_sub(options.overlap_chars)
        .max(1);
    let mut out = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let end = floor_char_boundary(text, (start + options.chunk_size_chars).min(text.len()));
        out.push(text[start..end].to_string());
        if end >= text.len() {
            break;
        }
        // A multibyte character can floor the step back to where it started;
        // force the window forward to the next boundary
        let mut next = floor_char_boundary(text, start + step);
        if next <= start {
            next = start + 1;
            while next < text.len() && !text.is_char_boundary(next) {
                next += 1;
            }
        }
        start = next;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(size: usize, overlap: usize, min: usize) -> ChunkOptions {
        ChunkOptions {
            chunk_size_chars: size,
            overlap_chars: overlap,
            min_chunk_chars: min,
        }
    }

    /// A paragraph of full sentences, `len` chars long.
    fn paragraph(len: usize, seed: char) -> String {
        let sentence = format!("The lecture covers topic {seed} in considerable detail today. ");
        let mut out = String::new();
        while out.len() + sentence.len() <= len {
            out.push_str(&sentence);
        }
        let mut trimmed = out.trim_end().to_string();
        while trimmed.len() < len {
            trimmed.insert(trimmed.len() - 1, 'x');
        }
        trimmed
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = format!(
            "{}\n\n{}\n\n{}",
            paragraph(3000, 'a'),
            paragraph(2500, 'b'),
            paragraph(1800, 'c')
        );
        let options = ChunkOptions::default();
        let first = chunk(&text, &options);
        let second = chunk(&text, &options);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn indices_are_dense() {
        let text = (0..20)
            .map(|i| paragraph(900, char::from(b'a' + i)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let pieces = chunk(&text, &opts(2000, 400, 100));
        for (i, piece) in pieces.iter().enumerate() {
            assert_eq!(piece.index, i as u32);
        }
    }

    #[test]
    fn empty_and_whitespace_input_yields_no_chunks() {
        assert!(chunk("", &ChunkOptions::default()).is_empty());
        assert!(chunk("  \n\n  \n\n ", &ChunkOptions::default()).is_empty());
    }

    #[test]
    fn short_document_is_single_chunk() {
        let pieces = chunk("One tiny paragraph.", &ChunkOptions::default());
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].index, 0);
        assert_eq!(pieces[0].text, "One tiny paragraph.");
    }

    #[test]
    fn first_chunk_kept_below_minimum() {
        // Shorter than min_chunk_chars, but the only chunk is always kept
        let pieces = chunk("Tiny.", &opts(4000, 800, 200));
        assert_eq!(pieces.len(), 1);
    }

    #[test]
    fn overlap_is_suffix_of_previous_chunk() {
        let text = (0..6)
            .map(|i| paragraph(3000, char::from(b'a' + i)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let options = opts(4000, 800, 200);
        let pieces = chunk(&text, &options);
        assert!(pieces.len() >= 2);

        for pair in pieces.windows(2) {
            let prev = &pair[0].text;
            let next = &pair[1].text;
            // The opening of each non-first chunk (up to the paragraph
            // separator) is a suffix of the previous chunk's closing text.
            let opening = next.split("\n\n").next().unwrap();
            assert!(
                prev.ends_with(opening),
                "chunk {} does not open with a suffix of chunk {}",
                pair[1].index,
                pair[0].index
            );
        }
    }

    #[test]
    fn scenario_a_three_paragraphs_three_chunks() {
        // 3 paragraphs of ~3000 chars each (~9000 total), size 4000/overlap 800
        let p1 = paragraph(3000, 'a');
        let p2 = paragraph(3000, 'b');
        let p3 = paragraph(3000, 'c');
        let text = format!("{p1}\n\n{p2}\n\n{p3}");
        let pieces = chunk(&text, &opts(4000, 800, 200));

        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].text, p1);

        // Stripping each chunk's seeded overlap reconstructs the original
        let tail1 = pieces[1].text.split("\n\n").next().unwrap();
        let body2 = pieces[1].text.strip_prefix(&format!("{tail1}\n\n")).unwrap();
        assert_eq!(body2, p2);

        let tail2 = pieces[2].text.split("\n\n").next().unwrap();
        let body3 = pieces[2].text.strip_prefix(&format!("{tail2}\n\n")).unwrap();
        assert_eq!(body3, p3);

        let reconstructed = format!("{}\n\n{body2}\n\n{body3}", pieces[0].text);
        assert_eq!(reconstructed, text);
    }

    #[test]
    fn oversized_paragraph_is_resplit_by_sentence() {
        let giant = paragraph(10_000, 'z');
        let pieces = chunk(&giant, &opts(4000, 800, 200));
        assert!(pieces.len() >= 3);
        for piece in &pieces {
            assert!(piece.text.len() <= 4000, "chunk exceeds budget");
        }
    }

    #[test]
    fn boundary_free_text_is_hard_windowed() {
        let blob = "x".repeat(9000);
        let pieces = chunk(&blob, &opts(4000, 800, 200));
        assert!(pieces.len() >= 3);
        assert!(pieces.iter().all(|p| p.text.len() <= 4000));
    }

    #[test]
    fn overlap_at_or_above_chunk_size_is_clamped() {
        // Misconfigured overlap >= size would otherwise leave a zero step
        let pieces = chunk(&"x".repeat(50), &opts(10, 99, 0));
        assert!(!pieces.is_empty());
        assert!(pieces.iter().all(|p| p.text.len() <= 10));

        // Multibyte text cannot stall the window even at step 1
        let pieces = chunk(&"é".repeat(300), &opts(5, 9, 0));
        assert!(!pieces.is_empty());
        assert!(pieces.iter().all(|p| p.text.len() <= 5));
    }

    #[test]
    fn overlap_tail_prefers_sentence_boundary() {
        let text = format!("{} Closing sentence about enzymes here.", paragraph(2000, 'q'));
        let tail = overlap_tail(&text, 800);
        // Cut lands after a terminator, so the tail starts on a fresh sentence
        assert!(tail.starts_with(|c: char| c.is_uppercase()), "tail: {tail:?}");
        assert!(text.ends_with(tail.as_str()));
        assert!(tail.len() <= 800 + 400);
    }

    #[test]
    fn token_estimate_is_quarter_chars() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
