//! Chunk selection for quiz generation.
//!
//! Two strategies combine: stride sampling spreads picks across the whole
//! document, and similarity ranking against a generic study query surfaces
//! the most salient passages. Similarity-only clusters around one topic;
//! diversity-only can miss the key material. The union balances both, and
//! the final set is re-sorted into document order for the prompt.

use std::collections::HashSet;

use crate::models::Chunk;

/// Fixed query embedded once per generation run to rank chunks by salience.
pub const QUERY_TEXT: &str =
    "educational content, key concepts, definitions, and important facts";

/// Cosine similarity between two vectors.
///
/// Mismatched dimensions or a zero vector yield 0.0 rather than NaN, so
/// ranking stays total.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Select chunks for generating `question_count` questions.
///
/// The cap is `chunks_per_question * question_count`. Similarity picks are
/// seated first (up to half the cap), then diversity picks fill the rest;
/// the result is deduplicated by chunk id and sorted by `chunk_index`.
pub fn select_chunks(
    chunks: &[Chunk],
    query_embedding: &[f32],
    question_count: usize,
    chunks_per_question: usize,
) -> Vec<Chunk> {
    let cap = (question_count * chunks_per_question).max(1);

    let mut by_index: Vec<&Chunk> = chunks.iter().collect();
    by_index.sort_by_key(|c| c.chunk_index);

    if by_index.len() <= cap {
        return by_index.into_iter().cloned().collect();
    }

    let similar = top_k_by_similarity(&by_index, query_embedding, cap.div_ceil(2));
    let diverse = stride_sample(&by_index, cap);

    let mut seen: HashSet<&str> = HashSet::new();
    let mut selected: Vec<&Chunk> = Vec::with_capacity(cap);
    for chunk in similar.into_iter().chain(diverse) {
        if selected.len() == cap {
            break;
        }
        if seen.insert(chunk.id.as_str()) {
            selected.push(chunk);
        }
    }

    selected.sort_by_key(|c| c.chunk_index);
    selected.into_iter().cloned().collect()
}

/// Stride-sample down to `target` chunks spread evenly across the document.
fn stride_sample<'a>(ordered: &[&'a Chunk], target: usize) -> Vec<&'a Chunk> {
    if ordered.len() <= target {
        return ordered.to_vec();
    }
    let stride = ordered.len() as f64 / target as f64;
    let mut picks = Vec::with_capacity(target);
    let mut last = usize::MAX;
    for i in 0..target {
        let idx = ((i as f64 * stride) as usize).min(ordered.len() - 1);
        if idx != last {
            picks.push(ordered[idx]);
            last = idx;
        }
    }
    picks
}

/// Rank all chunks by similarity to the query embedding, best first.
fn top_k_by_similarity<'a>(chunks: &[&'a Chunk], query: &[f32], k: usize) -> Vec<&'a Chunk> {
    let mut scored: Vec<(f32, &Chunk)> = chunks
        .iter()
        .map(|c| (cosine_similarity(&c.embedding, query), *c))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().take(k).map(|(_, c)| c).collect()
}

/// Concatenate chunk texts in document order up to a token budget.
///
/// When the selection does not fit, the least query-similar chunks are the
/// ones sacrificed; whatever fits is emitted in document order. At least one
/// chunk is always included so generation never sees an empty context.
pub fn assemble_context(chunks: &[Chunk], query: &[f32], token_budget: usize) -> String {
    let mut by_value: Vec<(f32, &Chunk)> = chunks
        .iter()
        .map(|c| (cosine_similarity(&c.embedding, query), c))
        .collect();
    by_value.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then(a.1.chunk_index.cmp(&b.1.chunk_index))
    });

    let mut included: Vec<&Chunk> = Vec::with_capacity(by_value.len());
    let mut spent = 0_usize;
    for (_, chunk) in by_value {
        let cost = chunk.token_estimate as usize;
        if !included.is_empty() && spent + cost > token_budget {
            continue;
        }
        included.push(chunk);
        spent += cost;
    }
    if included.len() < chunks.len() {
        tracing::debug!(
            included = included.len(),
            total = chunks.len(),
            "context token budget dropped the least similar chunks"
        );
    }

    included.sort_by_key(|c| c.chunk_index);
    let parts: Vec<&str> = included.iter().map(|c| c.text.as_str()).collect();
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: u32, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: format!("chunk-{index}"),
            document_id: "doc-1".to_string(),
            extraction_id: "ext-1".to_string(),
            chunk_index: index,
            text: format!("text of chunk {index}"),
            embedding,
            token_estimate: 10,
        }
    }

    #[test]
    fn cosine_basics() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn small_documents_return_everything_in_order() {
        let chunks = vec![
            chunk(2, vec![0.0, 1.0]),
            chunk(0, vec![1.0, 0.0]),
            chunk(1, vec![0.5, 0.5]),
        ];
        let selected = select_chunks(&chunks, &[1.0, 0.0], 5, 3);
        let indices: Vec<u32> = selected.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn similarity_picks_survive_the_cap() {
        // 10 chunks, cap of 3. Chunk 7 is the only one aligned with the
        // query; it must be selected even though stride sampling from the
        // front would not reach it.
        let mut chunks: Vec<Chunk> = (0..10).map(|i| chunk(i, vec![0.0, 1.0])).collect();
        chunks[7].embedding = vec![1.0, 0.0];

        let selected = select_chunks(&chunks, &[1.0, 0.0], 1, 3);
        assert_eq!(selected.len(), 3);
        assert!(selected.iter().any(|c| c.chunk_index == 7));
    }

    #[test]
    fn result_is_capped_sorted_and_deduplicated() {
        let chunks: Vec<Chunk> = (0..20).map(|i| chunk(i, vec![1.0, 0.0])).collect();
        let selected = select_chunks(&chunks, &[1.0, 0.0], 2, 3);
        assert_eq!(selected.len(), 6);

        let indices: Vec<u32> = selected.iter().map(|c| c.chunk_index).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(indices, sorted);
    }

    #[test]
    fn stride_sampling_spans_the_document() {
        let chunks: Vec<Chunk> = (0..100).map(|i| chunk(i, vec![0.0, 0.0])).collect();
        // Zero query similarity everywhere: selection falls back on order
        // stability, and diversity picks must reach the tail
        let selected = select_chunks(&chunks, &[1.0, 0.0], 2, 3);
        assert_eq!(selected.len(), 6);
        let max_index = selected.iter().map(|c| c.chunk_index).max().unwrap();
        assert!(max_index >= 50, "picks clustered at the front: {max_index}");
    }

    #[test]
    fn context_respects_token_budget() {
        let chunks: Vec<Chunk> = (0..5).map(|i| chunk(i, vec![])).collect();
        // 10 tokens per chunk, all equally scored; a budget of 25 fits two
        // and ties resolve in document order
        let context = assemble_context(&chunks, &[1.0, 0.0], 25);
        assert!(context.contains("text of chunk 0"));
        assert!(context.contains("text of chunk 1"));
        assert!(!context.contains("text of chunk 2"));
    }

    #[test]
    fn context_truncation_drops_least_similar_chunk() {
        let chunks = vec![
            chunk(0, vec![0.0, 1.0]),
            chunk(1, vec![1.0, 0.0]),
            chunk(2, vec![0.9, 0.1]),
        ];
        // Budget fits two of three: the orthogonal chunk 0 goes, not the tail
        let context = assemble_context(&chunks, &[1.0, 0.0], 25);
        assert!(!context.contains("text of chunk 0"));
        assert!(context.contains("text of chunk 1"));
        assert!(context.contains("text of chunk 2"));
        // Survivors stay in document order
        let one = context.find("text of chunk 1").unwrap();
        let two = context.find("text of chunk 2").unwrap();
        assert!(one < two);
    }

    #[test]
    fn context_always_includes_a_chunk() {
        let chunks = vec![chunk(0, vec![])];
        let context = assemble_context(&chunks, &[1.0, 0.0], 1);
        assert_eq!(context, "text of chunk 0");
    }
}
