//! Embedding-based grounding check.
//!
//! The optional second half of L8: compare response sentences against the
//! retrieved context by cosine similarity and flag responses where multiple
//! sentences have no semantic support. Meta sentences (greetings,
//! transitions) are excluded from the comparison.

/// Cosine similarity between two vectors; 0 when lengths differ or either
/// norm is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Split text into sentences, skipping fragments of ten chars or fewer.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let sentence = current.trim().to_string();
            if sentence.chars().count() > 10 {
                sentences.push(sentence);
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if rest.chars().count() > 10 {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Split context into overlapping word chunks of roughly `chunk_size`
/// characters for embedding comparison.
pub fn chunk_context(context: &str, chunk_size: usize) -> Vec<String> {
    if context.trim().is_empty() {
        return Vec::new();
    }
    if context.chars().count() <= chunk_size {
        return vec![context.to_string()];
    }

    let words: Vec<&str> = context.split_whitespace().collect();
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0;

    for word in words {
        current.push(word);
        current_len += word.len() + 1;
        if current_len >= chunk_size {
            chunks.push(current.join(" "));
            // Keep the last quarter as overlap.
            let keep_from = current.len() * 3 / 4;
            current = current.split_off(keep_from);
            current_len = current.iter().map(|w| w.len() + 1).sum();
        }
    }
    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

/// Phrases marking a sentence as meta-commentary rather than a factual
/// claim; these are not checked against context.
const META_PHRASES: &[&str] = &[
    "i'd be happy to",
    "let me",
    "here's",
    "based on",
    "according to",
    "i can help",
    "is there anything",
    "feel free to",
    "would you like",
];

/// Whether a sentence is meta-commentary.
pub fn is_meta_sentence(sentence: &str) -> bool {
    let lower = sentence.to_lowercase();
    META_PHRASES.iter().any(|phrase| lower.contains(phrase))
}
