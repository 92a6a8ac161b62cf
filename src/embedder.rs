//! Deterministic text embeddings for semantic skill search.
//!
//! Feature-hashing embedder: tokens and adjacent bigrams are bucketed into a
//! fixed-dimension vector through SHA-256, then L2-normalized. The same text
//! always produces the same vector, on every platform, with no model files
//! and no network I/O.

use sha2::{Digest, Sha256};

/// Input cap for embedding, in bytes. Skill bodies can be long; the leading
/// few kilobytes carry the title, description and opening sections that
/// matter for retrieval.
const EMBED_INPUT_CAP: usize = 4096;

/// Weight for adjacent-token bigram features relative to unigrams.
const BIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct TextEmbedder {
    dim: usize,
}

impl TextEmbedder {
    pub fn new(dim: usize) -> Self {
        assert!(dim > 0, "embedding dimension must be positive");
        Self { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embed `text` into an L2-normalized vector of `dim` components.
    ///
    /// Empty or token-free text yields the zero vector.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];

        let capped = cap_text(text, EMBED_INPUT_CAP);
        let tokens: Vec<String> = capped
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        for token in &tokens {
            vector[self.bucket(token)] += 1.0;
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            vector[self.bucket(&bigram)] += BIGRAM_WEIGHT;
        }

        normalize(&mut vector);
        vector
    }

    /// Stable token -> component mapping.
    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let raw = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        (raw as usize) % self.dim
    }

    /// Cosine similarity between two vectors; 0.0 on mismatch or zero norm.
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot / (norm_a * norm_b)
    }
}

/// The text a skill is indexed under: name, description and body.
pub fn embedding_text(name: &str, description: &str, content: &str) -> String {
    let mut text = String::with_capacity(name.len() + description.len() + content.len() + 2);
    text.push_str(name);
    if !description.is_empty() {
        text.push('\n');
        text.push_str(description);
    }
    if !content.is_empty() {
        text.push('\n');
        text.push_str(content);
    }
    text
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for component in vector.iter_mut() {
            *component /= norm;
        }
    }
}

/// Truncate to at most `cap` bytes without splitting a UTF-8 character.
fn cap_text(text: &str, cap: usize) -> &str {
    if text.len() <= cap {
        return text;
    }
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic() {
        let embedder = TextEmbedder::new(384);
        let a = embedder.embed("parse json documents");
        let b = embedder.embed("parse json documents");
        assert_eq!(a, b);
    }

    #[test]
    fn embedding_is_normalized() {
        let embedder = TextEmbedder::new(128);
        let v = embedder.embed("deploy the application to production");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = TextEmbedder::new(64);
        let v = embedder.embed("   \n\t ");
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn shared_tokens_score_higher_than_disjoint() {
        let embedder = TextEmbedder::new(384);
        let doc = embedder.embed("parse_json\n# Parse JSON\n\nSteps to parse json input");
        let related = embedder.embed("parse json input");
        let unrelated =
            embedder.embed("rotate kubernetes credentials periodically using the cloud console");

        let related_score = TextEmbedder::cosine_similarity(&doc, &related);
        let unrelated_score = TextEmbedder::cosine_similarity(&doc, &unrelated);
        assert!(related_score > 0.3);
        assert!(related_score > unrelated_score);
    }

    #[test]
    fn cap_respects_char_boundaries() {
        let text = "é".repeat(5000);
        let capped = cap_text(&text, EMBED_INPUT_CAP);
        assert!(capped.len() <= EMBED_INPUT_CAP);
        assert!(text.starts_with(capped));
    }

    #[test]
    fn embedding_text_joins_parts() {
        let text = embedding_text("deploy", "ship it", "# Deploy\n\nSteps");
        assert!(text.starts_with("deploy\nship it\n# Deploy"));
    }

    #[test]
    fn identical_vectors_have_unit_similarity() {
        let embedder = TextEmbedder::new(384);
        let v = embedder.embed("send email notification");
        assert!((TextEmbedder::cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }
}
