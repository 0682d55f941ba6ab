use crate::core::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Default dimensionality of the built-in hashing embedder
pub const DEFAULT_HASHING_DIMS: usize = 384;

/// Embedding capability injected into the partitioned store.
///
/// Implementations must be deterministic for a given model id: vectors from
/// different models are not comparable, so a model change forces a re-index.
pub trait Embedder: Send + Sync {
    /// Identifier of the model producing the vectors
    fn model_id(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input in order
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Feature-hashing bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed with SHA-256 into a bucket and
/// a sign; the resulting vector is L2 normalized. Needs no model download,
/// which also makes it the stub used throughout the tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    model_id: String,
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            model_id: format!("hashing-{}", dims),
            dims,
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMS)
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

/// Build the embedder named by the configured model identifier.
///
/// Built-in identifiers are `hashing` and `hashing-<dims>`; other backends
/// are injected through [`Embedder`] by library users.
pub fn embedder_for_model(model_id: &str) -> Result<Arc<dyn Embedder>> {
    let model_id = model_id.trim();
    if model_id == "hashing" {
        return Ok(Arc::new(HashingEmbedder::default()));
    }
    if let Some(dims) = model_id.strip_prefix("hashing-") {
        return match dims.parse::<usize>() {
            Ok(dims) if dims > 0 => Ok(Arc::new(HashingEmbedder::new(dims))),
            _ => Err(Error::Config(format!(
                "Invalid hashing embedder dimensions in '{}'",
                model_id
            ))),
        };
    }
    Err(Error::Config(format!(
        "Unsupported embedding model '{}' (built-in models: hashing, hashing-<dims>)",
        model_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_embeddings_are_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let texts = vec!["Budget report for Q3".to_string(), "budget REPORT for q3".to_string()];
        let vectors = embedder.embed(&texts).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 64);
        assert_eq!(vectors[0], vectors[1]);
        assert!((dot(&vectors[0], &vectors[0]) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_tokens_are_closer() {
        let embedder = HashingEmbedder::default();
        let v = embedder
            .embed(&[
                "quarterly budget report".to_string(),
                "budget report draft".to_string(),
                "grocery list bananas".to_string(),
            ])
            .unwrap();
        assert!(dot(&v[0], &v[1]) > dot(&v[0], &v[2]));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        let v = embedder.embed(&["  ...  ".to_string()]).unwrap();
        assert!(v[0].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_embedder_for_model() {
        assert_eq!(embedder_for_model("hashing").unwrap().model_id(), "hashing-384");
        assert_eq!(embedder_for_model("hashing-32").unwrap().model_id(), "hashing-32");
        assert!(embedder_for_model("hashing-0").is_err());
        assert!(embedder_for_model("all-MiniLM-L6-v2").is_err());
    }
}
