use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum cosine similarity for a positive identification.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.75;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("malformed embedding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("embedding has no dimensions")]
    Empty,
    #[error("embedding component {0} is not finite")]
    NonFinite(usize),
}

/// Face embedding vector, L2-normalized by whatever produced it.
///
/// Serialized as a bare JSON array of numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Parse a single JSON array such as `[0.12, -0.4, ...]`.
    pub fn from_json(text: &str) -> Result<Self, EmbeddingError> {
        let embedding: Embedding = serde_json::from_str(text)?;
        embedding.validate()?;
        Ok(embedding)
    }

    /// Reject empty vectors and NaN/infinite components.
    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        match self.values.iter().position(|v| !v.is_finite()) {
            Some(idx) => Err(EmbeddingError::NonFinite(idx)),
            None => Ok(()),
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Vectors of
    /// different length are compared over the shorter prefix; a zero-norm
    /// side yields 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Best enrolled identity for a query embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub student_id: String,
    /// Cosine similarity of the best stored vector.
    pub confidence: f32,
}
