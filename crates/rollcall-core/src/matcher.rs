//! Nearest-neighbour identification over the active class's enrollments.

use crate::types::{Embedding, MatchResult};

/// In-memory index of enrolled embeddings, keyed by student id.
///
/// Holds only the currently active class; callers `clear` and re-`enroll`
/// on class switch. Entries keep insertion order so that equal similarities
/// resolve to the first student enrolled.
#[derive(Debug, Default)]
pub struct EmbeddingMatcher {
    entries: Vec<(String, Vec<Embedding>)>,
}

impl EmbeddingMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `embeddings` to the samples stored for `student_id`.
    pub fn enroll(&mut self, student_id: &str, embeddings: impl IntoIterator<Item = Embedding>) {
        match self.entries.iter_mut().find(|(id, _)| id == student_id) {
            Some((_, stored)) => stored.extend(embeddings),
            None => self
                .entries
                .push((student_id.to_string(), embeddings.into_iter().collect())),
        }
    }

    /// Drop every sample for `student_id`. Returns whether anything was stored.
    pub fn remove(&mut self, student_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(id, _)| id != student_id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of enrolled students.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total stored vectors across all students.
    pub fn sample_count(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.len()).sum()
    }

    pub fn contains(&self, student_id: &str) -> bool {
        self.entries.iter().any(|(id, _)| id == student_id)
    }

    /// Find the enrolled student whose closest sample is most similar to `query`.
    ///
    /// Scans every stored vector and keeps the global maximum; returns it
    /// only when the similarity reaches `threshold`.
    pub fn recognize(&self, query: &Embedding, threshold: f32) -> Option<MatchResult> {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_id: Option<&str> = None;

        for (student_id, samples) in &self.entries {
            for sample in samples {
                let sim = query.similarity(sample);
                if sim > best_sim {
                    best_sim = sim;
                    best_id = Some(student_id);
                }
            }
        }

        match best_id {
            Some(id) if best_sim >= threshold => {
                tracing::trace!(student_id = id, similarity = best_sim, "embedding matched");
                Some(MatchResult {
                    student_id: id.to_string(),
                    confidence: best_sim,
                })
            }
            _ => None,
        }
    }
}
