//! Enrollment samples: `enrollments.json`, student id → array of vectors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rollcall_core::Embedding;

use crate::error::Result;
use crate::jsonfile;

const FILE_NAME: &str = "enrollments.json";

#[derive(Debug, Clone)]
pub struct EmbeddingRepository {
    path: PathBuf,
}

impl EmbeddingRepository {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(FILE_NAME),
        }
    }

    /// Every stored enrollment; empty if the file is missing or corrupt.
    pub fn load_all(&self) -> BTreeMap<String, Vec<Embedding>> {
        jsonfile::load_or_default(&self.path)
    }

    /// Replace the samples stored for `student_id`.
    pub fn save_enrollment(&self, student_id: &str, embeddings: &[Embedding]) -> Result<()> {
        let mut all = self.load_all();
        all.insert(student_id.to_string(), embeddings.to_vec());
        jsonfile::save(&self.path, &all)?;
        tracing::debug!(student_id, samples = embeddings.len(), "enrollment saved");
        Ok(())
    }

    /// Drop the samples for `student_id`. The file is only rewritten when
    /// something was removed.
    pub fn remove_enrollment(&self, student_id: &str) -> Result<bool> {
        let mut all = self.load_all();
        if all.remove(student_id).is_none() {
            return Ok(false);
        }
        jsonfile::save(&self.path, &all)?;
        Ok(true)
    }

    /// Samples for `student_ids` in roster order; ids without samples are skipped.
    pub fn load_for(&self, student_ids: &[String]) -> Vec<(String, Vec<Embedding>)> {
        let mut all = self.load_all();
        student_ids
            .iter()
            .filter_map(|id| all.remove(id).map(|e| (id.clone(), e)))
            .collect()
    }
}
