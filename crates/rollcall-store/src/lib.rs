//! rollcall-store — File-backed state for attendance tracking.
//!
//! Every store is a plain service object holding its storage root. Files are
//! read and rewritten whole; there is no locking and no atomic rename.

pub mod classes;
pub mod coordinator;
pub mod csv;
pub mod embeddings;
pub mod error;
mod jsonfile;
pub mod ledger;
pub mod model;
pub mod records;
pub mod roster;
pub mod students;

pub use classes::ClassRegistry;
pub use coordinator::AttendanceCoordinator;
pub use embeddings::EmbeddingRepository;
pub use error::StoreError;
pub use ledger::LedgerEngine;
pub use model::{parse_student_id, AttendanceRecord, ClassRoom, Student};
pub use records::DailyRecordStore;
pub use roster::RosterService;
pub use students::StudentRegistry;

use std::path::{Path, PathBuf};

/// All stores rooted at one data directory.
#[derive(Debug, Clone)]
pub struct Store {
    pub classes: ClassRegistry,
    pub students: StudentRegistry,
    pub embeddings: EmbeddingRepository,
    pub records: DailyRecordStore,
    pub ledger: LedgerEngine,
}

impl Store {
    /// Open the stores under `root`, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root: PathBuf = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        tracing::debug!(root = %root.display(), "opened store");

        let classes = ClassRegistry::new(&root);
        let students = StudentRegistry::new(&root);
        let records = DailyRecordStore::new(&root);
        Ok(Self {
            ledger: LedgerEngine::new(&root, classes.clone(), students.clone(), records.clone()),
            embeddings: EmbeddingRepository::new(&root),
            classes,
            students,
            records,
        })
    }

    pub fn coordinator(&self) -> AttendanceCoordinator {
        AttendanceCoordinator::new(self.records.clone(), self.ledger.clone())
    }

    pub fn roster(&self) -> RosterService {
        RosterService::new(self.clone())
    }
}
