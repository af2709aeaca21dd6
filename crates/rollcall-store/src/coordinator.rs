//! Dedup-safe marking on top of the daily records, with a best-effort
//! ledger refresh after every change.

use chrono::{Local, NaiveDate};
use std::path::PathBuf;

use crate::error::Result;
use crate::ledger::LedgerEngine;
use crate::model::{now_millis, AttendanceRecord};
use crate::records::DailyRecordStore;

#[derive(Debug, Clone)]
pub struct AttendanceCoordinator {
    records: DailyRecordStore,
    ledger: LedgerEngine,
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

impl AttendanceCoordinator {
    pub fn new(records: DailyRecordStore, ledger: LedgerEngine) -> Self {
        Self { records, ledger }
    }

    /// Mark `(roll, name)` present today unless already marked.
    ///
    /// Returns `Ok(true)` for a new mark and `Ok(false)` for a duplicate.
    pub fn mark_if_not_marked(
        &self,
        class_id: &str,
        student_id: &str,
        name: &str,
        roll: &str,
    ) -> Result<bool> {
        self.mark_on(class_id, today(), student_id, name, roll)
    }

    /// Same as [`mark_if_not_marked`](Self::mark_if_not_marked) for an explicit date.
    pub fn mark_on(
        &self,
        class_id: &str,
        date: NaiveDate,
        student_id: &str,
        name: &str,
        roll: &str,
    ) -> Result<bool> {
        let mut records = self.records.load(class_id, date);
        if records.iter().any(|r| r.is_for(roll, name)) {
            tracing::debug!(class_id, roll, name, "already marked");
            return Ok(false);
        }

        records.push(AttendanceRecord::present(roll, name, now_millis(), student_id, class_id));
        self.records.save(class_id, date, &records)?;
        tracing::info!(class_id, student_id, roll, name, %date, "marked present");

        self.refresh_ledger(class_id, date);
        Ok(true)
    }

    pub fn records_for(&self, class_id: &str, date: NaiveDate) -> Vec<AttendanceRecord> {
        self.records.load(class_id, date)
    }

    /// Remove the record matching `record`'s `(roll, name, timestamp)`.
    /// Returns false when there is no such record.
    pub fn remove_record(
        &self,
        class_id: &str,
        date: NaiveDate,
        record: &AttendanceRecord,
    ) -> Result<bool> {
        let mut records = self.records.load(class_id, date);
        let before = records.len();
        records.retain(|r| !(r.is_for(&record.roll, &record.name) && r.timestamp == record.timestamp));
        if records.len() == before {
            return Ok(false);
        }

        self.records.save(class_id, date, &records)?;
        tracing::info!(class_id, roll = %record.roll, name = %record.name, %date, "record removed");

        self.refresh_ledger(class_id, date);
        Ok(true)
    }

    /// Bring today's column up to date and return the ledger path.
    pub fn export_ledger(&self, class_id: &str) -> PathBuf {
        self.refresh_ledger(class_id, today());
        self.ledger.ledger_path(class_id)
    }

    /// Ledger failures never fail the calling operation.
    fn refresh_ledger(&self, class_id: &str, date: NaiveDate) {
        if let Err(err) = self.ledger.refresh(class_id, date) {
            tracing::warn!(class_id, %date, error = %err, "ledger refresh failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::HEADER_PERCENT;
    use crate::Store;

    fn setup() -> (tempfile::TempDir, Store, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let class = store.classes.create("Maths", "").unwrap();
        store.classes.add_student(&class.id, "1_Ada").unwrap();
        store.classes.add_student(&class.id, "2_Bo").unwrap();
        (dir, store, class.id)
    }

    #[test]
    fn test_mark_is_idempotent() {
        let (_dir, store, class_id) = setup();
        let coord = store.coordinator();

        assert!(coord.mark_if_not_marked(&class_id, "1_Ada", "Ada", "1").unwrap());
        assert!(!coord.mark_if_not_marked(&class_id, "1_Ada", "Ada", "1").unwrap());

        let records = coord.records_for(&class_id, today());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].student_id, "1_Ada");
        assert_eq!(records[0].class_id, class_id);
    }

    #[test]
    fn test_mark_refreshes_ledger() {
        let (_dir, store, class_id) = setup();
        let coord = store.coordinator();
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        coord.mark_on(&class_id, date, "2_Bo", "Bo", "2").unwrap();

        let sheet = store.ledger.read(&class_id).unwrap().unwrap();
        assert_eq!(sheet.cell("2", "Bo", "2024-03-04"), Some("P"));
        assert_eq!(sheet.cell("1", "Ada", "2024-03-04"), Some("A"));
        assert_eq!(sheet.cell("2", "Bo", HEADER_PERCENT), Some("100"));
    }

    #[test]
    fn test_ledger_failure_does_not_fail_mark() {
        let (_dir, store, class_id) = setup();
        // a directory where the ledger file should be makes the refresh fail
        std::fs::create_dir(store.ledger.ledger_path(&class_id)).unwrap();

        let coord = store.coordinator();
        assert!(coord.mark_if_not_marked(&class_id, "1_Ada", "Ada", "1").unwrap());
        assert_eq!(coord.records_for(&class_id, today()).len(), 1);
    }

    #[test]
    fn test_remove_record() {
        let (_dir, store, class_id) = setup();
        let coord = store.coordinator();
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        coord.mark_on(&class_id, date, "1_Ada", "Ada", "1").unwrap();
        coord.mark_on(&class_id, date, "2_Bo", "Bo", "2").unwrap();

        let ada = coord.records_for(&class_id, date)[0].clone();
        let mut stale = ada.clone();
        stale.timestamp += 1;
        assert!(!coord.remove_record(&class_id, date, &stale).unwrap());

        assert!(coord.remove_record(&class_id, date, &ada).unwrap());
        assert!(!coord.remove_record(&class_id, date, &ada).unwrap());
        assert_eq!(coord.records_for(&class_id, date).len(), 1);

        let sheet = store.ledger.read(&class_id).unwrap().unwrap();
        assert_eq!(sheet.cell("1", "Ada", "2024-03-04"), Some("A"));
    }

    #[test]
    fn test_unknown_class_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let coord = store.coordinator();
        assert!(coord.records_for("ghost", today()).is_empty());
        assert!(coord.mark_if_not_marked("ghost", "1_Ada", "Ada", "1").unwrap());
        assert!(coord.export_ledger("ghost").ends_with("attendance-ghost.csv"));
    }
}
