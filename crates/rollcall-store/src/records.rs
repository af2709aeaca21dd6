//! Per-class, per-day presence records.
//!
//! One JSON array per `(class, date)`, stored as
//! `attendance_<class>_<yyyy-mm-dd>.json`. Callers read, modify and write
//! back the whole list.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::jsonfile;
use crate::model::AttendanceRecord;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

const FILE_PREFIX: &str = "attendance_";
const FILE_SUFFIX: &str = ".json";

#[derive(Debug, Clone)]
pub struct DailyRecordStore {
    root: PathBuf,
}

/// Class id as used in record file names: `[A-Za-z0-9_-]` kept, everything
/// else mapped to `_`, blank ids become `global`.
fn safe_class_id(class_id: &str) -> String {
    if class_id.trim().is_empty() {
        return "global".to_string();
    }
    class_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

impl DailyRecordStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn file_for(&self, class_id: &str, date: NaiveDate) -> PathBuf {
        self.root.join(format!(
            "{FILE_PREFIX}{}_{}{FILE_SUFFIX}",
            safe_class_id(class_id),
            date.format(DATE_FORMAT)
        ))
    }

    /// Records for the day; empty if the file is missing or unparseable.
    pub fn load(&self, class_id: &str, date: NaiveDate) -> Vec<AttendanceRecord> {
        jsonfile::load_or_default(&self.file_for(class_id, date))
    }

    /// Overwrite the day's file with `records`.
    pub fn save(&self, class_id: &str, date: NaiveDate, records: &[AttendanceRecord]) -> Result<()> {
        jsonfile::save(&self.file_for(class_id, date), records)
    }

    /// Rewrite `(roll, name)` on every stored record of `class_id` matching
    /// `old`. Returns the number of day files changed.
    pub fn rekey(
        &self,
        class_id: &str,
        old: &(String, String),
        new: &(String, String),
    ) -> Result<usize> {
        let mut changed = 0;
        for date in self.dates_for_class(class_id)? {
            let mut records = self.load(class_id, date);
            let mut touched = false;
            for record in records.iter_mut().filter(|r| r.is_for(&old.0, &old.1)) {
                record.roll = new.0.clone();
                record.name = new.1.clone();
                touched = true;
            }
            if touched {
                self.save(class_id, date, &records)?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Every date that has a record file for `class_id`, ascending.
    pub fn dates_for_class(&self, class_id: &str) -> Result<Vec<NaiveDate>> {
        let prefix = format!("{FILE_PREFIX}{}_", safe_class_id(class_id));
        let mut dates = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(date_part) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            else {
                continue;
            };
            // Another class whose id extends ours leaves a non-date remainder.
            if let Ok(date) = NaiveDate::parse_from_str(date_part, DATE_FORMAT) {
                dates.push(date);
            }
        }

        dates.sort();
        Ok(dates)
    }
}
