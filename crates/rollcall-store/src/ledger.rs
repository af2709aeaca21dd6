//! Master attendance ledger: one wide CSV sheet per class.
//!
//! Layout:
//!
//! ```text
//! S.No.,Roll_No.,Full_Name,2024-03-04,2024-03-05,Attendance %
//! 1,2,Bo,P,A,50
//! 2,10,Ada,P,P,100
//!
//! ,,Total Present,2,1,
//! ,,Total Absent,0,1,
//! ```
//!
//! Date columns are never dropped once written. Rows are re-sorted by roll
//! and renumbered on every refresh; the two summary rows are recomputed
//! from scratch and are never read back as students.

use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::classes::ClassRegistry;
use crate::csv;
use crate::error::Result;
use crate::model::parse_student_id;
use crate::records::{DailyRecordStore, DATE_FORMAT};
use crate::students::StudentRegistry;

pub const HEADER_SERIAL: &str = "S.No.";
pub const HEADER_ROLL: &str = "Roll_No.";
pub const HEADER_NAME: &str = "Full_Name";
pub const HEADER_PERCENT: &str = "Attendance %";
pub const TOTAL_PRESENT: &str = "Total Present";
pub const TOTAL_ABSENT: &str = "Total Absent";

pub const MARK_PRESENT: &str = "P";
pub const MARK_ABSENT: &str = "A";

const SERIAL_COL: usize = 0;
const ROLL_COL: usize = 1;
const NAME_COL: usize = 2;
const KEY_COLUMNS: usize = 3;

/// Ledger identity of a student: `(roll, name)`.
pub type StudentKey = (String, String);

/// `yyyy-mm-dd`, digits only.
pub fn is_date_header(header: &str) -> bool {
    let b = header.as_bytes();
    b.len() == 10
        && b.iter().enumerate().all(|(i, c)| match i {
            4 | 7 => *c == b'-',
            _ => c.is_ascii_digit(),
        })
}

fn is_summary_name(name: &str) -> bool {
    let name = name.trim();
    name.eq_ignore_ascii_case(TOTAL_PRESENT) || name.eq_ignore_ascii_case(TOTAL_ABSENT)
}

fn is_present_mark(cell: Option<&String>) -> bool {
    cell.is_some_and(|c| c.trim().eq_ignore_ascii_case(MARK_PRESENT))
}

/// `round(100 * present / total)` with ties to even.
fn percentage(present: usize, total: usize) -> usize {
    let scaled = present * 100;
    let (q, r) = (scaled / total, scaled % total);
    match (2 * r).cmp(&total) {
        Ordering::Greater => q + 1,
        Ordering::Equal if q % 2 == 1 => q + 1,
        _ => q,
    }
}

/// Numeric rolls ascending, then non-numeric rolls case-insensitively.
fn compare_rolls(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

/// Ledger file stem for a class display name.
fn safe_ledger_name(name: &str) -> String {
    let joined = name.split_whitespace().collect::<Vec<_>>().join("_");
    if joined.is_empty() {
        return "global".to_string();
    }
    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// In-memory form of a ledger sheet: ordered headers plus student rows.
///
/// Summary and blank rows are dropped on parse and only produced by
/// [`render`](Self::render).
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Default for LedgerSheet {
    fn default() -> Self {
        Self {
            headers: vec![HEADER_SERIAL.into(), HEADER_ROLL.into(), HEADER_NAME.into()],
            rows: Vec::new(),
        }
    }
}

impl LedgerSheet {
    /// Parse CSV text. Returns `None` if there is no header record.
    pub fn parse(text: &str) -> Option<Self> {
        let mut records = csv::parse(text).into_iter();
        let headers = records.next()?;
        let rows = records.filter(|r| Self::is_student_row(r)).collect();
        Some(Self { headers, rows })
    }

    fn is_student_row(fields: &[String]) -> bool {
        if fields.len() < KEY_COLUMNS {
            return false;
        }
        let (roll, name) = (&fields[ROLL_COL], &fields[NAME_COL]);
        !is_summary_name(name) && !(roll.trim().is_empty() && name.trim().is_empty())
    }

    pub fn key(row: &[String]) -> StudentKey {
        (
            row.get(ROLL_COL).cloned().unwrap_or_default(),
            row.get(NAME_COL).cloned().unwrap_or_default(),
        )
    }

    pub fn column(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    /// Indices of every `yyyy-mm-dd` header, in sheet order.
    pub fn date_columns(&self) -> Vec<usize> {
        (0..self.headers.len())
            .filter(|&i| is_date_header(&self.headers[i]))
            .collect()
    }

    pub fn row_for(&self, roll: &str, name: &str) -> Option<&Vec<String>> {
        self.rows.iter().find(|r| {
            r.get(ROLL_COL).map(String::as_str) == Some(roll)
                && r.get(NAME_COL).map(String::as_str) == Some(name)
        })
    }

    /// Cell of the student row `(roll, name)` under `header`.
    pub fn cell(&self, roll: &str, name: &str, header: &str) -> Option<&str> {
        let col = self.column(header)?;
        self.row_for(roll, name)?.get(col).map(String::as_str)
    }

    fn width(&self) -> usize {
        self.headers.len().max(KEY_COLUMNS)
    }

    fn pad_rows(&mut self) {
        let width = self.width();
        for row in &mut self.rows {
            if row.len() < width {
                row.resize(width, String::new());
            }
        }
    }

    /// Rename pre-release `Roll`/`Name` headers.
    pub fn migrate_legacy_headers(&mut self) {
        for header in &mut self.headers {
            match header.trim() {
                "Roll" => *header = HEADER_ROLL.into(),
                "Name" => *header = HEADER_NAME.into(),
                _ => {}
            }
        }
    }

    /// Make sure `Attendance %` and the `date` column exist. A new date
    /// column goes immediately before `Attendance %`; existing row cells are
    /// shifted with it.
    pub fn ensure_date_column(&mut self, date: &str) -> usize {
        if self.column(HEADER_PERCENT).is_none() {
            self.headers.push(HEADER_PERCENT.into());
        }
        if let Some(col) = self.column(date) {
            return col;
        }
        let col = self.column(HEADER_PERCENT).unwrap_or(self.headers.len());
        self.headers.insert(col, date.to_string());
        for row in &mut self.rows {
            if row.len() > col {
                row.insert(col, String::new());
            }
        }
        col
    }

    /// Collapse rows sharing a `(roll, name)` key: the last one wins, at
    /// the position of the first.
    fn dedup_rows(&mut self) -> HashMap<StudentKey, usize> {
        let mut index: HashMap<StudentKey, usize> = HashMap::new();
        let mut rows: Vec<Vec<String>> = Vec::with_capacity(self.rows.len());
        for row in self.rows.drain(..) {
            let key = Self::key(&row);
            match index.get(&key) {
                Some(&i) => rows[i] = row,
                None => {
                    index.insert(key, rows.len());
                    rows.push(row);
                }
            }
        }
        self.rows = rows;
        index
    }

    /// Write `P`/`A` for `date` for every roster student, adding rows for
    /// students not yet on the sheet (absent on every earlier date). Any
    /// blank date cell left afterwards, on any row, becomes `A`.
    pub fn apply_day(&mut self, date: &str, roster: &[StudentKey], present: &HashSet<StudentKey>) {
        let today = self.ensure_date_column(date);
        self.pad_rows();
        let mut index = self.dedup_rows();
        let date_cols = self.date_columns();
        let width = self.width();

        for key in roster {
            let mark = if present.contains(key) { MARK_PRESENT } else { MARK_ABSENT };
            match index.get(key) {
                Some(&i) => self.rows[i][today] = mark.into(),
                None => {
                    let mut row = vec![String::new(); width];
                    row[ROLL_COL] = key.0.clone();
                    row[NAME_COL] = key.1.clone();
                    for &col in &date_cols {
                        row[col] = MARK_ABSENT.into();
                    }
                    row[today] = mark.into();
                    index.insert(key.clone(), self.rows.len());
                    self.rows.push(row);
                }
            }
        }

        for row in &mut self.rows {
            for &col in &date_cols {
                if row[col].trim().is_empty() {
                    row[col] = MARK_ABSENT.into();
                }
            }
        }
    }

    /// Rewrite `Attendance %` from the `P` marks across all date columns.
    /// Leaves cells alone when there are no date columns.
    pub fn recompute_percentages(&mut self) {
        let date_cols = self.date_columns();
        let Some(pct_col) = self.column(HEADER_PERCENT) else {
            return;
        };
        if date_cols.is_empty() {
            return;
        }
        for row in &mut self.rows {
            let present = date_cols.iter().filter(|&&c| is_present_mark(row.get(c))).count();
            if row.len() <= pct_col {
                row.resize(pct_col + 1, String::new());
            }
            row[pct_col] = percentage(present, date_cols.len()).to_string();
        }
    }

    /// Stable sort by roll, then renumber `S.No.` from 1.
    pub fn sort_rows(&mut self) {
        self.rows.sort_by(|a, b| {
            let ra = a.get(ROLL_COL).map(String::as_str).unwrap_or("");
            let rb = b.get(ROLL_COL).map(String::as_str).unwrap_or("");
            compare_rolls(ra, rb)
        });
        self.renumber();
    }

    fn renumber(&mut self) {
        for (i, row) in self.rows.iter_mut().enumerate() {
            if row.is_empty() {
                row.push(String::new());
            }
            row[SERIAL_COL] = (i + 1).to_string();
        }
    }

    /// `Total Present` / `Total Absent` rows for the current student rows.
    pub fn summary_rows(&self) -> (Vec<String>, Vec<String>) {
        let width = self.width();
        let mut present_row = vec![String::new(); width];
        let mut absent_row = vec![String::new(); width];
        present_row[NAME_COL] = TOTAL_PRESENT.into();
        absent_row[NAME_COL] = TOTAL_ABSENT.into();

        for col in self.date_columns() {
            let present = self.rows.iter().filter(|r| is_present_mark(r.get(col))).count();
            present_row[col] = present.to_string();
            absent_row[col] = (self.rows.len() - present).to_string();
        }
        (present_row, absent_row)
    }

    fn render_body(&self, out: &mut String) {
        csv::write_row(out, &self.headers, false);
        for row in &self.rows {
            csv::write_row(out, row, true);
        }
    }

    /// Full sheet: header, student rows, a blank line, the summary rows.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_body(&mut out);
        out.push('\n');
        let (present, absent) = self.summary_rows();
        csv::write_row(&mut out, &present, true);
        csv::write_row(&mut out, &absent, true);
        out
    }

    /// Header and student rows only.
    pub fn render_without_summary(&self) -> String {
        let mut out = String::new();
        self.render_body(&mut out);
        out
    }
}

/// Maintains the per-class ledger files under the storage root.
#[derive(Debug, Clone)]
pub struct LedgerEngine {
    root: PathBuf,
    classes: ClassRegistry,
    students: StudentRegistry,
    records: DailyRecordStore,
}

impl LedgerEngine {
    pub fn new(
        root: &Path,
        classes: ClassRegistry,
        students: StudentRegistry,
        records: DailyRecordStore,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            classes,
            students,
            records,
        }
    }

    /// `attendance-<class name>.csv`; the class id stands in for unknown classes.
    pub fn ledger_path(&self, class_id: &str) -> PathBuf {
        let name = self
            .classes
            .get(class_id)
            .map(|c| c.name)
            .unwrap_or_else(|| class_id.to_string());
        self.path_for_name(&name)
    }

    fn path_for_name(&self, class_name: &str) -> PathBuf {
        self.root
            .join(format!("attendance-{}.csv", safe_ledger_name(class_name)))
    }

    /// Ledger key of a student: its registry record, or the roll and name
    /// encoded in the id when there is none.
    fn key_for(&self, student_id: &str) -> StudentKey {
        self.students
            .get(student_id)
            .map(|s| s.key())
            .unwrap_or_else(|| parse_student_id(student_id))
    }

    /// Enrolled `(roll, name)` pairs, in roster order.
    pub fn roster(&self, class_id: &str) -> Vec<StudentKey> {
        self.classes
            .student_ids(class_id)
            .iter()
            .map(|id| self.key_for(id))
            .collect()
    }

    /// Current sheet, or `None` if there is no ledger file yet.
    pub fn read(&self, class_id: &str) -> Result<Option<LedgerSheet>> {
        read_sheet(&self.ledger_path(class_id))
    }

    /// Merge `date`'s presence into the ledger and rewrite it.
    pub fn refresh(&self, class_id: &str, date: NaiveDate) -> Result<()> {
        let path = self.ledger_path(class_id);
        let date_str = date.format(DATE_FORMAT).to_string();
        let roster = self.roster(class_id);
        let present: HashSet<StudentKey> = self
            .records
            .load(class_id, date)
            .into_iter()
            .map(|r| (r.roll, r.name))
            .collect();

        let mut sheet = read_sheet(&path)?.unwrap_or_default();
        sheet.migrate_legacy_headers();
        sheet.apply_day(&date_str, &roster, &present);
        sheet.recompute_percentages();
        sheet.sort_rows();

        std::fs::write(&path, sheet.render())?;
        tracing::debug!(
            class_id,
            date = %date_str,
            rows = sheet.rows.len(),
            present = present.len(),
            "ledger refreshed"
        );
        Ok(())
    }

    /// Add a row for every roster student missing from the ledger, creating
    /// the file if needed. Existing rows keep their marks and percentages.
    pub fn ensure_has_roster(&self, class_id: &str) -> Result<()> {
        let path = self.ledger_path(class_id);
        let roster = self.roster(class_id);

        let Some(mut sheet) = read_sheet(&path)? else {
            let mut sheet = LedgerSheet::default();
            sheet.headers.push(HEADER_PERCENT.into());
            for key in &roster {
                sheet.rows.push(vec![String::new(), key.0.clone(), key.1.clone(), String::new()]);
            }
            sheet.renumber();
            std::fs::write(&path, sheet.render_without_summary())?;
            tracing::info!(class_id, students = roster.len(), "ledger created");
            return Ok(());
        };

        let existing: HashSet<StudentKey> = sheet.rows.iter().map(|r| LedgerSheet::key(r)).collect();
        let missing: Vec<&StudentKey> = roster.iter().filter(|k| !existing.contains(*k)).collect();
        if missing.is_empty() {
            return Ok(());
        }

        let width = sheet.width();
        for key in &missing {
            let mut row = vec![String::new(); width];
            row[ROLL_COL] = key.0.clone();
            row[NAME_COL] = key.1.clone();
            sheet.rows.push(row);
        }
        sheet.pad_rows();
        sheet.renumber();
        std::fs::write(&path, sheet.render_without_summary())?;
        tracing::info!(class_id, added = missing.len(), "ledger roster extended");
        Ok(())
    }

    /// Drop the rows of `student_id`, matched by its ledger key. Summary
    /// rows are dropped too and come back on the next refresh. Returns
    /// whether a row was removed.
    pub fn remove_student(&self, class_id: &str, student_id: &str) -> Result<bool> {
        let path = self.ledger_path(class_id);
        let Some(mut sheet) = read_sheet(&path)? else {
            return Ok(false);
        };
        let key = self.key_for(student_id);
        let before = sheet.rows.len();
        sheet.rows.retain(|r| LedgerSheet::key(r) != key);
        let removed = sheet.rows.len() != before;

        std::fs::write(&path, sheet.render_without_summary())?;
        if removed {
            tracing::info!(class_id, student_id, "student removed from ledger");
        }
        Ok(removed)
    }

    /// Move the row keyed `old` to `new` after a student edit, so history
    /// follows the student. If a `new` row already exists the `old` row is
    /// dropped instead. Returns whether the sheet changed.
    pub fn rekey(&self, class_id: &str, old: &StudentKey, new: &StudentKey) -> Result<bool> {
        if old == new {
            return Ok(false);
        }
        let path = self.ledger_path(class_id);
        let Some(mut sheet) = read_sheet(&path)? else {
            return Ok(false);
        };
        if sheet.row_for(&new.0, &new.1).is_some() {
            let before = sheet.rows.len();
            sheet.rows.retain(|r| LedgerSheet::key(r) != *old);
            if sheet.rows.len() == before {
                return Ok(false);
            }
        } else {
            let Some(row) = sheet.rows.iter_mut().find(|r| LedgerSheet::key(r) == *old) else {
                return Ok(false);
            };
            row[ROLL_COL] = new.0.clone();
            row[NAME_COL] = new.1.clone();
        }
        sheet.sort_rows();

        std::fs::write(&path, sheet.render_without_summary())?;
        tracing::info!(
            class_id,
            old_roll = %old.0,
            old_name = %old.1,
            roll = %new.0,
            name = %new.1,
            "ledger row rekeyed"
        );
        Ok(true)
    }

    /// Recompute the ledger from the roster and every daily record file.
    pub fn rebuild(&self, class_id: &str) -> Result<usize> {
        let path = self.ledger_path(class_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let dates = self.records.dates_for_class(class_id)?;
        if dates.is_empty() {
            self.ensure_has_roster(class_id)?;
        }
        for date in &dates {
            self.refresh(class_id, *date)?;
        }
        tracing::info!(class_id, dates = dates.len(), "ledger rebuilt");
        Ok(dates.len())
    }

    /// Move the ledger after the class was renamed from `old_name`.
    /// Returns whether a file was moved.
    pub fn rename(&self, class_id: &str, old_name: &str) -> Result<bool> {
        let from = self.path_for_name(old_name);
        let to = self.ledger_path(class_id);
        if from == to || !from.exists() || to.exists() {
            return Ok(false);
        }
        std::fs::rename(&from, &to)?;
        tracing::info!(class_id, from = %from.display(), to = %to.display(), "ledger renamed");
        Ok(true)
    }
}

fn read_sheet(path: &Path) -> Result<Option<LedgerSheet>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(LedgerSheet::parse(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
