//! Registry mutations that fan out across students, embeddings, classes
//! and the ledger.

use rollcall_core::Embedding;

use crate::error::{Result, StoreError};
use crate::model::{now_millis, parse_student_id, ClassRoom, Student};
use crate::Store;

#[derive(Debug, Clone)]
pub struct RosterService {
    store: Store,
}

impl RosterService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Enroll (or re-enroll) a student in `class_id`.
    ///
    /// The id is derived from roll and name unless `explicit_id` is given;
    /// reusing an existing id edits that student in place. Non-empty
    /// `embeddings` replace the stored samples.
    pub fn enroll(
        &self,
        class_id: &str,
        roll: &str,
        name: &str,
        embeddings: &[Embedding],
        explicit_id: Option<&str>,
    ) -> Result<Student> {
        if self.store.classes.get(class_id).is_none() {
            return Err(StoreError::UnknownClass(class_id.to_string()));
        }
        let roll = roll.trim();
        let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
        if roll.is_empty() || name.is_empty() {
            return Err(StoreError::InvalidStudent("roll and name are required".into()));
        }

        let id = match explicit_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => Student::derive_id(roll, &name),
        };
        let previous = self.store.students.get(&id);
        let created_at = previous
            .as_ref()
            .map(|s| s.created_at)
            .unwrap_or_else(now_millis);
        let student = Student {
            id,
            roll: roll.to_string(),
            name,
            class_id: class_id.to_string(),
            created_at,
        };

        self.store.students.create_or_update(&student)?;
        if !embeddings.is_empty() {
            self.store.embeddings.save_enrollment(&student.id, embeddings)?;
        }
        self.store.classes.add_student(class_id, &student.id)?;
        if let Some(previous) = previous {
            self.rekey(class_id, &previous.key(), &student.key());
        }
        if let Err(err) = self.store.ledger.ensure_has_roster(class_id) {
            tracing::warn!(class_id, student_id = %student.id, error = %err, "ledger roster update failed");
        }

        tracing::info!(
            class_id,
            student_id = %student.id,
            samples = embeddings.len(),
            "student enrolled"
        );
        Ok(student)
    }

    /// Unenroll `student_id` from `class_id` and drop its ledger rows. The
    /// student record and embeddings are kept.
    pub fn remove_from_class(&self, class_id: &str, student_id: &str) -> Result<bool> {
        if !self.store.classes.remove_student(class_id, student_id)? {
            return Ok(false);
        }
        if let Err(err) = self.store.ledger.remove_student(class_id, student_id) {
            tracing::warn!(class_id, student_id, error = %err, "ledger row removal failed");
        }
        Ok(true)
    }

    /// Carry daily records and the ledger row over to an edited roll/name.
    fn rekey(&self, class_id: &str, old: &(String, String), new: &(String, String)) {
        if old == new {
            return;
        }
        if let Err(err) = self.store.records.rekey(class_id, old, new) {
            tracing::warn!(class_id, error = %err, "record rekey failed");
        }
        if let Err(err) = self.store.ledger.rekey(class_id, old, new) {
            tracing::warn!(class_id, error = %err, "ledger rekey failed");
        }
    }

    /// Delete a student outright: ledger rows, class membership, embeddings
    /// and the student record. Returns whether any of them existed.
    pub fn delete_student(&self, class_id: &str, student_id: &str) -> Result<bool> {
        // ledger first: it resolves the row key through the student record
        let in_ledger = match self.store.ledger.remove_student(class_id, student_id) {
            Ok(removed) => removed,
            Err(err) => {
                tracing::warn!(class_id, student_id, error = %err, "ledger row removal failed");
                false
            }
        };
        let enrolled = self.store.classes.remove_student(class_id, student_id)?;
        let had_samples = self.store.embeddings.remove_enrollment(student_id)?;
        let had_record = self.store.students.delete(student_id)?;

        let found = in_ledger || enrolled || had_samples || had_record;
        if found {
            tracing::info!(class_id, student_id, "student deleted");
        }
        Ok(found)
    }

    /// Delete a class and, for each member, its embeddings, student record
    /// and ledger rows. Member cleanup is best-effort.
    pub fn delete_class(&self, class_id: &str) -> Result<Option<ClassRoom>> {
        let Some(class) = self.store.classes.get(class_id) else {
            return Ok(None);
        };

        for student_id in &class.student_ids {
            // ledger first: it resolves the row key through the student record
            if let Err(err) = self.store.ledger.remove_student(class_id, student_id) {
                tracing::warn!(class_id, student_id, error = %err, "ledger row removal failed");
            }
            if let Err(err) = self.store.embeddings.remove_enrollment(student_id) {
                tracing::warn!(student_id, error = %err, "embedding removal failed");
            }
            if let Err(err) = self.store.students.delete(student_id) {
                tracing::warn!(student_id, error = %err, "student removal failed");
            }
        }

        let removed = self.store.classes.delete(class_id)?;
        tracing::info!(class_id, students = class.student_ids.len(), "class deleted");
        Ok(removed)
    }

    /// Change a class's name and subject, moving its ledger file along.
    pub fn rename_class(&self, class_id: &str, name: &str, subject: &str) -> Result<bool> {
        let Some(old) = self.store.classes.get(class_id) else {
            return Ok(false);
        };
        self.store.classes.update(class_id, name, subject)?;
        if let Err(err) = self.store.ledger.rename(class_id, &old.name) {
            tracing::warn!(class_id, error = %err, "ledger rename failed");
        }
        Ok(true)
    }

    /// Students of `class_id` in roster order. Ids with no student record
    /// fall back to the roll and name encoded in the id.
    pub fn students(&self, class_id: &str) -> Vec<Student> {
        self.store
            .classes
            .student_ids(class_id)
            .into_iter()
            .map(|id| self.resolve(&id, class_id))
            .collect()
    }

    /// Look up a student, falling back to the roll and name encoded in the id.
    pub fn resolve(&self, student_id: &str, class_id: &str) -> Student {
        self.store.students.get(student_id).unwrap_or_else(|| {
            let (roll, name) = parse_student_id(student_id);
            Student {
                id: student_id.to_string(),
                roll,
                name,
                class_id: class_id.to_string(),
                created_at: 0,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn setup() -> (tempfile::TempDir, Store, RosterService, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let class = store.classes.create("Biology", "").unwrap();
        let roster = store.roster();
        (dir, store, roster, class.id)
    }

    fn sample() -> Vec<Embedding> {
        vec![Embedding::new(vec![0.6, 0.8])]
    }

    #[test]
    fn test_enroll_fans_out() {
        let (_dir, store, roster, class_id) = setup();
        let s = roster.enroll(&class_id, "7", "Eve  Moss", &sample(), None).unwrap();

        assert_eq!(s.id, "7_Eve_Moss");
        assert_eq!(store.students.get(&s.id).unwrap().name, "Eve Moss");
        assert_eq!(store.embeddings.load_all()[&s.id].len(), 1);
        assert_eq!(store.classes.student_ids(&class_id), vec![s.id.clone()]);

        let sheet = store.ledger.read(&class_id).unwrap().unwrap();
        assert!(sheet.row_for("7", "Eve Moss").is_some());
    }

    #[test]
    fn test_reenroll_edits_in_place() {
        let (_dir, store, roster, class_id) = setup();
        let first = roster.enroll(&class_id, "7", "Eve", &sample(), None).unwrap();
        let edited = roster
            .enroll(&class_id, "7", "Eve Moss", &[], Some(&first.id))
            .unwrap();

        assert_eq!(edited.id, first.id);
        assert_eq!(edited.created_at, first.created_at);
        assert_eq!(store.students.get(&first.id).unwrap().name, "Eve Moss");
        // empty sample list keeps the old samples
        assert_eq!(store.embeddings.load_all()[&first.id].len(), 1);
        assert_eq!(store.classes.student_ids(&class_id).len(), 1);
    }

    #[test]
    fn test_enroll_rejects_unknown_class_and_blank_fields() {
        let (_dir, _store, roster, class_id) = setup();
        assert!(matches!(
            roster.enroll("ghost", "1", "Ada", &[], None),
            Err(StoreError::UnknownClass(_))
        ));
        assert!(matches!(
            roster.enroll(&class_id, " ", "Ada", &[], None),
            Err(StoreError::InvalidStudent(_))
        ));
    }

    #[test]
    fn test_mid_term_enrollment_backfills_earlier_dates() {
        let (_dir, store, roster, class_id) = setup();
        let d1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        roster.enroll(&class_id, "1", "Ada", &sample(), None).unwrap();
        store.ledger.refresh(&class_id, d1).unwrap();
        roster.enroll(&class_id, "2", "Bo", &sample(), None).unwrap();
        store.ledger.refresh(&class_id, d2).unwrap();

        let sheet = store.ledger.read(&class_id).unwrap().unwrap();
        assert_eq!(sheet.row_for("2", "Bo").unwrap(), &vec!["2", "2", "Bo", "A", "A", "0"]);
        for row in &sheet.rows {
            for col in sheet.date_columns() {
                assert!(!row[col].is_empty());
            }
        }
    }

    #[test]
    fn test_edit_carries_ledger_history() {
        let (_dir, store, roster, class_id) = setup();
        let d1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let eve = roster.enroll(&class_id, "7", "Eve", &sample(), None).unwrap();
        store.coordinator().mark_on(&class_id, d1, &eve.id, "Eve", "7").unwrap();

        roster
            .enroll(&class_id, "7", "Eve Moss", &[], Some(&eve.id))
            .unwrap();
        store.ledger.refresh(&class_id, d2).unwrap();

        let sheet = store.ledger.read(&class_id).unwrap().unwrap();
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.row_for("7", "Eve Moss").unwrap()[3..], ["P", "A", "50"]);
        assert!(store.records.load(&class_id, d1)[0].is_for("7", "Eve Moss"));

        // a rebuild from the day files agrees
        store.ledger.rebuild(&class_id).unwrap();
        let rebuilt = store.ledger.read(&class_id).unwrap().unwrap();
        assert_eq!(rebuilt.rows.len(), 1);
        assert_eq!(rebuilt.cell("7", "Eve Moss", "2024-03-01"), Some("P"));

        assert!(roster.remove_from_class(&class_id, &eve.id).unwrap());
        let text = std::fs::read_to_string(store.ledger.ledger_path(&class_id)).unwrap();
        assert!(!text.contains("Eve"));
    }

    #[test]
    fn test_delete_student() {
        let (_dir, store, roster, class_id) = setup();
        let ada = roster.enroll(&class_id, "1", "Ada", &sample(), None).unwrap();
        let bo = roster.enroll(&class_id, "2", "Bo", &sample(), None).unwrap();

        assert!(roster.delete_student(&class_id, &ada.id).unwrap());
        assert!(store.students.get(&ada.id).is_none());
        assert!(!store.embeddings.load_all().contains_key(&ada.id));
        assert_eq!(store.classes.student_ids(&class_id), vec![bo.id.clone()]);
        let sheet = store.ledger.read(&class_id).unwrap().unwrap();
        assert!(sheet.row_for("1", "Ada").is_none());
        assert!(sheet.row_for("2", "Bo").is_some());

        assert!(!roster.delete_student(&class_id, &ada.id).unwrap());
    }

    #[test]
    fn test_remove_from_class_keeps_student() {
        let (_dir, store, roster, class_id) = setup();
        let s = roster.enroll(&class_id, "1", "Ada", &sample(), None).unwrap();
        roster.enroll(&class_id, "2", "Bo", &sample(), None).unwrap();

        assert!(roster.remove_from_class(&class_id, &s.id).unwrap());
        assert!(!roster.remove_from_class(&class_id, &s.id).unwrap());
        assert!(store.students.get(&s.id).is_some());

        let sheet = store.ledger.read(&class_id).unwrap().unwrap();
        assert!(sheet.row_for("1", "Ada").is_none());
        assert!(sheet.row_for("2", "Bo").is_some());
    }

    #[test]
    fn test_delete_class_cascades() {
        let (_dir, store, roster, class_id) = setup();
        let other = store.classes.create("Art", "").unwrap();
        let a = roster.enroll(&class_id, "1", "Ada", &sample(), None).unwrap();
        let b = roster.enroll(&other.id, "2", "Bo", &sample(), None).unwrap();

        let removed = roster.delete_class(&class_id).unwrap().unwrap();
        assert_eq!(removed.student_ids, vec![a.id.clone()]);
        assert!(store.classes.get(&class_id).is_none());
        assert!(store.students.get(&a.id).is_none());
        assert!(!store.embeddings.load_all().contains_key(&a.id));
        assert!(store.students.get(&b.id).is_some());

        assert!(roster.delete_class(&class_id).unwrap().is_none());
    }

    #[test]
    fn test_rename_class() {
        let (_dir, store, roster, class_id) = setup();
        roster.enroll(&class_id, "1", "Ada", &[], None).unwrap();
        assert!(roster.rename_class(&class_id, "Biology II", "Genetics").unwrap());
        assert!(store.ledger.ledger_path(&class_id).ends_with("attendance-Biology_II.csv"));
        assert!(store.ledger.read(&class_id).unwrap().is_some());
        assert!(!roster.rename_class("ghost", "x", "").unwrap());
    }

    #[test]
    fn test_students_falls_back_to_id() {
        let (_dir, store, roster, class_id) = setup();
        roster.enroll(&class_id, "1", "Ada", &[], None).unwrap();
        store.classes.add_student(&class_id, "9_Zed_Q").unwrap();

        let students = roster.students(&class_id);
        assert_eq!(students.len(), 2);
        assert_eq!(students[1].roll, "9");
        assert_eq!(students[1].name, "Zed Q");
    }
}
