//! Student registry: `students.json`, a JSON object keyed by student id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::jsonfile;
use crate::model::Student;

const FILE_NAME: &str = "students.json";

#[derive(Debug, Clone)]
pub struct StudentRegistry {
    path: PathBuf,
}

impl StudentRegistry {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(FILE_NAME),
        }
    }

    fn load(&self) -> BTreeMap<String, Student> {
        jsonfile::load_or_default(&self.path)
    }

    pub fn create_or_update(&self, student: &Student) -> Result<()> {
        let mut students = self.load();
        students.insert(student.id.clone(), student.clone());
        jsonfile::save(&self.path, &students)
    }

    pub fn get(&self, student_id: &str) -> Option<Student> {
        self.load().remove(student_id)
    }

    /// Remove a student record. Returns whether it existed.
    pub fn delete(&self, student_id: &str) -> Result<bool> {
        let mut students = self.load();
        if students.remove(student_id).is_none() {
            return Ok(false);
        }
        jsonfile::save(&self.path, &students)?;
        Ok(true)
    }

    /// Records whose `class_id` is `class_id`.
    pub fn list_for_class(&self, class_id: &str) -> Vec<Student> {
        self.load()
            .into_values()
            .filter(|s| s.class_id == class_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let reg = StudentRegistry::new(dir.path());

        let mut ada = Student::new("1", "Ada Lovelace", "c1");
        reg.create_or_update(&ada).unwrap();
        assert_eq!(reg.get("1_Ada_Lovelace").unwrap().name, "Ada Lovelace");

        ada.name = "Ada King".into();
        reg.create_or_update(&ada).unwrap();
        assert_eq!(reg.get(&ada.id).unwrap().name, "Ada King");

        assert!(reg.delete(&ada.id).unwrap());
        assert!(!reg.delete(&ada.id).unwrap());
        assert!(reg.get(&ada.id).is_none());
    }

    #[test]
    fn test_list_for_class() {
        let dir = tempfile::tempdir().unwrap();
        let reg = StudentRegistry::new(dir.path());
        for (roll, name) in [("1", "Ada"), ("2", "Bo"), ("3", "Cy")] {
            reg.create_or_update(&Student::new(roll, name, "c1")).unwrap();
        }
        assert_eq!(reg.list_for_class("c1").len(), 3);
        assert!(reg.list_for_class("c2").is_empty());
    }

    #[test]
    fn test_file_is_object_keyed_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let reg = StudentRegistry::new(dir.path());
        reg.create_or_update(&Student::new("1", "Ada", "c1")).unwrap();

        let raw = std::fs::read_to_string(dir.path().join(FILE_NAME)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["1_Ada"]["classId"], "c1");
    }
}
