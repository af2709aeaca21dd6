//! Class registry: `classes.json`, a JSON array rewritten on every change.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::jsonfile;
use crate::model::{now_millis, ClassRoom};

const FILE_NAME: &str = "classes.json";

#[derive(Debug, Clone)]
pub struct ClassRegistry {
    path: PathBuf,
}

impl ClassRegistry {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(FILE_NAME),
        }
    }

    /// All classes; empty if the file is missing or corrupt.
    pub fn list(&self) -> Vec<ClassRoom> {
        jsonfile::load_or_default(&self.path)
    }

    pub fn save_all(&self, classes: &[ClassRoom]) -> Result<()> {
        jsonfile::save(&self.path, classes)
    }

    pub fn get(&self, class_id: &str) -> Option<ClassRoom> {
        self.list().into_iter().find(|c| c.id == class_id)
    }

    /// Enrolled student ids of `class_id`, empty for an unknown class.
    pub fn student_ids(&self, class_id: &str) -> Vec<String> {
        self.get(class_id).map(|c| c.student_ids).unwrap_or_default()
    }

    pub fn create(&self, name: &str, subject: &str) -> Result<ClassRoom> {
        let mut classes = self.list();
        let class = ClassRoom {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            subject: subject.to_string(),
            student_ids: Vec::new(),
            created_at: now_millis(),
        };
        classes.push(class.clone());
        self.save_all(&classes)?;
        tracing::info!(class_id = %class.id, name, "class created");
        Ok(class)
    }

    /// Change display name and subject. Returns false for an unknown class.
    pub fn update(&self, class_id: &str, name: &str, subject: &str) -> Result<bool> {
        let mut classes = self.list();
        let Some(idx) = classes.iter().position(|c| c.id == class_id) else {
            return Ok(false);
        };
        classes[idx].name = name.to_string();
        classes[idx].subject = subject.to_string();
        self.save_all(&classes)?;
        Ok(true)
    }

    /// Append `student_id` to the roster. Returns false if the class is
    /// unknown or the student is already enrolled.
    pub fn add_student(&self, class_id: &str, student_id: &str) -> Result<bool> {
        let mut classes = self.list();
        let Some(idx) = classes.iter().position(|c| c.id == class_id) else {
            tracing::warn!(class_id, student_id, "add_student: unknown class");
            return Ok(false);
        };
        if classes[idx].student_ids.iter().any(|id| id == student_id) {
            return Ok(false);
        }
        classes[idx].student_ids.push(student_id.to_string());
        self.save_all(&classes)?;
        Ok(true)
    }

    /// Drop `student_id` from the roster. Returns whether it was enrolled.
    pub fn remove_student(&self, class_id: &str, student_id: &str) -> Result<bool> {
        let mut classes = self.list();
        let Some(idx) = classes.iter().position(|c| c.id == class_id) else {
            return Ok(false);
        };
        let before = classes[idx].student_ids.len();
        classes[idx].student_ids.retain(|id| id != student_id);
        if classes[idx].student_ids.len() == before {
            return Ok(false);
        }
        self.save_all(&classes)?;
        Ok(true)
    }

    /// Remove the class entry and return it. Cascading cleanup is the
    /// caller's job (see `RosterService::delete_class`).
    pub fn delete(&self, class_id: &str) -> Result<Option<ClassRoom>> {
        let mut classes = self.list();
        let Some(idx) = classes.iter().position(|c| c.id == class_id) else {
            return Ok(None);
        };
        let removed = classes.remove(idx);
        self.save_all(&classes)?;
        Ok(Some(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_get_list() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ClassRegistry::new(dir.path());
        assert!(reg.list().is_empty());

        let a = reg.create("Physics", "Mechanics").unwrap();
        let b = reg.create("Chemistry", "").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(reg.list().len(), 2);
        assert_eq!(reg.get(&a.id).unwrap().subject, "Mechanics");
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn test_roster_membership_is_unique_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ClassRegistry::new(dir.path());
        let c = reg.create("Physics", "").unwrap();

        assert!(reg.add_student(&c.id, "2_Bo").unwrap());
        assert!(reg.add_student(&c.id, "1_Ada").unwrap());
        assert!(!reg.add_student(&c.id, "2_Bo").unwrap());
        assert_eq!(reg.student_ids(&c.id), vec!["2_Bo", "1_Ada"]);

        assert!(reg.remove_student(&c.id, "2_Bo").unwrap());
        assert!(!reg.remove_student(&c.id, "2_Bo").unwrap());
        assert_eq!(reg.student_ids(&c.id), vec!["1_Ada"]);
    }

    #[test]
    fn test_unknown_class_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ClassRegistry::new(dir.path());
        assert!(!reg.add_student("ghost", "1_Ada").unwrap());
        assert!(!reg.update("ghost", "x", "").unwrap());
        assert!(reg.delete("ghost").unwrap().is_none());
        assert!(reg.student_ids("ghost").is_empty());
    }

    #[test]
    fn test_update_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ClassRegistry::new(dir.path());
        let c = reg.create("Physics", "").unwrap();

        assert!(reg.update(&c.id, "Physics II", "Optics").unwrap());
        let got = reg.get(&c.id).unwrap();
        assert_eq!((got.name.as_str(), got.subject.as_str()), ("Physics II", "Optics"));

        let removed = reg.delete(&c.id).unwrap().unwrap();
        assert_eq!(removed.id, c.id);
        assert!(reg.list().is_empty());
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FILE_NAME), "{not json").unwrap();
        let reg = ClassRegistry::new(dir.path());
        assert!(reg.list().is_empty());
        // and is overwritten by the next mutation
        reg.create("Physics", "").unwrap();
        assert_eq!(reg.list().len(), 1);
    }
}
