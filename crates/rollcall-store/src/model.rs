use serde::{Deserialize, Serialize};

pub const STATUS_PRESENT: &str = "Present";

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// An enrolled person.
///
/// Ledger rows and duplicate checks identify a student by `(roll, name)`,
/// not by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    #[serde(default)]
    pub roll: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub class_id: String,
    #[serde(default)]
    pub created_at: i64,
}

impl Student {
    /// Build a student whose id is derived from `roll` and `name`.
    pub fn new(roll: &str, name: &str, class_id: &str) -> Self {
        Self {
            id: Self::derive_id(roll, name),
            roll: roll.to_string(),
            name: name.to_string(),
            class_id: class_id.to_string(),
            created_at: now_millis(),
        }
    }

    /// `"<roll>_<name>"` with each whitespace run in the name replaced by `_`.
    pub fn derive_id(roll: &str, name: &str) -> String {
        let name = name.split_whitespace().collect::<Vec<_>>().join("_");
        format!("{roll}_{name}")
    }

    pub fn key(&self) -> (String, String) {
        (self.roll.clone(), self.name.clone())
    }
}

/// Split a student id back into `(roll, name)`.
///
/// The roll is everything before the first `_`; underscores in the rest
/// become spaces. Ids without a separator (or starting with one) have an
/// empty roll and the whole id as name.
pub fn parse_student_id(student_id: &str) -> (String, String) {
    match student_id.find('_') {
        Some(idx) if idx > 0 => (
            student_id[..idx].to_string(),
            student_id[idx + 1..].replace('_', " "),
        ),
        _ => (String::new(), student_id.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRoom {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub subject: String,
    /// Enrolled student ids, unique, in enrollment order.
    #[serde(default)]
    pub student_ids: Vec<String>,
    #[serde(default)]
    pub created_at: i64,
}

/// One presence event for a student on a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    #[serde(default)]
    pub roll: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub student_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub class_id: String,
}

fn default_status() -> String {
    STATUS_PRESENT.to_string()
}

impl AttendanceRecord {
    pub fn present(roll: &str, name: &str, timestamp: i64, student_id: &str, class_id: &str) -> Self {
        Self {
            roll: roll.to_string(),
            name: name.to_string(),
            timestamp,
            status: default_status(),
            student_id: student_id.to_string(),
            class_id: class_id.to_string(),
        }
    }

    pub fn is_for(&self, roll: &str, name: &str) -> bool {
        self.roll == roll && self.name == name
    }
}
