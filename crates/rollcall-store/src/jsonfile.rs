//! Whole-file JSON persistence shared by the registries.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::error::Result;

/// Read `path` as JSON, or `T::default()` if it is missing or unparseable.
pub(crate) fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable store file; using empty");
            return T::default();
        }
    };
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt store file; using empty");
            T::default()
        }
    }
}

/// Overwrite `path` with `value` serialized as JSON.
pub(crate) fn save<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    std::fs::write(path, json)?;
    Ok(())
}
