use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rollcall_core::{DEFAULT_REQUIRED_CONFIRMATIONS, DEFAULT_SIMILARITY_THRESHOLD};

const DEFAULT_COOLDOWN_SECS: u64 = 10;

/// Runtime configuration.
///
/// Layered: compiled defaults, then the TOML file, then `ROLLCALL_*`
/// environment variables, then `--data-dir`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding registries, daily records and ledgers.
    pub data_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Consecutive matches needed before a student is marked.
    pub required_confirmations: u32,
    /// Seconds after a confirmation during which the student is not re-marked.
    pub cooldown_secs: u64,
    /// Mark automatically on confirmation; when off, matches are only reported.
    pub auto_mark: bool,
}

/// Optional keys read from the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    similarity_threshold: Option<f32>,
    required_confirmations: Option<u32>,
    cooldown_secs: Option<u64>,
    auto_mark: Option<bool>,
}

impl Config {
    /// Load from the config file and process environment.
    pub fn load(data_dir: Option<PathBuf>) -> Self {
        let env = |key: &str| std::env::var(key).ok();
        let file = env("ROLLCALL_CONFIG")
            .map(PathBuf::from)
            .or_else(default_config_path)
            .and_then(|path| read_file_config(&path))
            .unwrap_or_default();
        Self::resolve(file, env, data_dir)
    }

    fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
        data_dir: Option<PathBuf>,
    ) -> Self {
        let data_dir = data_dir
            .or_else(|| env("ROLLCALL_DATA_DIR").map(PathBuf::from))
            .or(file.data_dir)
            .unwrap_or_else(|| default_data_dir(&env));

        Self {
            data_dir,
            similarity_threshold: parsed(&env, "ROLLCALL_SIMILARITY_THRESHOLD")
                .or(file.similarity_threshold)
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
            required_confirmations: parsed(&env, "ROLLCALL_REQUIRED_CONFIRMATIONS")
                .or(file.required_confirmations)
                .unwrap_or(DEFAULT_REQUIRED_CONFIRMATIONS),
            cooldown_secs: parsed(&env, "ROLLCALL_COOLDOWN_SECS")
                .or(file.cooldown_secs)
                .unwrap_or(DEFAULT_COOLDOWN_SECS),
            auto_mark: env("ROLLCALL_AUTO_MARK")
                .map(|v| v != "0")
                .or(file.auto_mark)
                .unwrap_or(true),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

fn parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.trim().parse().ok())
}

/// `$XDG_DATA_HOME/rollcall`, else `~/.local/share/rollcall`.
fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn default_config_path() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("rollcall").join("config.toml");
    path.exists().then_some(path)
}

fn read_file_config(path: &Path) -> Option<FileConfig> {
    let text = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&text) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config file");
            None
        }
    }
}
