use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub wal_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            wal_file: "sessions.wal".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn wal_path(&self) -> std::path::PathBuf {
        Path::new(&self.data_dir).join(&self.wal_file)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    /// Maximum number of feedback lines kept, headline included.
    pub max_feedback: usize,
    /// Above this many nodes the cost scorer warns about tool sprawl.
    pub tool_sprawl_threshold: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_feedback: 5,
            tool_sprawl_threshold: 8,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub max_participants: u32,
    pub inactive_threshold_ms: u64,
    pub share_code_length: usize,
    pub referral_code_length: usize,
    pub max_code_attempts: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_participants: 10,
            inactive_threshold_ms: 30_000,
            share_code_length: 6,
            referral_code_length: 8,
            max_code_attempts: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub scoring: ScoringConfig,
    pub sessions: SessionConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        Self::load_from("config", &run_mode)
    }

    /// Layers `{dir}/default`, `{dir}/{run_mode}` and `VIBEBUFF__*` variables
    /// over the built-in defaults. Both files are optional.
    pub fn load_from(dir: impl AsRef<Path>, run_mode: &str) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let default_file = dir.join("default");
        let mode_file = dir.join(run_mode);

        let builder = Config::builder()
            .add_source(File::with_name(&default_file.to_string_lossy()).required(false))
            .add_source(File::with_name(&mode_file.to_string_lossy()).required(false))
            .add_source(
                Environment::with_prefix("VIBEBUFF")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
