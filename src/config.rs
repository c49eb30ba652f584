use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ChronicleConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub builder: BuilderConfig,
    pub reasoner: ReasonerConfig,
    pub cache: CacheConfig,
    pub narrator: NarratorConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout_ms: u64,
}

/// Knobs for the six edge heuristics and the rebuild loop.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BuilderConfig {
    pub temporal_window_hours: f64,
    pub decay_exponent: f64,
    pub batch_size: usize,
    pub max_cooccurrence_keys: usize,
    pub summary_max_chars: usize,
}

/// Query limits and traversal tuning. `max_*` values are validation limits:
/// requests beyond them are rejected, not clamped.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReasonerConfig {
    pub max_depth: usize,
    pub max_k: usize,
    pub default_depth: usize,
    pub default_k: usize,
    pub timeline_depth: usize,
    pub max_window_hours: f64,
    pub deadline_ms: u64,
    pub uniform_weight_epsilon: f64,
    pub hop_decay: f64,
    pub seed_count: usize,
    pub min_seed_similarity: f64,
    pub max_explored_edges: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NarratorConfig {
    pub provider: String,
    pub endpoint: String,
    pub timeout_ms: u64,
    pub failure_threshold: usize,
    pub failure_window_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            host: "127.0.0.1".into(),
            port: 7420,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_chronicle_dir()
            .join("graph.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".into(),
            endpoint: "http://127.0.0.1:8080/embed".into(),
            model: "feature-hash-v1".into(),
            dimensions: crate::embedding::EMBEDDING_DIM,
            timeout_ms: 2000,
        }
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            temporal_window_hours: 24.0,
            decay_exponent: 3.0,
            batch_size: 64,
            max_cooccurrence_keys: 8,
            summary_max_chars: 280,
        }
    }
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_k: 50,
            default_depth: 3,
            default_k: 12,
            timeline_depth: 3,
            max_window_hours: 2160.0,
            deadline_ms: 550,
            uniform_weight_epsilon: 0.05,
            hop_decay: 0.7,
            seed_count: 5,
            min_seed_similarity: 0.1,
            max_explored_edges: 5000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            capacity: 256,
        }
    }
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            provider: "none".into(),
            endpoint: "http://127.0.0.1:8081/narrate".into(),
            timeout_ms: 300,
            failure_threshold: 3,
            failure_window_secs: 60,
            cooldown_secs: 30,
        }
    }
}

impl BuilderConfig {
    pub fn temporal_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.temporal_window_hours * 3_600_000.0) as i64)
    }
}

impl ReasonerConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Returns `~/.chronicle/`
pub fn default_chronicle_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".chronicle")
}

/// Returns the default config file path: `~/.chronicle/config.toml`
pub fn default_config_path() -> PathBuf {
    default_chronicle_dir().join("config.toml")
}

impl ChronicleConfig {
    /// Load config from the default TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            ChronicleConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (CHRONICLE_DB, CHRONICLE_LOG_LEVEL,
    /// CHRONICLE_EMBEDDING_URL, CHRONICLE_NARRATOR_URL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CHRONICLE_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("CHRONICLE_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("CHRONICLE_EMBEDDING_URL") {
            self.embedding.provider = "http".into();
            self.embedding.endpoint = val;
        }
        if let Ok(val) = std::env::var("CHRONICLE_NARRATOR_URL") {
            self.narrator.provider = "http".into();
            self.narrator.endpoint = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
