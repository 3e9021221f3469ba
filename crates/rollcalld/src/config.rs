use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rollcall_core::{DecisionPolicy, Metric};
use serde::Deserialize;

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    #[default]
    System,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            other => Err(format!("unknown bus '{other}' (expected session or system)")),
        }
    }
}

/// Daemon configuration: optional TOML file named by `ROLLCALL_CONFIG`,
/// then `ROLLCALL_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite gallery database.
    pub db_path: PathBuf,
    /// Similarity metric used by every match path.
    pub metric: Metric,
    /// Accept threshold, interpreted according to the metric's polarity.
    pub match_threshold: f32,
    /// Embedding dimension; fixed by the first enrollment when unset.
    pub embedding_dim: Option<usize>,
    /// Name of the external embedding model, reported by `Status`.
    pub model_name: String,
    /// Upper bound on a single verify/identify request.
    pub request_timeout_secs: u64,
    pub bus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("gallery.db"),
            metric: Metric::Cosine,
            match_threshold: 0.6,
            embedding_dim: None,
            model_name: "Facenet".to_string(),
            request_timeout_secs: 10,
            bus: BusKind::System,
        }
    }
}

impl Config {
    /// Load from the file named by `ROLLCALL_CONFIG` (if any) and the process environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply `ROLLCALL_*` overrides. Unparseable values are logged and ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(metric) = env_parse(&lookup, "ROLLCALL_METRIC") {
            self.metric = metric;
        }
        if let Some(threshold) = env_parse(&lookup, "ROLLCALL_MATCH_THRESHOLD") {
            self.match_threshold = threshold;
        }
        if let Some(dim) = env_parse(&lookup, "ROLLCALL_EMBEDDING_DIM") {
            self.embedding_dim = Some(dim);
        }
        if let Some(name) = lookup("ROLLCALL_MODEL_NAME") {
            self.model_name = name;
        }
        if let Some(secs) = env_parse(&lookup, "ROLLCALL_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = secs;
        }
        if let Some(bus) = env_parse(&lookup, "ROLLCALL_BUS") {
            self.bus = bus;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.match_threshold.is_finite() {
            bail!("match threshold must be a finite number");
        }
        match self.metric {
            Metric::Cosine if !(-1.0..=1.0).contains(&self.match_threshold) => {
                bail!("cosine threshold {} outside [-1, 1]", self.match_threshold)
            }
            Metric::Euclidean if self.match_threshold < 0.0 => {
                bail!("euclidean threshold {} is negative", self.match_threshold)
            }
            _ => {}
        }
        if self.embedding_dim == Some(0) {
            bail!("embedding dimension must be positive");
        }
        if self.request_timeout_secs == 0 {
            bail!("request timeout must be at least one second");
        }
        Ok(())
    }

    pub fn policy(&self) -> DecisionPolicy {
        DecisionPolicy::new(self.metric, self.match_threshold)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid config value");
            None
        }
    }
}
