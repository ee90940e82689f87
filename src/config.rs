use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ZenithConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub provider: ProviderConfig,
    pub router: RouterConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub judge: JudgeConfig,
    pub memory: MemoryConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of an OpenAI-compatible API (no trailing `/chat/completions`).
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub embedding_model: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RouterConfig {
    /// Sampling temperature per attempt. The length is the attempt bound.
    pub temperatures: Vec<f32>,
    pub timeout_ms: u64,
    /// How many recent turns the classifier sees.
    pub history_turns: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub rrf_k: usize,
    /// Top-M hits requested from each source index.
    pub candidate_limit: usize,
    /// Fused candidates handed to the reranker.
    pub fused_k: usize,
    /// Candidates kept after reranking.
    pub top_n: usize,
    pub keyword_timeout_ms: u64,
    pub vector_timeout_ms: u64,
    pub rerank_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub timeout_ms: u64,
    pub max_output_tokens: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JudgeConfig {
    pub threshold: u8,
    pub max_revisions: usize,
    pub weights: ScoreWeights,
    pub timeout_ms: u64,
}

/// Relative weight of each judged dimension. Normalised by their sum.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ScoreWeights {
    pub fidelity: f64,
    pub safety: f64,
    pub clarity: f64,
    pub efficiency: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    /// Capacity N of the short-term buffer, in turns.
    pub window_turns: usize,
    /// User utterances shorter than this are not mined for profile facts.
    pub min_extract_chars: usize,
    pub extraction_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_input_chars: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_zenith_dir()
            .join("zenith.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".into(),
            api_key: String::new(),
            model: "gemini-2.5-flash".into(),
            embedding_model: "text-embedding-004".into(),
            request_timeout_secs: 120,
            max_retries: 2,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            temperatures: vec![0.1, 0.7],
            timeout_ms: 8_000,
            history_turns: 4,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60,
            candidate_limit: 10,
            fused_k: 10,
            top_n: 3,
            keyword_timeout_ms: 2_000,
            vector_timeout_ms: 5_000,
            rerank_timeout_ms: 10_000,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            timeout_ms: 60_000,
            max_output_tokens: 8192,
        }
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            threshold: 80,
            max_revisions: 2,
            weights: ScoreWeights::default(),
            timeout_ms: 15_000,
        }
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            fidelity: 0.35,
            safety: 0.25,
            clarity: 0.20,
            efficiency: 0.20,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_turns: 20,
            min_extract_chars: 10,
            extraction_timeout_ms: 30_000,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 8_000,
        }
    }
}

/// Convert a millisecond setting into a [`Duration`].
pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Returns `~/.zenith/`
pub fn default_zenith_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".zenith")
}

/// Returns the default config file path: `~/.zenith/config.toml`
pub fn default_config_path() -> PathBuf {
    default_zenith_dir().join("config.toml")
}

impl ZenithConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
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
            ZenithConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (ZENITH_DB, ZENITH_LOG_LEVEL, ZENITH_MODEL, ZENITH_API_KEY, ZENITH_BASE_URL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ZENITH_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("ZENITH_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("ZENITH_MODEL") {
            self.provider.model = val;
        }
        if let Ok(val) = std::env::var("ZENITH_API_KEY") {
            self.provider.api_key = val;
        }
        if let Ok(val) = std::env::var("ZENITH_BASE_URL") {
            self.provider.base_url = val;
        }
    }

    /// Reject settings that would break pipeline invariants.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.memory.window_turns >= 1, "memory.window_turns must be >= 1");
        anyhow::ensure!(self.retrieval.rrf_k >= 1, "retrieval.rrf_k must be >= 1");
        anyhow::ensure!(
            !self.router.temperatures.is_empty(),
            "router.temperatures must list at least one attempt"
        );
        anyhow::ensure!(self.judge.threshold <= 100, "judge.threshold must be 0-100");
        let w = &self.judge.weights;
        let all = [w.fidelity, w.safety, w.clarity, w.efficiency];
        anyhow::ensure!(
            all.iter().all(|x| *x >= 0.0) && all.iter().sum::<f64>() > 0.0,
            "judge.weights must be non-negative and not all zero"
        );
        Ok(())
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
