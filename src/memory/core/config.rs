//! Configuration for the memory subsystem.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::score::ScoreWeights;

/// Environment variable overriding the memory home directory.
pub const ENV_HOME: &str = "AURA_MEMORY_HOME";
/// Environment variable overriding the embedding provider.
pub const ENV_EMBEDDING_PROVIDER: &str = "AURA_EMBEDDING_PROVIDER";
/// Environment variable overriding the Ollama base URL.
pub const ENV_OLLAMA_URL: &str = "AURA_OLLAMA_URL";

/// Top-level configuration for the memory engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Storage layout.
    pub storage: StorageConfig,
    /// Embedding provider settings.
    pub embedding: EmbeddingConfig,
    /// Recall scoring settings.
    pub scoring: ScoringConfig,
    /// Hybrid search settings.
    pub search: SearchConfig,
    /// Knowledge graph settings.
    pub knowledge: KnowledgeConfig,
    /// Consolidation thresholds.
    pub consolidation: ConsolidationConfig,
    /// Maintenance scheduler settings.
    pub scheduler: SchedulerConfig,
}

impl MemoryConfig {
    /// Configuration rooted at `home`, defaults elsewhere.
    #[must_use]
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig { home: home.into() },
            ..Self::default()
        }
    }

    /// Load configuration.
    ///
    /// Reads `path` if given (it must exist), otherwise `config.toml` under the
    /// home directory when present. Environment overrides are applied last.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or fails validation.
    pub fn load(path: Option<&Path>) -> MemoryResult<Self> {
        let lookup = |key: &str| std::env::var(key).ok();
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => {
                let home = lookup(ENV_HOME).map_or_else(default_home, PathBuf::from);
                let candidate = home.join("config.toml");
                if candidate.is_file() {
                    Self::from_toml_file(&candidate)?
                } else {
                    Self::with_home(home)
                }
            }
        };
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file. Missing sections and fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_toml_file(path: &Path) -> MemoryResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parse TOML text.
    ///
    /// # Errors
    /// Returns an error if the text is not valid configuration TOML.
    pub fn from_toml_str(raw: &str) -> MemoryResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides from an environment-like lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(home) = lookup(ENV_HOME).filter(|v| !v.trim().is_empty()) {
            self.storage.home = PathBuf::from(home);
        }
        if let Some(provider) = lookup(ENV_EMBEDDING_PROVIDER) {
            match provider.trim().to_ascii_lowercase().as_str() {
                "ollama" => self.embedding.provider = EmbeddingProvider::Ollama,
                "hashing" => self.embedding.provider = EmbeddingProvider::Hashing,
                other => tracing::warn!(provider = other, "Ignoring unknown embedding provider"),
            }
        }
        if let Some(url) = lookup(ENV_OLLAMA_URL).filter(|v| !v.trim().is_empty()) {
            self.embedding.base_url = Some(url);
        }
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.embedding.ndims == 0 {
            return Err(MemoryError::InvalidConfig(
                "embedding.ndims must be > 0".to_string(),
            ));
        }

        if let Some(base_url) = &self.embedding.base_url {
            Url::parse(base_url)?;
        }

        self.scoring.weights.validate()?;

        if self.scoring.recency_half_life_days <= 0.0 {
            return Err(MemoryError::InvalidConfig(
                "scoring.recency_half_life_days must be > 0".to_string(),
            ));
        }

        if self.scoring.overfetch_factor == 0 {
            return Err(MemoryError::InvalidConfig(
                "scoring.overfetch_factor must be > 0".to_string(),
            ));
        }

        if self.search.k1 < 0.0 || !(0.0..=1.0).contains(&self.search.b) {
            return Err(MemoryError::InvalidConfig(
                "search.k1 must be >= 0 and search.b within [0, 1]".to_string(),
            ));
        }

        if self.search.bm25_weight < 0.0 || self.search.vector_weight < 0.0 {
            return Err(MemoryError::InvalidConfig(
                "search weights must be non-negative".to_string(),
            ));
        }

        if self.search.query_cache_capacity == 0 {
            return Err(MemoryError::InvalidConfig(
                "search.query_cache_capacity must be > 0".to_string(),
            ));
        }

        for (name, value) in [
            ("knowledge.extraction_confidence", self.knowledge.extraction_confidence),
            ("knowledge.explicit_confidence", self.knowledge.explicit_confidence),
            ("consolidation.mention_confidence", self.consolidation.mention_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MemoryError::InvalidConfig(format!(
                    "{name} must be within [0, 1]"
                )));
            }
        }

        if !(-1.0..=1.0).contains(&self.consolidation.min_valence) {
            return Err(MemoryError::InvalidConfig(
                "consolidation.min_valence must be within [-1, 1]".to_string(),
            ));
        }

        if self.consolidation.batch_limit == 0
            || self.consolidation.min_skill_occurrences == 0
            || self.consolidation.pattern_key_tokens == 0
        {
            return Err(MemoryError::InvalidConfig(
                "consolidation.batch_limit, min_skill_occurrences and pattern_key_tokens must be > 0"
                    .to_string(),
            ));
        }

        if self.scheduler.task_timeout_seconds == 0 || self.scheduler.poll_interval_seconds == 0 {
            return Err(MemoryError::InvalidConfig(
                "scheduler timeouts and poll interval must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Default home directory: `~/.aura/memory`, or `./.aura/memory` without a home.
#[must_use]
pub fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".aura")
        .join("memory")
}

/// On-disk layout. Every store owns one directory below `home`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory.
    pub home: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
        }
    }
}

impl StorageConfig {
    /// Episodic store directory.
    #[must_use]
    pub fn episodic_dir(&self) -> PathBuf {
        self.home.join("episodic")
    }

    /// Procedural store directory.
    #[must_use]
    pub fn procedural_dir(&self) -> PathBuf {
        self.home.join("procedural")
    }

    /// Knowledge graph directory.
    #[must_use]
    pub fn knowledge_dir(&self) -> PathBuf {
        self.home.join("knowledge")
    }

    /// Temporal graph directory.
    #[must_use]
    pub fn temporal_dir(&self) -> PathBuf {
        self.home.join("temporal")
    }

    /// Hybrid search directory.
    #[must_use]
    pub fn search_dir(&self) -> PathBuf {
        self.home.join("search")
    }

    /// Consolidation log directory.
    #[must_use]
    pub fn consolidation_dir(&self) -> PathBuf {
        self.home.join("consolidation")
    }

    /// Memory files directory.
    #[must_use]
    pub fn files_dir(&self) -> PathBuf {
        self.home.join("files")
    }

    /// Scheduler state file.
    #[must_use]
    pub fn scheduler_state_path(&self) -> PathBuf {
        self.home.join("scheduler_state.json")
    }
}

/// Embedding backend selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Ollama through Rig.
    #[default]
    Ollama,
    /// Local deterministic feature hashing.
    Hashing,
}

/// Embedding model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which backend computes embeddings.
    pub provider: EmbeddingProvider,
    /// Ollama embedding model name.
    pub model: String,
    /// Embedding vector dimensions.
    pub ndims: usize,
    /// Optional custom base URL.
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ollama,
            model: "nomic-embed-text".to_string(),
            ndims: 768,
            base_url: None,
        }
    }
}

/// Ranking settings for episodic and procedural recall.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Weights of the four score signals.
    pub weights: ScoreWeights,
    /// Half-life in days for recency decay.
    pub recency_half_life_days: f64,
    /// Candidates fetched per requested result before filtering.
    pub overfetch_factor: usize,
    /// Usage count at which a skill's access frequency saturates.
    pub skill_usage_ceiling: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            recency_half_life_days: 30.0,
            overfetch_factor: 2,
            skill_usage_ceiling: 100,
        }
    }
}

/// Hybrid lexical + vector search settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// BM25 term-frequency saturation.
    pub k1: f64,
    /// BM25 length normalization.
    pub b: f64,
    /// Weight for BM25 results.
    pub bm25_weight: f64,
    /// Weight for vector results.
    pub vector_weight: f64,
    /// Results below this fused score are dropped.
    pub min_score: f64,
    /// Capacity of the query-embedding LRU cache.
    pub query_cache_capacity: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            bm25_weight: 0.4,
            vector_weight: 0.6,
            min_score: 0.0,
            query_cache_capacity: 256,
        }
    }
}

impl SearchConfig {
    /// Equal weighting.
    #[must_use]
    pub fn balanced() -> Self {
        Self {
            bm25_weight: 0.5,
            vector_weight: 0.5,
            ..Self::default()
        }
    }

    /// Favor vector search.
    #[must_use]
    pub fn vector_heavy() -> Self {
        Self {
            bm25_weight: 0.2,
            vector_weight: 0.8,
            ..Self::default()
        }
    }

    /// Favor keyword search.
    #[must_use]
    pub fn keyword_heavy() -> Self {
        Self {
            bm25_weight: 0.7,
            vector_weight: 0.3,
            ..Self::default()
        }
    }
}

/// Knowledge and temporal graph settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Confidence assigned to lexically extracted triples.
    pub extraction_confidence: f64,
    /// Confidence assigned to explicitly added triples.
    pub explicit_confidence: f64,
    /// Default decay rate per day for temporal fact freshness.
    pub decay_rate_per_day: f64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            extraction_confidence: 0.7,
            explicit_confidence: 1.0,
            decay_rate_per_day: 0.1,
        }
    }
}

/// Consolidation thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Minimum successful episodes before a run does anything.
    pub min_episodes: usize,
    /// Minimum valence for an episode to count as successful.
    pub min_valence: f64,
    /// Maximum successful episodes examined per run.
    pub batch_limit: usize,
    /// Minimum group size to form a skill.
    pub min_skill_occurrences: usize,
    /// Leading action tokens forming the grouping key.
    pub pattern_key_tokens: usize,
    /// Maximum trigger keywords per skill.
    pub max_triggers: usize,
    /// Consolidated episodes older than this are archived.
    pub archive_after_days: i64,
    /// Confidence of `mentioned_in` triples.
    pub mention_confidence: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            min_episodes: 10,
            min_valence: 0.3,
            batch_limit: 100,
            min_skill_occurrences: 3,
            pattern_key_tokens: 3,
            max_triggers: 5,
            archive_after_days: 30,
            mention_confidence: 0.9,
        }
    }
}

/// Maintenance scheduler settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether the background loop runs.
    pub enabled: bool,
    /// Seconds between due checks in the background loop.
    pub poll_interval_seconds: u64,
    /// Upper bound for a single task run.
    pub task_timeout_seconds: u64,
    /// Hours between consolidation runs.
    pub consolidate_every_hours: u64,
    /// Hours between archival sweeps.
    pub archive_every_hours: u64,
    /// Hours between search reindexing.
    pub reindex_every_hours: u64,
    /// Hours between pattern analyses.
    pub analyze_every_hours: u64,
    /// Hours between temporal log compactions.
    pub compact_every_hours: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 3600,
            task_timeout_seconds: 300,
            consolidate_every_hours: 24,
            archive_every_hours: 168,
            reindex_every_hours: 72,
            analyze_every_hours: 12,
            compact_every_hours: 168,
        }
    }
}
