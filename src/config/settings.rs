use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use super::defaults;

/// Top-level configuration for the botscope detection engine.
/// Deserializes from a TOML configuration file; every section and field is
/// optional and falls back to its documented default.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "defaults::default_velocity_config")]
    pub velocity: VelocityConfig,

    #[serde(default = "defaults::default_session_config")]
    pub session: SessionConfig,

    #[serde(default = "defaults::default_fusion_config")]
    pub fusion: FusionConfig,

    #[serde(default = "defaults::default_chunking_config")]
    pub chunking: ChunkingConfig,

    #[serde(default = "defaults::default_signature_config")]
    pub signatures: SignatureConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            velocity: defaults::default_velocity_config(),
            session: defaults::default_session_config(),
            fusion: defaults::default_fusion_config(),
            chunking: defaults::default_chunking_config(),
            signatures: defaults::default_signature_config(),
        }
    }
}

/// Request-cadence thresholds for the velocity analyzer.
#[derive(Debug, Clone, Deserialize)]
pub struct VelocityConfig {
    #[serde(default = "defaults::default_max_requests_per_second")]
    pub max_requests_per_second: f64,

    #[serde(default = "defaults::default_max_requests_per_minute")]
    pub max_requests_per_minute: f64,

    /// Intervals below this are considered machine-speed.
    #[serde(default = "defaults::default_min_interval_ms")]
    pub min_interval_ms: f64,
}

/// Session windowing parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Inactivity gap that closes a session.
    #[serde(default = "defaults::default_max_gap_minutes")]
    pub max_gap_minutes: i64,

    /// Soft cap on session span. Consulted by the behavior analyzer's
    /// realistic-length check; never used as a hard split boundary.
    #[serde(default = "defaults::default_max_duration_hours")]
    pub max_duration_hours: i64,
}

/// Analyzer weights and the survival threshold for the fusion step.
/// Weights need not sum to 1; fusion renormalizes by the sum of the weights
/// of whichever analyzers actually contributed.
#[derive(Debug, Clone, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "defaults::default_velocity_weight")]
    pub velocity_weight: f64,

    #[serde(default = "defaults::default_pattern_weight")]
    pub pattern_weight: f64,

    #[serde(default = "defaults::default_signature_weight")]
    pub signature_weight: f64,

    #[serde(default = "defaults::default_behavior_weight")]
    pub behavior_weight: f64,

    /// Sessions at or below this final confidence are treated as human
    /// background traffic and dropped from the bot list.
    #[serde(default = "defaults::default_min_confidence")]
    pub min_confidence: f64,
}

/// Chunked-processing parameters for the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "defaults::default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "defaults::default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,

    /// Entries older than this window (anchored to the newest entry in the
    /// batch, keeping results deterministic) are dropped before processing.
    #[serde(default = "defaults::default_recency_window_hours")]
    pub recency_window_hours: i64,

    /// Advisory memory ceiling consulted before each chunk wave.
    #[serde(default = "defaults::default_memory_ceiling_bytes")]
    pub memory_ceiling_bytes: u64,

    /// Upper bound on the advisory reclaim wait loop.
    #[serde(default = "defaults::default_max_reclaim_wait_ms")]
    pub max_reclaim_wait_ms: u64,
}

/// Signature registry source.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureConfig {
    /// Path to a JSON signature catalog. Empty means built-ins only.
    #[serde(default)]
    pub catalog_path: String,
}
