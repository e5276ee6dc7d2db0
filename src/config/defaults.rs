use super::settings::{
    ChunkingConfig, FusionConfig, SessionConfig, SignatureConfig, VelocityConfig,
};

// ---------------------------------------------------------------------------
// Section defaults
// ---------------------------------------------------------------------------

pub fn default_velocity_config() -> VelocityConfig {
    VelocityConfig {
        max_requests_per_second: default_max_requests_per_second(),
        max_requests_per_minute: default_max_requests_per_minute(),
        min_interval_ms: default_min_interval_ms(),
    }
}

pub fn default_session_config() -> SessionConfig {
    SessionConfig {
        max_gap_minutes: default_max_gap_minutes(),
        max_duration_hours: default_max_duration_hours(),
    }
}

pub fn default_fusion_config() -> FusionConfig {
    FusionConfig {
        velocity_weight: default_velocity_weight(),
        pattern_weight: default_pattern_weight(),
        signature_weight: default_signature_weight(),
        behavior_weight: default_behavior_weight(),
        min_confidence: default_min_confidence(),
    }
}

pub fn default_chunking_config() -> ChunkingConfig {
    ChunkingConfig {
        chunk_size: default_chunk_size(),
        max_concurrent_chunks: default_max_concurrent_chunks(),
        recency_window_hours: default_recency_window_hours(),
        memory_ceiling_bytes: default_memory_ceiling_bytes(),
        max_reclaim_wait_ms: default_max_reclaim_wait_ms(),
    }
}

pub fn default_signature_config() -> SignatureConfig {
    SignatureConfig {
        catalog_path: String::new(),
    }
}

// ---------------------------------------------------------------------------
// Field defaults
// ---------------------------------------------------------------------------

pub fn default_max_requests_per_second() -> f64 {
    5.0
}

pub fn default_max_requests_per_minute() -> f64 {
    100.0
}

pub fn default_min_interval_ms() -> f64 {
    50.0
}

pub fn default_max_gap_minutes() -> i64 {
    30
}

pub fn default_max_duration_hours() -> i64 {
    8
}

pub fn default_velocity_weight() -> f64 {
    0.25
}

pub fn default_pattern_weight() -> f64 {
    0.25
}

pub fn default_signature_weight() -> f64 {
    0.35
}

pub fn default_behavior_weight() -> f64 {
    0.15
}

pub fn default_min_confidence() -> f64 {
    0.3
}

pub fn default_chunk_size() -> usize {
    5000
}

pub fn default_max_concurrent_chunks() -> usize {
    3
}

pub fn default_recency_window_hours() -> i64 {
    48
}

pub fn default_memory_ceiling_bytes() -> u64 {
    512 * 1024 * 1024
}

pub fn default_max_reclaim_wait_ms() -> u64 {
    5000
}
