use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// High-level classification of an automated requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotCategory {
    /// Search engines, social previews, uptime monitors.
    Beneficial,
    /// Content harvesters: AI trainers, scrapers, aggregators.
    Extractive,
    /// Aggressive scrapers, scanners, abuse tooling.
    Malicious,
    /// Automated but not attributable to a category.
    Unknown,
}

impl fmt::Display for BotCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotCategory::Beneficial => write!(f, "beneficial"),
            BotCategory::Extractive => write!(f, "extractive"),
            BotCategory::Malicious => write!(f, "malicious"),
            BotCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl BotCategory {
    /// Parse a catalog/legacy category string. Unrecognized values map to
    /// `Unknown` so old catalogs keep loading.
    pub fn from_str_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "beneficial" => Self::Beneficial,
            "extractive" => Self::Extractive,
            "malicious" => Self::Malicious,
            // Legacy simple-detector categories.
            "search_engine" | "social_media" | "monitoring" => Self::Beneficial,
            "ai_training" | "ai_scraper" | "ai_search" => Self::Extractive,
            "scraper" | "seo_tool" => Self::Malicious,
            _ => Self::Unknown,
        }
    }
}

/// Coarse resource-cost severity, distinct from classification confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Low,
    Medium,
    High,
    Extreme,
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Impact::Low => write!(f, "low"),
            Impact::Medium => write!(f, "medium"),
            Impact::High => write!(f, "high"),
            Impact::Extreme => write!(f, "extreme"),
        }
    }
}

impl Impact {
    /// Parse a catalog/legacy severity string. Legacy "critical" maps to
    /// `Extreme`; unrecognized values map to `Low`.
    pub fn from_str_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "extreme" | "critical" => Self::Extreme,
            _ => Self::Low,
        }
    }
}

/// Shape of a session's crawl over the URL space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Walking numbered or lettered URL sequences in order.
    Sequential,
    /// Hierarchy walks, parameter sweeps, crawler-infrastructure paths.
    Systematic,
    /// No discernible structure.
    Random,
    /// A small set of specific resources, revisited consistently.
    Targeted,
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternType::Sequential => write!(f, "sequential"),
            PatternType::Systematic => write!(f, "systematic"),
            PatternType::Random => write!(f, "random"),
            PatternType::Targeted => write!(f, "targeted"),
        }
    }
}

/// Operator-level facts about a known bot, carried through from its
/// signature record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotMetadata {
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub respects_robots_txt: Option<bool>,
    /// Typical crawl rate in requests per second, when published.
    #[serde(default)]
    pub average_crawl_rate: Option<f64>,
}

/// Final fused classification for one requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotClassification {
    pub bot_name: Option<String>,
    pub category: BotCategory,
    pub subcategory: Option<String>,
    /// Certainty of the classification, in [0, 1].
    pub confidence: f64,
    /// True only if the source IP fell inside a declared range.
    pub verified: bool,
    pub impact: Impact,
    pub metadata: BotMetadata,
}

/// Per-IP request-cadence analysis.
#[derive(Debug, Clone, Serialize)]
pub struct VelocityAnalysis {
    pub requests_per_second: f64,
    pub requests_per_minute: f64,
    /// Composite mechanical-regularity score in [0, 1].
    pub burst_score: f64,
    pub is_bot: bool,
    pub confidence: f64,
}

impl VelocityAnalysis {
    /// Degenerate result for 0 or 1 observations.
    pub fn insufficient() -> Self {
        Self {
            requests_per_second: 0.0,
            requests_per_minute: 0.0,
            burst_score: 0.0,
            is_bot: false,
            confidence: 0.1,
        }
    }
}

/// Sub-signals backing a crawl-pattern verdict.
#[derive(Debug, Clone, Serialize)]
pub struct PatternIndicators {
    pub sequential_score: f64,
    pub systematic_score: f64,
    pub sitemap_access: bool,
    pub depth_consistency: f64,
}

/// Per-session crawl-pattern analysis.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlPattern {
    pub pattern_type: PatternType,
    pub confidence: f64,
    /// Up to 10 evenly-strided representative paths, for diagnostics.
    pub sample_paths: Vec<String>,
    pub indicators: PatternIndicators,
}

impl CrawlPattern {
    /// Zero-valued default for an empty session.
    pub fn empty() -> Self {
        Self {
            pattern_type: PatternType::Random,
            confidence: 0.0,
            sample_paths: Vec::new(),
            indicators: PatternIndicators {
                sequential_score: 0.0,
                systematic_score: 0.0,
                sitemap_access: false,
                depth_consistency: 0.0,
            },
        }
    }
}

/// Boolean browsing cues feeding the human-likeness score.
#[derive(Debug, Clone, Serialize)]
pub struct BehaviorPatterns {
    pub views_homepage: bool,
    pub varying_response_times: bool,
    pub realistic_session_length: bool,
}

/// Per-session human-likeness analysis.
#[derive(Debug, Clone, Serialize)]
pub struct SessionBehavior {
    pub session_duration_ms: f64,
    pub pages_viewed: usize,
    pub avg_time_per_page_ms: f64,
    pub assets_loaded: bool,
    pub has_referer: bool,
    /// 0 = certainly automated, 1 = certainly human.
    pub human_score: f64,
    pub patterns: BehaviorPatterns,
}

/// The fixed-shape record the fusion step consumes: one concrete result per
/// analyzer, with signature absence made explicit.
#[derive(Debug, Clone)]
pub struct SessionAnalyses {
    pub velocity: VelocityAnalysis,
    pub pattern: CrawlPattern,
    pub behavior: SessionBehavior,
    pub signature: Option<BotClassification>,
}

/// Inclusive time window covered by a batch or session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Deterministic placeholder for empty batches: the Unix epoch.
    pub fn epoch() -> Self {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_else(Utc::now);
        Self { start: epoch, end: epoch }
    }
}

/// One classified requester that survived the confidence filter.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub ip: String,
    pub user_agent: String,
    pub classification: BotClassification,
    pub request_count: usize,
    pub total_bandwidth: u64,
    pub time_range: TimeRange,
    /// Id of the identity's first gap-split session; the pipeline uses it
    /// to re-attach verdicts onto individual rows.
    pub session_id: String,
    pub velocity: VelocityAnalysis,
    pub pattern: CrawlPattern,
    pub behavior: SessionBehavior,
}

/// Batch-level traffic totals. The bot/human split is at session-request
/// granularity: `bot_requests` sums `request_count` over surviving
/// detections and `human_requests` is the remainder.
#[derive(Debug, Clone, Serialize)]
pub struct TrafficSummary {
    pub total_requests: usize,
    pub bot_requests: usize,
    pub human_requests: usize,
    pub total_bandwidth: u64,
    pub time_range: TimeRange,
}

/// Request and bandwidth totals for one aggregation bucket.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CategoryAggregate {
    pub requests: usize,
    pub bandwidth: u64,
}

/// One row of the top-offenders table.
#[derive(Debug, Clone, Serialize)]
pub struct TopOffender {
    pub ip: String,
    pub bot_name: Option<String>,
    pub category: BotCategory,
    pub requests: usize,
    pub bandwidth: u64,
}

/// Roll-ups over the surviving detections. BTreeMaps keep serialized
/// output stable across runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Aggregations {
    pub by_category: BTreeMap<String, CategoryAggregate>,
    pub by_impact: BTreeMap<String, CategoryAggregate>,
    /// Top 10 detections by bandwidth, descending.
    pub top_offenders: Vec<TopOffender>,
}

/// Complete output of one classification pass.
#[derive(Debug, Clone, Serialize)]
pub struct BotAnalysis {
    pub summary: TrafficSummary,
    pub bots: Vec<DetectionResult>,
    pub aggregations: Aggregations,
}

impl BotAnalysis {
    /// Well-formed zero-valued result for an empty batch.
    pub fn empty() -> Self {
        Self {
            summary: TrafficSummary {
                total_requests: 0,
                bot_requests: 0,
                human_requests: 0,
                total_bandwidth: 0,
                time_range: TimeRange::epoch(),
            },
            bots: Vec::new(),
            aggregations: Aggregations::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parsing_covers_legacy_names() {
        assert_eq!(BotCategory::from_str_name("search_engine"), BotCategory::Beneficial);
        assert_eq!(BotCategory::from_str_name("ai_training"), BotCategory::Extractive);
        assert_eq!(BotCategory::from_str_name("seo_tool"), BotCategory::Malicious);
        assert_eq!(BotCategory::from_str_name("something_new"), BotCategory::Unknown);
    }

    #[test]
    fn impact_parsing_maps_critical_to_extreme() {
        assert_eq!(Impact::from_str_name("critical"), Impact::Extreme);
        assert_eq!(Impact::from_str_name("bogus"), Impact::Low);
    }

    #[test]
    fn impact_ordering_matches_severity() {
        assert!(Impact::Extreme > Impact::High);
        assert!(Impact::High > Impact::Medium);
        assert!(Impact::Medium > Impact::Low);
    }

    #[test]
    fn empty_analysis_has_a_valid_time_range() {
        let analysis = BotAnalysis::empty();
        assert_eq!(analysis.summary.total_requests, 0);
        assert!(analysis.summary.time_range.start <= analysis.summary.time_range.end);
    }
}
