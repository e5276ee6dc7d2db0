//! botscope detects and classifies automated traffic in HTTP access logs.
//!
//! The engine groups log entries into per-requester sessions, runs four
//! independent analyzers over each (request velocity, crawl-path patterns,
//! session behavior, and signature matching with IP-range verification),
//! and fuses their verdicts into weighted classifications. Batches of any
//! size are processed in bounded-concurrency chunks, and every result is
//! deterministic for a given input.
//!
//! ```no_run
//! use botscope::{Engine, EngineConfig, LogEntry};
//!
//! # async fn run(entries: Vec<LogEntry>) -> anyhow::Result<()> {
//! let engine = Engine::new(EngineConfig::default()).await;
//! let output = engine.analyze(entries, "site-1").await?;
//! println!(
//!     "{} of {} requests were bots",
//!     output.analysis.summary.bot_requests,
//!     output.analysis.summary.total_requests
//! );
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod signatures;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use analysis::classifier::Classifier;
use pipeline::processor::LogProcessor;
use signatures::matcher::SignatureMatcher;

pub use config::settings::EngineConfig;
pub use models::classification::{
    BotAnalysis, BotCategory, BotClassification, DetectionResult, Impact, PatternType,
    TrafficSummary,
};
pub use models::entry::{AnnotatedEntry, LogEntry};
pub use pipeline::monitor::{NoopMonitor, ResourceMonitor};
pub use pipeline::processor::{AnalysisOutput, ProcessingStats, ProgressCallback, ProgressUpdate};
pub use signatures::registry::SignatureRegistry;

/// Facade wiring the signature registry, classifier, and chunked pipeline
/// together. Construct once and share; analysis itself takes `&self`.
pub struct Engine {
    processor: LogProcessor,
}

impl Engine {
    /// Build an engine from configuration, loading the signature catalog
    /// from `config.signatures.catalog_path` (built-ins when empty or
    /// unreadable).
    pub async fn new(config: EngineConfig) -> Self {
        let registry = SignatureRegistry::load(&config.signatures.catalog_path).await;
        Self::with_registry(config, registry)
    }

    /// Build an engine around an already-loaded signature registry.
    pub fn with_registry(config: EngineConfig, registry: Arc<SignatureRegistry>) -> Self {
        let matcher = Arc::new(SignatureMatcher::new(registry));
        let classifier = Arc::new(Classifier::new(&config, matcher));
        Self {
            processor: LogProcessor::new(classifier, config.chunking.clone()),
        }
    }

    /// Replace the default no-op resource monitor.
    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.processor = self.processor.with_monitor(monitor);
        self
    }

    /// Register a progress callback invoked after each processed chunk.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.processor = self.processor.with_progress(callback);
        self
    }

    /// Analyze a batch of log entries for the named log source, applying
    /// the configured recency window.
    pub async fn analyze(
        &self,
        entries: Vec<LogEntry>,
        identity_key: &str,
    ) -> Result<AnalysisOutput> {
        self.processor.analyze(entries, identity_key).await
    }

    /// Analyze only the entries inside `[start, end]`.
    pub async fn analyze_time_range(
        &self,
        entries: Vec<LogEntry>,
        identity_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AnalysisOutput> {
        self.processor
            .analyze_time_range(entries, identity_key, start, end)
            .await
    }
}
