use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::analysis::classifier::Classifier;
use crate::config::settings::ChunkingConfig;
use crate::models::classification::{BotAnalysis, DetectionResult};
use crate::models::entry::{AnnotatedEntry, LogEntry};

use super::monitor::{NoopMonitor, ResourceMonitor};

/// Snapshot handed to the progress callback after each chunk wave.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    /// Entries normalized so far.
    pub processed: usize,
    /// Entries in the filtered batch.
    pub total: usize,
    /// Index of the chunk that just finished.
    pub chunk_index: usize,
    /// Estimated remaining time, extrapolated from throughput so far.
    pub eta_ms: u64,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Bookkeeping for one pipeline run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProcessingStats {
    pub entries_in: usize,
    pub entries_after_filter: usize,
    pub chunk_count: usize,
    pub elapsed_ms: u64,
}

/// Full result of a pipeline run: the batch analysis plus every input row
/// (post-filter) with its verdict re-attached.
pub struct AnalysisOutput {
    pub analysis: BotAnalysis,
    pub entries: Vec<AnnotatedEntry>,
    pub stats: ProcessingStats,
}

/// Chunked, bounded-concurrency front end over the classifier.
///
/// Normalization is the parallel part; classification itself runs once over
/// the reassembled batch so sessions spanning chunk boundaries are never
/// split. Given the same input the output analysis is bit-identical across
/// runs.
pub struct LogProcessor {
    classifier: Arc<Classifier>,
    chunking: ChunkingConfig,
    monitor: Arc<dyn ResourceMonitor>,
    progress: Option<ProgressCallback>,
}

impl LogProcessor {
    pub fn new(classifier: Arc<Classifier>, chunking: ChunkingConfig) -> Self {
        Self {
            classifier,
            chunking,
            monitor: Arc::new(NoopMonitor),
            progress: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Analyze a batch, keeping only entries inside the recency window.
    ///
    /// The window is anchored to the newest timestamp in the batch rather
    /// than the wall clock, so replaying the same batch yields the same
    /// result. `identity_key` names the log source (site, property) and
    /// must be non-empty.
    pub async fn analyze(
        &self,
        entries: Vec<LogEntry>,
        identity_key: &str,
    ) -> Result<AnalysisOutput> {
        if identity_key.trim().is_empty() {
            bail!("identity key must not be empty");
        }
        let entries_in = entries.len();

        let filtered = match entries.iter().map(|e| e.timestamp).max() {
            Some(newest) => {
                let cutoff = newest - ChronoDuration::hours(self.chunking.recency_window_hours);
                entries
                    .into_iter()
                    .filter(|e| e.timestamp >= cutoff)
                    .collect()
            }
            None => Vec::new(),
        };

        debug!(
            identity = %identity_key,
            entries_in,
            entries_after_filter = filtered.len(),
            "Starting analysis"
        );
        self.run(filtered, entries_in).await
    }

    /// Analyze only the entries whose timestamps fall inside `[start, end]`.
    pub async fn analyze_time_range(
        &self,
        entries: Vec<LogEntry>,
        identity_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AnalysisOutput> {
        if identity_key.trim().is_empty() {
            bail!("identity key must not be empty");
        }
        let entries_in = entries.len();
        let filtered: Vec<LogEntry> = entries
            .into_iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .collect();
        self.run(filtered, entries_in).await
    }

    async fn run(&self, filtered: Vec<LogEntry>, entries_in: usize) -> Result<AnalysisOutput> {
        let started = Instant::now();
        let total = filtered.len();

        if filtered.is_empty() {
            return Ok(AnalysisOutput {
                analysis: BotAnalysis::empty(),
                entries: Vec::new(),
                stats: ProcessingStats {
                    entries_in,
                    entries_after_filter: 0,
                    chunk_count: 0,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                },
            });
        }

        let chunk_size = self.chunking.chunk_size.max(1);
        let concurrency = self.chunking.max_concurrent_chunks.max(1);
        let chunks: Vec<Vec<LogEntry>> = filtered
            .chunks(chunk_size)
            .map(|c| c.to_vec())
            .collect();
        let chunk_count = chunks.len();
        drop(filtered);

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut normalized: Vec<LogEntry> = Vec::with_capacity(total);
        let mut processed = 0usize;

        // One wave of at most `concurrency` chunks at a time. The memory
        // check gates each wave, and reassembly sorts by chunk index so the
        // classifier always sees the original order.
        let mut pending = chunks.into_iter().enumerate().peekable();
        while pending.peek().is_some() {
            self.wait_for_memory().await;

            let mut handles = Vec::with_capacity(concurrency);
            for _ in 0..concurrency {
                let Some((index, chunk)) = pending.next() else {
                    break;
                };
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .context("chunk semaphore closed")?;
                handles.push(tokio::spawn(async move {
                    let out = normalize_chunk(chunk);
                    drop(permit);
                    (index, out)
                }));
            }

            let mut wave: Vec<(usize, Vec<LogEntry>)> = Vec::with_capacity(handles.len());
            for joined in join_all(handles).await {
                wave.push(joined.context("chunk normalization task failed")?);
            }
            wave.sort_by_key(|(index, _)| *index);

            for (index, chunk) in wave {
                processed += chunk.len();
                self.report_progress(processed, total, index, &started);
                normalized.extend(chunk);
            }
        }

        let outcome = self.classifier.classify_batch(&normalized);

        // Re-attach verdicts: every row gets its gap-session id, and rows
        // whose session produced a surviving detection get the bot verdict.
        let mut annotated: Vec<AnnotatedEntry> = normalized
            .into_iter()
            .map(AnnotatedEntry::unclassified)
            .collect();
        for session in &outcome.sessions {
            for &row in &session.indices {
                annotated[row].session_id = Some(session.id.clone());
            }
        }
        let verdicts: HashMap<&str, &DetectionResult> = outcome
            .analysis
            .bots
            .iter()
            .map(|b| (b.session_id.as_str(), b))
            .collect();
        for row in annotated.iter_mut() {
            let Some(session_id) = row.session_id.as_deref() else {
                continue;
            };
            if let Some(detection) = verdicts.get(session_id) {
                row.is_bot = true;
                row.bot_name = detection.classification.bot_name.clone();
                row.bot_category = Some(detection.classification.category);
            }
        }

        let stats = ProcessingStats {
            entries_in,
            entries_after_filter: total,
            chunk_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            entries = total,
            chunks = chunk_count,
            bots = outcome.analysis.bots.len(),
            elapsed_ms = stats.elapsed_ms,
            "Analysis complete"
        );

        Ok(AnalysisOutput {
            analysis: outcome.analysis,
            entries: annotated,
            stats,
        })
    }

    /// Advisory backpressure: while usage sits above the ceiling, ask for
    /// reclaim and wait, up to the configured bound. Never fails the run.
    async fn wait_for_memory(&self) {
        let ceiling = self.chunking.memory_ceiling_bytes;
        if ceiling == 0 {
            return;
        }
        let mut waited_ms = 0u64;
        while self.monitor.current_usage() > ceiling {
            if waited_ms >= self.chunking.max_reclaim_wait_ms {
                warn!(
                    usage = self.monitor.current_usage(),
                    ceiling, "Memory still above ceiling after reclaim wait, continuing"
                );
                return;
            }
            self.monitor.request_reclaim();
            sleep(Duration::from_millis(100)).await;
            waited_ms += 100;
        }
    }

    fn report_progress(&self, processed: usize, total: usize, chunk_index: usize, started: &Instant) {
        let Some(callback) = &self.progress else {
            return;
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let eta_ms = if processed > 0 {
            elapsed_ms.saturating_mul((total - processed) as u64) / processed as u64
        } else {
            0
        };
        callback(ProgressUpdate {
            processed,
            total,
            chunk_index,
            eta_ms,
        });
    }
}

/// Per-entry cleanup applied before classification. Cheap and purely local,
/// which is what makes chunk-parallelism safe.
fn normalize_chunk(chunk: Vec<LogEntry>) -> Vec<LogEntry> {
    chunk
        .into_iter()
        .map(|mut entry| {
            if let Some(path) = entry.path.take() {
                let trimmed = path.trim();
                // Fragments never reach servers in real traffic; strip them
                // from synthetic or replayed logs so path analysis sees the
                // same shape either way.
                let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
                if !without_fragment.is_empty() {
                    entry.path = Some(without_fragment.to_string());
                }
            }
            if let Some(method) = entry.method.take() {
                let cleaned = method.trim().to_ascii_uppercase();
                if !cleaned.is_empty() {
                    entry.method = Some(cleaned);
                }
            }
            if entry.response_time_ms.map_or(false, |ms| ms < 0.0) {
                entry.response_time_ms = None;
            }
            entry
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::EngineConfig;
    use crate::signatures::matcher::SignatureMatcher;
    use crate::signatures::registry::SignatureRegistry;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn processor(config: &EngineConfig) -> LogProcessor {
        let matcher = Arc::new(SignatureMatcher::new(SignatureRegistry::builtin()));
        let classifier = Arc::new(Classifier::new(config, matcher));
        LogProcessor::new(classifier, config.chunking.clone())
    }

    fn entry(ts: DateTime<Utc>, ip: &str, ua: &str, path: &str) -> LogEntry {
        let mut e = LogEntry::new(ts);
        e.ip = Some(ip.to_string());
        e.user_agent = Some(ua.to_string());
        e.path = Some(path.to_string());
        e
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn empty_identity_key_is_rejected() {
        let config = EngineConfig::default();
        let p = processor(&config);
        assert!(p.analyze(Vec::new(), "").await.is_err());
        assert!(p.analyze(Vec::new(), "   ").await.is_err());
    }

    #[tokio::test]
    async fn empty_batch_yields_empty_analysis() {
        let config = EngineConfig::default();
        let p = processor(&config);
        let out = p.analyze(Vec::new(), "site-1").await.unwrap();
        assert_eq!(out.analysis.summary.total_requests, 0);
        assert!(out.entries.is_empty());
        assert_eq!(out.stats.chunk_count, 0);
    }

    #[tokio::test]
    async fn recency_filter_is_anchored_to_newest_entry() {
        let config = EngineConfig::default();
        let p = processor(&config);
        let newest = base();
        let stale = newest - ChronoDuration::hours(72);
        let entries = vec![
            entry(stale, "10.0.0.1", "Mozilla/5.0", "/old"),
            entry(newest, "10.0.0.1", "Mozilla/5.0", "/new"),
        ];
        let out = p.analyze(entries, "site-1").await.unwrap();
        assert_eq!(out.stats.entries_in, 2);
        assert_eq!(out.stats.entries_after_filter, 1);
        assert_eq!(out.entries.len(), 1);
        assert_eq!(out.entries[0].entry.path.as_deref(), Some("/new"));
    }

    #[tokio::test]
    async fn time_range_filter_is_inclusive() {
        let config = EngineConfig::default();
        let p = processor(&config);
        let start = base();
        let end = base() + ChronoDuration::minutes(10);
        let entries = vec![
            entry(start - ChronoDuration::seconds(1), "10.0.0.1", "ua", "/a"),
            entry(start, "10.0.0.1", "ua", "/b"),
            entry(end, "10.0.0.1", "ua", "/c"),
            entry(end + ChronoDuration::seconds(1), "10.0.0.1", "ua", "/d"),
        ];
        let out = p
            .analyze_time_range(entries, "site-1", start, end)
            .await
            .unwrap();
        assert_eq!(out.stats.entries_after_filter, 2);
    }

    #[tokio::test]
    async fn chunking_preserves_order_and_every_row() {
        let mut config = EngineConfig::default();
        config.chunking.chunk_size = 7;
        config.chunking.max_concurrent_chunks = 2;
        let p = processor(&config);

        let mut entries = Vec::new();
        for i in 0..50 {
            entries.push(entry(
                base() + ChronoDuration::seconds(i),
                "10.0.0.1",
                "Mozilla/5.0",
                &format!("/row/{i}"),
            ));
        }
        let out = p.analyze(entries, "site-1").await.unwrap();
        assert_eq!(out.entries.len(), 50);
        assert_eq!(out.stats.chunk_count, 8);
        for (i, row) in out.entries.iter().enumerate() {
            assert_eq!(row.entry.path.as_deref(), Some(format!("/row/{i}").as_str()));
        }
    }

    #[tokio::test]
    async fn bot_verdicts_are_reattached_to_rows() {
        let config = EngineConfig::default();
        let p = processor(&config);

        // Verified Googlebot alongside one quiet human row.
        let mut entries = Vec::new();
        for i in 0..20 {
            let mut e = entry(
                base() + ChronoDuration::milliseconds(i * 40),
                "66.249.66.1",
                "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
                &format!("/page/{i}"),
            );
            e.bytes_transferred = 1000;
            entries.push(e);
        }
        let mut human = entry(base(), "203.0.113.9", "Mozilla/5.0 (Macintosh)", "/");
        human.referer = Some("https://news.example/".to_string());
        entries.push(human);

        let out = p.analyze(entries, "site-1").await.unwrap();
        let bot_rows = out.entries.iter().filter(|r| r.is_bot).count();
        assert_eq!(bot_rows, 20);
        assert!(out
            .entries
            .iter()
            .filter(|r| r.is_bot)
            .all(|r| r.bot_name.as_deref() == Some("Googlebot")));
        let human_row = out.entries.last().unwrap();
        assert!(!human_row.is_bot);
        assert!(human_row.session_id.is_some());
    }

    #[tokio::test]
    async fn progress_callback_reports_monotonic_counts() {
        let mut config = EngineConfig::default();
        config.chunking.chunk_size = 10;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let p = processor(&config).with_progress(Arc::new(move |u: ProgressUpdate| {
            sink.lock().unwrap().push((u.processed, u.total));
        }));

        let entries: Vec<LogEntry> = (0..35)
            .map(|i| entry(base() + ChronoDuration::seconds(i), "10.0.0.1", "ua", "/x"))
            .collect();
        p.analyze(entries, "site-1").await.unwrap();

        let updates = seen.lock().unwrap();
        assert_eq!(updates.len(), 4);
        assert_eq!(updates.last(), Some(&(35, 35)));
        assert!(updates.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[tokio::test]
    async fn memory_pressure_triggers_reclaim_then_proceeds() {
        struct FakeMonitor {
            usage: AtomicU64,
            reclaims: AtomicUsize,
        }
        impl ResourceMonitor for FakeMonitor {
            fn current_usage(&self) -> u64 {
                self.usage.load(Ordering::SeqCst)
            }
            fn request_reclaim(&self) {
                self.reclaims.fetch_add(1, Ordering::SeqCst);
                self.usage.store(0, Ordering::SeqCst);
            }
        }

        let mut config = EngineConfig::default();
        config.chunking.memory_ceiling_bytes = 1024;
        let monitor = Arc::new(FakeMonitor {
            usage: AtomicU64::new(4096),
            reclaims: AtomicUsize::new(0),
        });
        let p = processor(&config).with_monitor(monitor.clone());

        let entries = vec![entry(base(), "10.0.0.1", "ua", "/")];
        let out = p.analyze(entries, "site-1").await.unwrap();
        assert_eq!(out.entries.len(), 1);
        assert_eq!(monitor.reclaims.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn normalization_cleans_paths_and_methods() {
        let mut e = entry(base(), "10.0.0.1", "ua", "  /docs/page#section  ");
        e.method = Some(" get ".to_string());
        e.response_time_ms = Some(-5.0);
        let cleaned = normalize_chunk(vec![e]);
        assert_eq!(cleaned[0].path.as_deref(), Some("/docs/page"));
        assert_eq!(cleaned[0].method.as_deref(), Some("GET"));
        assert!(cleaned[0].response_time_ms.is_none());
    }
}
