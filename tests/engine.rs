//! Integration tests for the botscope detection engine.
//!
//! These exercise the public `Engine` facade end to end: session grouping,
//! the four analyzers, fusion, chunked processing, and verdict
//! re-attachment.

use botscope::{
    BotCategory, Engine, EngineConfig, Impact, LogEntry, NoopMonitor, SignatureRegistry,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::Rng;
use std::sync::Arc;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn entry(ts: DateTime<Utc>, ip: &str, ua: &str, path: &str) -> LogEntry {
    let mut e = LogEntry::new(ts);
    e.ip = Some(ip.to_string());
    e.user_agent = Some(ua.to_string());
    e.path = Some(path.to_string());
    e.bytes_transferred = 512;
    e
}

async fn engine() -> Engine {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    Engine::with_registry(EngineConfig::default(), SignatureRegistry::builtin())
}

/// Machine-cadence traffic from a verified Googlebot address.
fn verified_crawler_batch() -> Vec<LogEntry> {
    (0..30)
        .map(|i| {
            entry(
                base() + Duration::milliseconds(i * 40),
                "66.249.66.1",
                "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
                &format!("/page/{i}"),
            )
        })
        .collect()
}

/// A short human browsing session with organic texture.
fn human_batch() -> Vec<LogEntry> {
    let visits = [
        (0, "/"),
        (17, "/products"),
        (43, "/products/chairs"),
        (128, "/style.css"),
        (150, "/logo.png"),
    ];
    visits
        .iter()
        .enumerate()
        .map(|(i, &(offset, path))| {
            let mut e = entry(
                base() + Duration::seconds(offset),
                "203.0.113.9",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
                path,
            );
            e.referer = Some("https://news.example/review".to_string());
            e.response_time_ms = Some(80.0 + i as f64 * 45.0);
            e
        })
        .collect()
}

// =============================================================================
// End-to-end classification
// =============================================================================

#[tokio::test]
async fn verified_crawler_is_detected_with_high_confidence() {
    let out = engine().await.analyze(verified_crawler_batch(), "site-1").await.unwrap();

    assert_eq!(out.analysis.bots.len(), 1);
    let bot = &out.analysis.bots[0];
    assert_eq!(bot.classification.bot_name.as_deref(), Some("Googlebot"));
    assert_eq!(bot.classification.category, BotCategory::Beneficial);
    assert!(bot.classification.verified);
    assert!(bot.classification.confidence >= 0.9);
    assert_eq!(out.analysis.summary.bot_requests, 30);
    assert_eq!(out.analysis.summary.human_requests, 0);
}

#[tokio::test]
async fn human_browsing_produces_no_detections() {
    let out = engine().await.analyze(human_batch(), "site-1").await.unwrap();

    assert!(out.analysis.bots.is_empty());
    assert_eq!(out.analysis.summary.human_requests, 5);
    assert!(out.entries.iter().all(|r| !r.is_bot));
}

#[tokio::test]
async fn spoofed_signature_is_not_verified() {
    // GPTBot UA from an address outside any declared range.
    let entries: Vec<LogEntry> = (0..20)
        .map(|i| {
            entry(
                base() + Duration::seconds(i * 2),
                "1.2.3.4",
                "Mozilla/5.0 AppleWebKit/537.36 (compatible; GPTBot/1.0; +https://openai.com/gptbot)",
                &format!("/article/{i}"),
            )
        })
        .collect();
    let out = engine().await.analyze(entries, "site-1").await.unwrap();

    assert_eq!(out.analysis.bots.len(), 1);
    let bot = &out.analysis.bots[0];
    assert_eq!(bot.classification.bot_name.as_deref(), Some("GPTBot"));
    assert!(!bot.classification.verified);
    assert!(bot.classification.confidence < 0.9);
}

#[tokio::test]
async fn unsigned_scraper_is_caught_by_velocity_and_pattern() {
    // No recognizable UA, but machine cadence over an enumerated path space.
    let entries: Vec<LogEntry> = (0..60)
        .map(|i| {
            entry(
                base() + Duration::milliseconds(i * 30),
                "45.33.12.8",
                "CustomFetcher",
                &format!("/item/{i}"),
            )
        })
        .collect();
    let out = engine().await.analyze(entries, "site-1").await.unwrap();

    assert_eq!(out.analysis.bots.len(), 1);
    let bot = &out.analysis.bots[0];
    assert_eq!(bot.classification.bot_name.as_deref(), Some("Aggressive Bot"));
    assert_eq!(bot.classification.category, BotCategory::Malicious);
    assert_eq!(bot.classification.impact, Impact::Extreme);
    assert!(bot.velocity.is_bot);
    assert!(bot.pattern.indicators.sequential_score > 0.9);
    assert!(!bot.classification.verified);
}

#[tokio::test]
async fn mixed_batch_separates_bots_from_humans() {
    let mut entries = verified_crawler_batch();
    entries.extend(human_batch());
    let out = engine().await.analyze(entries, "site-1").await.unwrap();

    assert_eq!(out.analysis.summary.total_requests, 35);
    assert_eq!(out.analysis.summary.bot_requests, 30);
    assert_eq!(out.analysis.summary.human_requests, 5);

    let bot_rows = out.entries.iter().filter(|r| r.is_bot).count();
    assert_eq!(bot_rows, 30);
    assert!(out
        .entries
        .iter()
        .filter(|r| !r.is_bot)
        .all(|r| r.entry.ip.as_deref() == Some("203.0.113.9")));
}

// =============================================================================
// Aggregations
// =============================================================================

#[tokio::test]
async fn aggregations_bucket_by_category_and_impact() {
    let out = engine().await.analyze(verified_crawler_batch(), "site-1").await.unwrap();

    let by_category = &out.analysis.aggregations.by_category;
    assert_eq!(by_category.get("beneficial").map(|a| a.requests), Some(30));
    assert_eq!(out.analysis.aggregations.top_offenders.len(), 1);
    assert_eq!(out.analysis.aggregations.top_offenders[0].ip, "66.249.66.1");
}

// =============================================================================
// Pipeline behavior
// =============================================================================

#[tokio::test]
async fn empty_batch_is_a_valid_result() {
    let out = engine().await.analyze(Vec::new(), "site-1").await.unwrap();

    assert_eq!(out.analysis.summary.total_requests, 0);
    assert_eq!(out.analysis.summary.total_bandwidth, 0);
    assert!(out.analysis.bots.is_empty());
    assert!(out.entries.is_empty());
}

#[tokio::test]
async fn empty_identity_key_is_an_error() {
    assert!(engine().await.analyze(Vec::new(), "").await.is_err());
}

#[tokio::test]
async fn chunk_boundaries_do_not_change_the_verdict() {
    let mut small_chunks = EngineConfig::default();
    small_chunks.chunking.chunk_size = 4;
    small_chunks.chunking.max_concurrent_chunks = 2;

    let one_chunk = engine()
        .await
        .analyze(verified_crawler_batch(), "site-1")
        .await
        .unwrap();
    let many_chunks = Engine::with_registry(small_chunks, SignatureRegistry::builtin())
        .with_monitor(Arc::new(NoopMonitor))
        .analyze(verified_crawler_batch(), "site-1")
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_string(&one_chunk.analysis).unwrap(),
        serde_json::to_string(&many_chunks.analysis).unwrap()
    );
}

#[tokio::test]
async fn repeated_runs_are_bit_identical() {
    let eng = engine().await;
    let mut entries = verified_crawler_batch();
    entries.extend(human_batch());

    let first = eng.analyze(entries.clone(), "site-1").await.unwrap();
    let second = eng.analyze(entries, "site-1").await.unwrap();

    assert_eq!(
        serde_json::to_string(&first.analysis).unwrap(),
        serde_json::to_string(&second.analysis).unwrap()
    );
}

#[tokio::test]
async fn every_filtered_row_appears_exactly_once_in_the_output() {
    let mut entries = verified_crawler_batch();
    entries.extend(human_batch());
    let expected = entries.len();

    let out = engine().await.analyze(entries, "site-1").await.unwrap();
    assert_eq!(out.entries.len(), expected);
    assert!(out.entries.iter().all(|r| r.session_id.is_some()));
}

#[tokio::test]
async fn concurrent_registry_loads_do_not_duplicate_entries() {
    let path = std::env::temp_dir().join("botscope-engine-catalog.json");
    tokio::fs::write(
        &path,
        r#"[
            {"name":"AlphaBot","category":"extractive","patterns":["alphabot"],"impact":"low"},
            {"name":"BetaBot","category":"malicious","patterns":["betabot"],"impact":"high"}
        ]"#,
    )
    .await
    .unwrap();
    let path_str = path.to_str().unwrap().to_string();

    let once = SignatureRegistry::load(&path_str).await;
    assert_eq!(once.len(), 2);

    let a = tokio::spawn({
        let p = path_str.clone();
        async move { SignatureRegistry::load(&p).await }
    });
    let b = tokio::spawn({
        let p = path_str.clone();
        async move { SignatureRegistry::load(&p).await }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(a.len(), once.len());
    assert_eq!(b.len(), once.len());
    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn concurrent_engines_share_a_registry() {
    let registry = SignatureRegistry::builtin();
    let a = tokio::spawn({
        let registry = registry.clone();
        async move {
            Engine::with_registry(EngineConfig::default(), registry)
                .analyze(verified_crawler_batch(), "site-1")
                .await
                .unwrap()
        }
    });
    let b = tokio::spawn({
        let registry = registry.clone();
        async move {
            Engine::with_registry(EngineConfig::default(), registry)
                .analyze(verified_crawler_batch(), "site-2")
                .await
                .unwrap()
        }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert_eq!(a.analysis.bots.len(), b.analysis.bots.len());
}

// =============================================================================
// Confidence bounds under randomized input
// =============================================================================

#[tokio::test]
async fn confidences_stay_in_bounds_on_random_traffic() {
    let mut rng = rand::rng();
    let uas = [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64)",
        "Googlebot/2.1",
        "python-requests/2.31.0",
        "curl/8.4.0",
        "SomethingElse",
    ];
    let mut entries = Vec::new();
    for i in 0..400 {
        let mut e = entry(
            base() + Duration::milliseconds(rng.random_range(0..3_600_000)),
            &format!("10.0.{}.{}", rng.random_range(0..4), rng.random_range(1..255)),
            uas[rng.random_range(0..uas.len())],
            &format!("/page/{}", i % 37),
        );
        if rng.random_bool(0.3) {
            e.referer = Some("https://example.com/".to_string());
        }
        entries.push(e);
    }

    let out = engine().await.analyze(entries, "site-1").await.unwrap();
    for bot in &out.analysis.bots {
        assert!(bot.classification.confidence > 0.0);
        assert!(bot.classification.confidence <= 1.0);
        assert!(bot.velocity.confidence <= 1.0);
        assert!(bot.pattern.confidence <= 1.0);
        assert!((0.0..=1.0).contains(&bot.behavior.human_score));
    }
    assert_eq!(
        out.analysis.summary.bot_requests + out.analysis.summary.human_requests,
        out.analysis.summary.total_requests
    );
}
