use std::collections::HashMap;

use tracing::debug;

use crate::config::settings::VelocityConfig;
use crate::models::classification::VelocityAnalysis;
use crate::models::entry::LogEntry;

/// Detects automation from request cadence alone, independent of path
/// content. Velocity is evaluated per IP pooled across sessions, because
/// bursts often span multiple user-agents from the same source.
pub struct VelocityAnalyzer {
    config: VelocityConfig,
}

impl VelocityAnalyzer {
    pub fn new(config: VelocityConfig) -> Self {
        Self { config }
    }

    /// Analyze every IP in the batch. Returned map is keyed by the
    /// defaulted IP string ("unknown" pools the anonymous entries).
    pub fn analyze_batch(&self, entries: &[LogEntry]) -> HashMap<String, VelocityAnalysis> {
        let mut by_ip: HashMap<String, Vec<i64>> = HashMap::new();
        for entry in entries {
            by_ip
                .entry(entry.ip_key().to_string())
                .or_default()
                .push(entry.timestamp.timestamp_millis());
        }

        by_ip
            .into_iter()
            .map(|(ip, mut stamps)| {
                stamps.sort_unstable();
                let analysis = self.analyze_timestamps(&stamps);
                debug!(
                    ip = %ip,
                    rps = analysis.requests_per_second,
                    burst = analysis.burst_score,
                    is_bot = analysis.is_bot,
                    "Velocity analysis complete"
                );
                (ip, analysis)
            })
            .collect()
    }

    /// Analyze one IP's sorted timestamps (milliseconds since epoch).
    /// Degenerate inputs (0 or 1 observations) return the zero-valued
    /// low-confidence default rather than erroring.
    pub fn analyze_timestamps(&self, stamps: &[i64]) -> VelocityAnalysis {
        if stamps.len() < 2 {
            return VelocityAnalysis::insufficient();
        }

        let count = stamps.len() as f64;
        let span_ms = (stamps[stamps.len() - 1] - stamps[0]) as f64;
        let span_secs = span_ms / 1000.0;

        let requests_per_second = if span_secs > 0.0 { count / span_secs } else { 0.0 };
        let requests_per_minute = if span_secs > 0.0 {
            count / (span_secs / 60.0)
        } else {
            0.0
        };

        let intervals: Vec<f64> = stamps
            .windows(2)
            .map(|w| (w[1] - w[0]) as f64)
            .collect();

        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        let variance = intervals
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / intervals.len() as f64;
        let cov = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };

        // Near-constant spacing is characteristic of scripted clients.
        let consistency_score = (1.0 - 2.0 * cov).max(0.0);

        let fast = intervals
            .iter()
            .filter(|&&iv| iv < self.config.min_interval_ms)
            .count();
        let speed_score = fast as f64 / intervals.len() as f64;

        let burst_pattern_score = Self::burst_pattern_score(&intervals);

        let burst_score = (0.4 * consistency_score + 0.4 * speed_score + 0.2 * burst_pattern_score)
            .clamp(0.0, 1.0);

        // Modal interval bucket at 100ms resolution: near-exact periodic
        // timing shows up as one dominant bucket.
        let modal_fraction = Self::modal_bucket_fraction(&intervals);

        let is_bot = requests_per_second > self.config.max_requests_per_second
            || requests_per_minute > self.config.max_requests_per_minute
            || burst_score > 0.8
            || speed_score > 0.5
            || modal_fraction > 0.7;

        let mut confidence: f64 = 0.5;
        if stamps.len() >= 10 {
            confidence += 0.2;
        }
        if stamps.len() >= 50 {
            confidence += 0.1;
        }
        if stamps.len() >= 100 {
            confidence += 0.1;
        }
        if span_secs >= 60.0 {
            confidence += 0.1;
        }
        if span_secs >= 300.0 {
            confidence += 0.1;
        }
        if cov < 0.1 {
            confidence += 0.1;
        } else if cov < 0.2 {
            confidence += 0.05;
        }

        VelocityAnalysis {
            requests_per_second,
            requests_per_minute,
            burst_score,
            is_bot,
            confidence: confidence.min(1.0),
        }
    }

    /// Runs of >= 3 consecutive sub-1000ms intervals, normalized by
    /// ceil(intervalCount / 10) and capped at 1.
    fn burst_pattern_score(intervals: &[f64]) -> f64 {
        let mut runs = 0usize;
        let mut run_len = 0usize;
        for &iv in intervals {
            if iv < 1000.0 {
                run_len += 1;
            } else {
                if run_len >= 3 {
                    runs += 1;
                }
                run_len = 0;
            }
        }
        if run_len >= 3 {
            runs += 1;
        }

        let denom = (intervals.len() + 9) / 10;
        if denom == 0 {
            return 0.0;
        }
        (runs as f64 / denom as f64).min(1.0)
    }

    /// Fraction of intervals falling into the single most common
    /// 100ms-rounded bucket.
    fn modal_bucket_fraction(intervals: &[f64]) -> f64 {
        if intervals.is_empty() {
            return 0.0;
        }
        let mut buckets: HashMap<i64, usize> = HashMap::new();
        for &iv in intervals {
            let bucket = (iv / 100.0).round() as i64;
            *buckets.entry(bucket).or_insert(0) += 1;
        }
        let max = buckets.values().copied().max().unwrap_or(0);
        max as f64 / intervals.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults;

    fn analyzer() -> VelocityAnalyzer {
        VelocityAnalyzer::new(defaults::default_velocity_config())
    }

    /// Evenly spaced timestamps: `count` stamps, `step_ms` apart.
    fn periodic(count: usize, step_ms: i64) -> Vec<i64> {
        (0..count as i64).map(|i| 1_700_000_000_000 + i * step_ms).collect()
    }

    #[test]
    fn degenerate_inputs_return_low_confidence_defaults() {
        let a = analyzer();
        let empty = a.analyze_timestamps(&[]);
        assert!(!empty.is_bot);
        assert_eq!(empty.requests_per_second, 0.0);

        let single = a.analyze_timestamps(&[1_700_000_000_000]);
        assert!(!single.is_bot);
        assert_eq!(single.burst_score, 0.0);
        assert!(single.confidence <= 0.5);
    }

    #[test]
    fn two_hundred_requests_in_one_second_is_a_bot() {
        let a = analyzer();
        let result = a.analyze_timestamps(&periodic(200, 5));
        assert!(result.is_bot);
        assert!(result.requests_per_second > 100.0);
        // 5ms spacing is below the 50ms machine-speed threshold.
        assert!(result.burst_score > 0.8);
    }

    #[test]
    fn exact_periodic_timing_trips_the_modal_bucket_check() {
        // 50 requests at exactly 200ms: rps just over 5, and every interval
        // lands in one 100ms bucket.
        let a = analyzer();
        let result = a.analyze_timestamps(&periodic(50, 200));
        assert!(result.is_bot);
        assert!(result.confidence >= 0.8);
    }

    #[test]
    fn slow_irregular_browsing_is_not_a_bot() {
        let a = analyzer();
        // A handful of requests spread over ten minutes with varying gaps.
        let stamps: Vec<i64> = [0, 43_000, 111_000, 207_000, 388_000, 601_000]
            .iter()
            .map(|s| 1_700_000_000_000 + s)
            .collect();
        let result = a.analyze_timestamps(&stamps);
        assert!(!result.is_bot);
        assert!(result.requests_per_second < 1.0);
    }

    #[test]
    fn increasing_rate_never_lowers_the_verdict() {
        let a = analyzer();
        let slow = a.analyze_timestamps(&periodic(20, 10_000));
        let fast = a.analyze_timestamps(&periodic(20, 100));
        assert!(!slow.is_bot || fast.is_bot);
        assert!(fast.is_bot);
    }

    #[test]
    fn scores_stay_in_unit_range() {
        let a = analyzer();
        for step in [1, 7, 50, 99, 1000, 60_000] {
            for count in [2, 5, 30, 120] {
                let r = a.analyze_timestamps(&periodic(count, step));
                assert!((0.0..=1.0).contains(&r.burst_score), "burst {}", r.burst_score);
                assert!((0.0..=1.0).contains(&r.confidence), "conf {}", r.confidence);
            }
        }
    }

    #[test]
    fn batch_analysis_pools_entries_per_ip() {
        use crate::models::entry::LogEntry;
        use chrono::TimeZone;
        use chrono::Utc;

        let mut entries = Vec::new();
        for i in 0..10 {
            let mut e = LogEntry::new(
                Utc.timestamp_millis_opt(1_700_000_000_000 + i * 100).unwrap(),
            );
            e.ip = Some("9.9.9.9".to_string());
            // Two different user-agents from the same source still pool.
            e.user_agent = Some(if i % 2 == 0 { "a" } else { "b" }.to_string());
            entries.push(e);
        }
        let map = analyzer().analyze_batch(&entries);
        assert_eq!(map.len(), 1);
        assert!(map["9.9.9.9"].is_bot);
    }
}
