use tracing::debug;

use crate::config::settings::SessionConfig;
use crate::models::classification::{BehaviorPatterns, SessionBehavior};
use crate::models::entry::LogEntry;

use super::session::Session;

/// Extensions a browser fetches as page assets.
const ASSET_EXTENSIONS: &[&str] = &[
    ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico", ".woff", ".woff2",
    ".ttf", ".eot", ".map",
];

/// Estimates how human a session's browsing pattern looks. Intentionally
/// overlaps in evidence with the velocity and pattern analyzers but weights
/// different cues: assets, referers, dwell time, session shape.
pub struct BehaviorAnalyzer {
    config: SessionConfig,
}

impl BehaviorAnalyzer {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Score one gap-split session. The session cap configured in
    /// `max_duration_hours` is a soft signal here, never a split boundary.
    pub fn analyze(&self, session: &Session) -> SessionBehavior {
        let entries = &session.entries;
        let pages = entries.len();
        let duration_ms = session.duration_ms();
        let duration_minutes = duration_ms / 60_000.0;

        let assets_loaded = entries.iter().any(|e| is_asset_path(e.path_str()));
        let has_referer = entries.iter().any(LogEntry::has_referer);
        let views_homepage = entries.iter().any(|e| {
            let bare = e.path_str().split('?').next().unwrap_or("");
            bare.is_empty() || bare == "/" || bare == "/index.html"
        });
        let varying_response_times = Self::varying_response_times(entries);

        // Human sessions run well short of the configured session cap; the
        // realistic upper bound is half of it (240 minutes at the 8h default).
        let max_realistic_minutes = (self.config.max_duration_hours * 60) as f64 / 2.0;
        let realistic_session_length =
            duration_minutes >= 1.0 && duration_minutes <= max_realistic_minutes;

        let avg_time_per_page_ms = if pages > 0 { duration_ms / pages as f64 } else { 0.0 };

        let mut score: f64 = 0.5;
        if assets_loaded {
            score += 0.15;
        }
        if has_referer {
            score += 0.10;
        }
        if views_homepage {
            score += 0.10;
        }
        if varying_response_times {
            score += 0.10;
        }
        if realistic_session_length {
            score += 0.10;
        }

        // Timing signals only mean something once there is more than one
        // page in the session.
        if pages >= 2 {
            let avg_secs = avg_time_per_page_ms / 1000.0;
            if (5.0..=300.0).contains(&avg_secs) {
                score += 0.10;
            } else if avg_secs < 1.0 {
                score -= 0.20;
            }

            if (2.0..=60.0).contains(&duration_minutes) {
                score += 0.10;
            } else if duration_minutes < 0.5 {
                score -= 0.20;
            }
        }

        if (3..=20).contains(&pages) {
            score += 0.05;
        } else if pages > 50 {
            score -= 0.15;
        }

        let human_score = score.clamp(0.0, 1.0);

        debug!(
            session = %session.id,
            pages = pages,
            human_score = human_score,
            "Behavior analysis complete"
        );

        SessionBehavior {
            session_duration_ms: duration_ms,
            pages_viewed: pages,
            avg_time_per_page_ms,
            assets_loaded,
            has_referer,
            human_score,
            patterns: BehaviorPatterns {
                views_homepage,
                varying_response_times,
                realistic_session_length,
            },
        }
    }

    /// Variance of response times above 100 (ms^2), with at least three
    /// samples. Uniform server timing suggests cached, scripted fetching.
    fn varying_response_times(entries: &[LogEntry]) -> bool {
        let samples: Vec<f64> = entries.iter().filter_map(|e| e.response_time_ms).collect();
        if samples.len() < 3 {
            return false;
        }
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance =
            samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / samples.len() as f64;
        variance > 100.0
    }
}

fn is_asset_path(path: &str) -> bool {
    let bare = path.split('?').next().unwrap_or(path);
    bare.contains("/assets/")
        || bare.contains("/static/")
        || ASSET_EXTENSIONS.iter().any(|ext| bare.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::session::group_sessions;
    use crate::config::defaults;
    use chrono::{TimeZone, Utc};

    fn analyzer() -> BehaviorAnalyzer {
        BehaviorAnalyzer::new(defaults::default_session_config())
    }

    fn entry(offset_secs: i64, path: &str) -> LogEntry {
        let mut e = LogEntry::new(Utc.timestamp_opt(1_700_000_000 + offset_secs, 0).unwrap());
        e.ip = Some("1.1.1.1".to_string());
        e.user_agent = Some("ua".to_string());
        e.path = Some(path.to_string());
        e
    }

    fn session_of(entries: Vec<LogEntry>) -> Session {
        let mut sessions = group_sessions(&entries, 30);
        assert_eq!(sessions.len(), 1);
        sessions.remove(0)
    }

    #[test]
    fn human_browsing_scores_high() {
        let mut entries = vec![
            entry(0, "/"),
            entry(2, "/assets/app.css"),
            entry(45, "/pricing"),
            entry(130, "/blog/launch"),
            entry(300, "/signup"),
        ];
        for (i, e) in entries.iter_mut().enumerate() {
            e.response_time_ms = Some(80.0 + (i as f64) * 37.0);
            e.referer = Some("https://example.com/".to_string());
        }
        let behavior = analyzer().analyze(&session_of(entries));
        assert!(behavior.human_score > 0.7, "score {}", behavior.human_score);
        assert!(behavior.assets_loaded);
        assert!(behavior.has_referer);
        assert!(behavior.patterns.views_homepage);
        assert!(behavior.patterns.varying_response_times);
    }

    #[test]
    fn rapid_fire_scraping_scores_low() {
        let entries: Vec<LogEntry> = (0..60)
            .map(|i| {
                let mut e = entry(0, &format!("/item/{}", i));
                e.timestamp = Utc.timestamp_millis_opt(1_700_000_000_000 + i * 150).unwrap();
                e
            })
            .collect();
        let behavior = analyzer().analyze(&session_of(entries));
        // Sub-second pages, sub-half-minute session, > 50 pages.
        assert!(behavior.human_score < 0.1, "score {}", behavior.human_score);
        assert!(!behavior.assets_loaded);
    }

    #[test]
    fn single_request_session_carries_no_timing_penalty() {
        let mut e = entry(0, "/");
        e.referer = Some("https://google.com/".to_string());
        let behavior = analyzer().analyze(&session_of(vec![e]));
        // Homepage + referer, no penalties: solidly ambiguous-to-human.
        assert!((behavior.human_score - 0.7).abs() < 1e-9);
        assert_eq!(behavior.pages_viewed, 1);
        assert_eq!(behavior.session_duration_ms, 0.0);
    }

    #[test]
    fn response_time_variance_requires_three_samples() {
        let mut a = entry(0, "/x");
        let mut b = entry(10, "/y");
        a.response_time_ms = Some(10.0);
        b.response_time_ms = Some(900.0);
        let behavior = analyzer().analyze(&session_of(vec![a, b]));
        assert!(!behavior.patterns.varying_response_times);
    }

    #[test]
    fn multi_hour_session_is_not_realistic() {
        // Steady activity every 20 minutes for 5 hours: one session, but
        // past the realistic-length ceiling.
        let entries: Vec<LogEntry> = (0..16).map(|i| entry(i * 1200, "/a")).collect();
        let behavior = analyzer().analyze(&session_of(entries));
        assert!(!behavior.patterns.realistic_session_length);
    }

    #[test]
    fn realistic_ceiling_is_half_the_session_cap() {
        // 80 minutes of activity every 20 minutes: one gap-split session.
        let entries: Vec<LogEntry> = (0..=4).map(|i| entry(i * 1200, "/a")).collect();
        let session = session_of(entries);

        // Within 240 minutes at the default 8h cap.
        assert!(analyzer().analyze(&session).patterns.realistic_session_length);

        // A 2h cap lowers the ceiling to 60 minutes.
        let mut config = defaults::default_session_config();
        config.max_duration_hours = 2;
        let tight = BehaviorAnalyzer::new(config);
        assert!(!tight.analyze(&session).patterns.realistic_session_length);
    }

    #[test]
    fn score_stays_in_unit_range() {
        let entries: Vec<LogEntry> = (0..200)
            .map(|i| {
                let mut e = entry(0, "/same");
                e.timestamp = Utc.timestamp_millis_opt(1_700_000_000_000 + i * 10).unwrap();
                e
            })
            .collect();
        let behavior = analyzer().analyze(&session_of(entries));
        assert!((0.0..=1.0).contains(&behavior.human_score));
    }
}
