use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::settings::{EngineConfig, FusionConfig, SessionConfig};
use crate::models::classification::{
    Aggregations, BotAnalysis, BotCategory, BotClassification, BotMetadata, CategoryAggregate,
    DetectionResult, Impact, PatternType, SessionAnalyses, TimeRange, TopOffender,
    TrafficSummary, VelocityAnalysis,
};
use crate::models::entry::LogEntry;
use crate::signatures::matcher::SignatureMatcher;

use super::behavior::BehaviorAnalyzer;
use super::pattern::PatternAnalyzer;
use super::session::{group_identity_sessions, group_sessions, Session};
use super::velocity::VelocityAnalyzer;

/// Result of one batch classification: the analysis itself plus the
/// gap-split sessions it was derived from, so the pipeline can re-attach
/// verdicts onto individual rows.
pub struct ClassificationOutcome {
    pub analysis: BotAnalysis,
    pub sessions: Vec<Session>,
}

/// Fuses the four analyzers' outputs into one classification per requester.
///
/// Owns its analyzer components: constructed once, shared read-only.
/// Classification is a pure
/// function of the batch; given identical input ordering the output is
/// bit-identical.
pub struct Classifier {
    velocity: VelocityAnalyzer,
    pattern: PatternAnalyzer,
    behavior: BehaviorAnalyzer,
    matcher: Arc<SignatureMatcher>,
    fusion: FusionConfig,
    session: SessionConfig,
}

impl Classifier {
    pub fn new(config: &EngineConfig, matcher: Arc<SignatureMatcher>) -> Self {
        Self {
            velocity: VelocityAnalyzer::new(config.velocity.clone()),
            pattern: PatternAnalyzer::new(),
            behavior: BehaviorAnalyzer::new(config.session.clone()),
            matcher,
            fusion: config.fusion.clone(),
            session: config.session.clone(),
        }
    }

    /// Classify a fully assembled batch. Grouping for fusion is by
    /// identity only; gap-splitting is a behavior-analyzer concern.
    pub fn classify_batch(&self, entries: &[LogEntry]) -> ClassificationOutcome {
        if entries.is_empty() {
            return ClassificationOutcome {
                analysis: BotAnalysis::empty(),
                sessions: Vec::new(),
            };
        }

        let velocity_by_ip = self.velocity.analyze_batch(entries);
        let gap_sessions = group_sessions(entries, self.session.max_gap_minutes);
        let identity_sessions = group_identity_sessions(entries);

        // First chronological gap-split session per identity: the behavior
        // analyzer's view of the requester, and the anchor for row
        // re-attachment.
        let mut first_session: BTreeMap<(String, String), usize> = BTreeMap::new();
        for (i, s) in gap_sessions.iter().enumerate() {
            let key = (s.ip.clone(), s.user_agent.clone());
            let slot = first_session.entry(key).or_insert(i);
            if gap_sessions[*slot].start_time > s.start_time {
                *slot = i;
            }
        }

        let mut bots = Vec::new();
        let mut bot_requests = 0usize;

        for identity in &identity_sessions {
            let velocity = velocity_by_ip
                .get(&identity.ip)
                .cloned()
                .unwrap_or_else(VelocityAnalysis::insufficient);

            let paths: Vec<&str> = identity.entries.iter().map(LogEntry::path_str).collect();
            let pattern = self.pattern.analyze(&paths);

            let key = (identity.ip.clone(), identity.user_agent.clone());
            let behavior_session = first_session
                .get(&key)
                .map(|&i| &gap_sessions[i])
                .unwrap_or(identity);
            let behavior = self.behavior.analyze(behavior_session);

            // All entries in the group share one UA, so the first entry
            // is representative.
            let signature = self.matcher.match_entry(&identity.entries[0]);

            let analyses = SessionAnalyses {
                velocity,
                pattern,
                behavior,
                signature,
            };
            let classification = self.fuse(&analyses);

            debug!(
                ip = %identity.ip,
                bot = classification.bot_name.as_deref().unwrap_or("-"),
                confidence = classification.confidence,
                "Session fused"
            );

            if classification.confidence > self.fusion.min_confidence {
                bot_requests += identity.entries.len();
                bots.push(DetectionResult {
                    ip: identity.ip.clone(),
                    user_agent: identity.user_agent.clone(),
                    classification,
                    request_count: identity.entries.len(),
                    total_bandwidth: identity
                        .entries
                        .iter()
                        .map(|e| e.bytes_transferred)
                        .sum(),
                    time_range: TimeRange {
                        start: identity.start_time,
                        end: identity.end_time,
                    },
                    session_id: behavior_session.id.clone(),
                    velocity: analyses.velocity,
                    pattern: analyses.pattern,
                    behavior: analyses.behavior,
                });
            }
        }

        let total_requests = entries.len();
        let total_bandwidth = entries.iter().map(|e| e.bytes_transferred).sum();
        // Non-empty is guaranteed by the early return above.
        let start = entries.iter().map(|e| e.timestamp).min().unwrap_or(entries[0].timestamp);
        let end = entries.iter().map(|e| e.timestamp).max().unwrap_or(entries[0].timestamp);

        let aggregations = aggregate(&bots);

        ClassificationOutcome {
            analysis: BotAnalysis {
                summary: TrafficSummary {
                    total_requests,
                    bot_requests,
                    human_requests: total_requests.saturating_sub(bot_requests),
                    total_bandwidth,
                    time_range: TimeRange { start, end },
                },
                bots,
                aggregations,
            },
            sessions: gap_sessions,
        }
    }

    /// Fuse one session's fixed-shape analysis record into a final
    /// classification.
    pub fn fuse(&self, analyses: &SessionAnalyses) -> BotClassification {
        match &analyses.signature {
            Some(signature) => self.fuse_with_signature(signature, analyses),
            None => self.fuse_unsigned(analyses),
        }
    }

    /// Signature matched: take its classification verbatim and let the
    /// other analyzers nudge the confidence.
    fn fuse_with_signature(
        &self,
        signature: &BotClassification,
        analyses: &SessionAnalyses,
    ) -> BotClassification {
        let mut confidence = signature.confidence;

        if analyses.velocity.is_bot {
            confidence += 0.1;
        } else if analyses.velocity.confidence > 0.7 {
            // Strong cadence evidence against automation.
            confidence -= 0.1;
        }
        if analyses.pattern.confidence > 0.7 {
            confidence += 0.1;
        }
        if analyses.behavior.human_score < 0.3 {
            confidence += 0.1;
        } else if analyses.behavior.human_score > 0.7 {
            confidence -= 0.15;
        }

        let mut result = signature.clone();
        result.confidence = confidence.clamp(0.1, 1.0);
        result
    }

    /// No signature: weighted voting across the analyzers that crossed
    /// their own thresholds, renormalized by the contributing weights.
    fn fuse_unsigned(&self, analyses: &SessionAnalyses) -> BotClassification {
        let velocity = &analyses.velocity;
        let pattern = &analyses.pattern;
        let behavior = &analyses.behavior;

        let mut weight_sum = 0.0;
        let mut weighted = 0.0;

        if velocity.is_bot {
            weight_sum += self.fusion.velocity_weight;
            weighted += self.fusion.velocity_weight * velocity.confidence;
        }
        if pattern.confidence > 0.5 {
            weight_sum += self.fusion.pattern_weight;
            weighted += self.fusion.pattern_weight * pattern.confidence;
        }
        let bot_score = 1.0 - behavior.human_score;
        if bot_score > 0.5 {
            weight_sum += self.fusion.behavior_weight;
            weighted += self.fusion.behavior_weight * bot_score;
        }

        let confidence = if weight_sum > 0.0 {
            (weighted / weight_sum).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let rps = velocity.requests_per_second;
        let systematic = pattern.pattern_type == PatternType::Systematic;
        let sequential = pattern.pattern_type == PatternType::Sequential;

        let (category, subcategory, bot_name) = if systematic && rps > 2.0 {
            (
                BotCategory::Extractive,
                Some("scraper".to_string()),
                Some("Systematic Crawler".to_string()),
            )
        } else if rps > 10.0 {
            (
                BotCategory::Malicious,
                Some("aggressive_scraper".to_string()),
                Some("Aggressive Bot".to_string()),
            )
        } else if sequential {
            (
                BotCategory::Extractive,
                Some("crawler".to_string()),
                Some("Sequential Crawler".to_string()),
            )
        } else if velocity.is_bot {
            (BotCategory::Unknown, None, Some("High-Velocity Bot".to_string()))
        } else {
            (BotCategory::Unknown, None, None)
        };

        let impact = if rps > 10.0 || velocity.requests_per_minute > 500.0 {
            Impact::Extreme
        } else if rps > 5.0 || confidence > 0.8 {
            Impact::High
        } else if pattern.confidence > 0.7 {
            Impact::Medium
        } else {
            Impact::Low
        };

        BotClassification {
            bot_name,
            category,
            subcategory,
            confidence,
            verified: false,
            impact,
            metadata: BotMetadata::default(),
        }
    }
}

/// Roll up surviving detections by category, impact, and bandwidth.
fn aggregate(bots: &[DetectionResult]) -> Aggregations {
    let mut by_category: BTreeMap<String, CategoryAggregate> = BTreeMap::new();
    let mut by_impact: BTreeMap<String, CategoryAggregate> = BTreeMap::new();

    for bot in bots {
        let c = by_category
            .entry(bot.classification.category.to_string())
            .or_default();
        c.requests += bot.request_count;
        c.bandwidth += bot.total_bandwidth;

        let i = by_impact
            .entry(bot.classification.impact.to_string())
            .or_default();
        i.requests += bot.request_count;
        i.bandwidth += bot.total_bandwidth;
    }

    let mut ranked: Vec<&DetectionResult> = bots.iter().collect();
    ranked.sort_by(|a, b| b.total_bandwidth.cmp(&a.total_bandwidth));
    let top_offenders = ranked
        .into_iter()
        .take(10)
        .map(|bot| TopOffender {
            ip: bot.ip.clone(),
            bot_name: bot.classification.bot_name.clone(),
            category: bot.classification.category,
            requests: bot.request_count,
            bandwidth: bot.total_bandwidth,
        })
        .collect();

    Aggregations {
        by_category,
        by_impact,
        top_offenders,
    }
}
