use std::net::Ipv4Addr;
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use tracing::debug;

use crate::models::classification::{BotCategory, BotClassification, BotMetadata, Impact};
use crate::models::entry::LogEntry;

use super::registry::SignatureRegistry;

/// A legacy simple-detector entry: plain substring match with the old
/// category/severity vocabulary, remapped on hit.
struct LegacyBot {
    name: &'static str,
    ua_contains: &'static str,
    category: &'static str,
    severity: &'static str,
}

const LEGACY_BOTS: &[LegacyBot] = &[
    LegacyBot { name: "Googlebot", ua_contains: "googlebot", category: "search_engine", severity: "low" },
    LegacyBot { name: "Bingbot", ua_contains: "bingbot", category: "search_engine", severity: "low" },
    LegacyBot { name: "DuckDuckBot", ua_contains: "duckduckbot", category: "search_engine", severity: "low" },
    LegacyBot { name: "YandexBot", ua_contains: "yandexbot", category: "search_engine", severity: "low" },
    LegacyBot { name: "Baiduspider", ua_contains: "baiduspider", category: "search_engine", severity: "low" },
    LegacyBot { name: "Facebook Crawler", ua_contains: "facebookexternalhit", category: "social_media", severity: "low" },
    LegacyBot { name: "Twitterbot", ua_contains: "twitterbot", category: "social_media", severity: "low" },
    LegacyBot { name: "UptimeRobot", ua_contains: "uptimerobot", category: "monitoring", severity: "low" },
    LegacyBot { name: "Pingdom", ua_contains: "pingdom", category: "monitoring", severity: "low" },
    LegacyBot { name: "GPTBot", ua_contains: "gptbot", category: "ai_training", severity: "high" },
    LegacyBot { name: "ClaudeBot", ua_contains: "claudebot", category: "ai_training", severity: "medium" },
    LegacyBot { name: "CCBot", ua_contains: "ccbot", category: "ai_training", severity: "medium" },
    LegacyBot { name: "Bytespider", ua_contains: "bytespider", category: "ai_scraper", severity: "high" },
    LegacyBot { name: "PerplexityBot", ua_contains: "perplexitybot", category: "ai_search", severity: "medium" },
    LegacyBot { name: "AhrefsBot", ua_contains: "ahrefsbot", category: "seo_tool", severity: "medium" },
    LegacyBot { name: "SemrushBot", ua_contains: "semrushbot", category: "seo_tool", severity: "medium" },
    LegacyBot { name: "MJ12bot", ua_contains: "mj12bot", category: "seo_tool", severity: "medium" },
    LegacyBot { name: "Scrapy", ua_contains: "scrapy", category: "scraper", severity: "high" },
    LegacyBot { name: "HTTrack", ua_contains: "httrack", category: "scraper", severity: "critical" },
    LegacyBot { name: "python-requests", ua_contains: "python-requests", category: "scraper", severity: "medium" },
    LegacyBot { name: "curl", ua_contains: "curl/", category: "scraper", severity: "medium" },
    LegacyBot { name: "wget", ua_contains: "wget/", category: "scraper", severity: "medium" },
];

/// Authoritative identification of known bots by User-Agent, with optional
/// IP-ownership verification against declared CIDR ranges.
///
/// Signatures are tested in registration order and the first UA match wins.
/// IPv6 containment is unsupported: an IPv6 source never verifies.
pub struct SignatureMatcher {
    registry: Arc<SignatureRegistry>,
    /// UA -> index of the first matching signature, or None for a miss.
    /// Pure memoization: a race on first write repeats work, nothing more.
    ua_cache: DashMap<String, Option<usize>>,
    version_suffix: Regex,
    generic_library: Regex,
}

impl SignatureMatcher {
    pub fn new(registry: Arc<SignatureRegistry>) -> Self {
        Self {
            registry,
            ua_cache: DashMap::new(),
            version_suffix: Regex::new(r"/\d+(\.\d+)*$").expect("version suffix regex is valid"),
            generic_library: Regex::new(r"(?i)^mozilla/5\.0 \(compatible;?\s*[\w.-]*\)$")
                .expect("generic library regex is valid"),
        }
    }

    pub fn registry(&self) -> &SignatureRegistry {
        &self.registry
    }

    /// Match one entry's User-Agent against the registry, falling back to
    /// the legacy substring detector. Returns None when nothing matches;
    /// the session then falls through to the fusion classifier's own
    /// inference.
    pub fn match_entry(&self, entry: &LogEntry) -> Option<BotClassification> {
        let ua = entry.user_agent.as_deref().filter(|s| !s.is_empty())?;

        if let Some(index) = self.lookup_signature(ua) {
            // Index comes from the cache over this registry; always valid.
            let sig = self.registry.get(index)?;

            let (base, verified) = if sig.ip_ranges.is_empty() {
                // Nothing to check the claim against.
                (0.60, false)
            } else {
                match parse_ipv4(entry.ip_key()) {
                    Some(addr) => {
                        if sig.ip_ranges.iter().any(|net| net.contains(&addr)) {
                            (0.95, true)
                        } else {
                            // UA claims a bot whose published ranges do not
                            // include this source: suspected spoof.
                            (0.30, false)
                        }
                    }
                    None => (0.75, false),
                }
            };

            let confidence = self.adjust_confidence(base, ua);
            debug!(
                bot = %sig.name,
                verified = verified,
                confidence = confidence,
                "Signature matched"
            );

            return Some(BotClassification {
                bot_name: Some(sig.name.clone()),
                category: sig.category,
                subcategory: sig.subcategory.clone(),
                confidence,
                verified,
                impact: sig.impact,
                metadata: sig.metadata.clone(),
            });
        }

        self.match_legacy(ua)
    }

    /// First-match-wins index lookup with per-UA memoization.
    fn lookup_signature(&self, ua: &str) -> Option<usize> {
        if let Some(cached) = self.ua_cache.get(ua) {
            return *cached;
        }
        let index = self
            .registry
            .iter()
            .position(|sig| sig.patterns.iter().any(|p| p.is_match(ua)));
        self.ua_cache.insert(ua.to_string(), index);
        index
    }

    /// Legacy simple substring detector, with its category and severity
    /// vocabularies remapped to the closed enums.
    fn match_legacy(&self, ua: &str) -> Option<BotClassification> {
        let lower = ua.to_lowercase();
        for bot in LEGACY_BOTS {
            if lower.contains(bot.ua_contains) {
                let confidence = self.adjust_confidence(0.60, ua);
                debug!(bot = bot.name, confidence = confidence, "Legacy detector matched");
                return Some(BotClassification {
                    bot_name: Some(bot.name.to_string()),
                    category: BotCategory::from_str_name(bot.category),
                    subcategory: Some(bot.category.to_string()),
                    confidence,
                    verified: false,
                    impact: Impact::from_str_name(bot.severity),
                    metadata: BotMetadata::default(),
                });
            }
        }
        None
    }

    /// Heuristic completeness adjustments on top of the base confidence.
    /// These stand in for reverse-DNS/TLS checks the engine does not make.
    fn adjust_confidence(&self, base: f64, ua: &str) -> f64 {
        let mut confidence = base;

        // A version-number suffix suggests a structured, attributable UA.
        if self.version_suffix.is_match(ua) {
            confidence += 0.05;
        }
        if ua.len() > 20 && ua.contains('/') {
            confidence += 0.05;
        }

        let lower = ua.to_lowercase();
        let generic = self.generic_library.is_match(ua)
            || lower.contains("python-requests")
            || lower.starts_with("curl/")
            || lower.starts_with("wget/");
        if generic {
            confidence -= 0.20;
        }

        confidence.clamp(0.10, 1.0)
    }
}

/// Parse a dotted-quad IPv4 string. "unknown", hostnames, and IPv6
/// addresses all yield None, which downgrades verification rather than
/// erroring.
fn parse_ipv4(ip: &str) -> Option<Ipv4Addr> {
    ip.parse().ok()
}
