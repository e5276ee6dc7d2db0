use std::collections::BTreeMap;

use anyhow::{bail, Result};
use ipnet::Ipv4Net;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::classification::{BotCategory, BotMetadata, Impact};

/// One signature record as it appears in the external JSON catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureDef {
    /// Unique bot name, e.g. "Googlebot".
    pub name: String,

    /// Category string; legacy values are remapped on compile.
    pub category: String,

    /// Free-text tag, e.g. "ai_training".
    #[serde(default)]
    pub subcategory: Option<String>,

    /// Regex source strings tested against the User-Agent, in order.
    pub patterns: Vec<String>,

    /// Published IP ranges in CIDR notation.
    #[serde(default)]
    pub ip_ranges: Vec<String>,

    /// Severity string; legacy "critical" maps to extreme.
    #[serde(default = "default_impact")]
    pub impact: String,

    #[serde(default)]
    pub metadata: BotMetadata,

    #[serde(default)]
    pub verification: Option<VerificationHints>,
}

fn default_impact() -> String {
    "low".to_string()
}

/// Optional hints for out-of-band identity checks. The engine does not
/// perform reverse DNS or header probing itself; these are carried through
/// for callers that do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationHints {
    #[serde(default)]
    pub reverse_dns: Option<Vec<String>>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
}

/// A catalog record with its patterns and ranges compiled for matching.
/// Registration order is preserved by the registry; matching is
/// first-match-wins.
#[derive(Debug, Clone)]
pub struct CompiledSignature {
    pub name: String,
    pub category: BotCategory,
    pub subcategory: Option<String>,
    pub patterns: Vec<Regex>,
    pub ip_ranges: Vec<Ipv4Net>,
    pub impact: Impact,
    pub metadata: BotMetadata,
    pub verification: Option<VerificationHints>,
}

/// Compile one record. Bad patterns and bad ranges are dropped individually;
/// a record is rejected only when no usable pattern remains.
pub fn compile_signature(def: SignatureDef) -> Result<CompiledSignature> {
    let patterns: Vec<Regex> = def
        .patterns
        .iter()
        .filter_map(|source| match Regex::new(&format!("(?i){}", source)) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(signature = %def.name, pattern = %source, error = %e, "Skipping invalid UA pattern");
                None
            }
        })
        .collect();

    if patterns.is_empty() {
        bail!("signature '{}' has no valid UA patterns", def.name);
    }

    let ip_ranges: Vec<Ipv4Net> = def
        .ip_ranges
        .iter()
        .filter_map(|range| match range.parse::<Ipv4Net>() {
            Ok(net) => Some(net),
            Err(_) => {
                warn!(signature = %def.name, range = %range, "Skipping malformed CIDR range");
                None
            }
        })
        .collect();

    Ok(CompiledSignature {
        name: def.name,
        category: BotCategory::from_str_name(&def.category),
        subcategory: def.subcategory,
        patterns,
        ip_ranges,
        impact: Impact::from_str_name(&def.impact),
        metadata: def.metadata,
        verification: def.verification,
    })
}

/// Parse a JSON catalog. Records that fail to compile are skipped with a
/// diagnostic; the catalog as a whole fails only when it is not valid JSON.
pub fn parse_catalog(content: &str) -> Result<Vec<CompiledSignature>> {
    let defs: Vec<SignatureDef> = serde_json::from_str(content)?;
    let mut compiled = Vec::with_capacity(defs.len());
    for def in defs {
        let name = def.name.clone();
        match compile_signature(def) {
            Ok(sig) => compiled.push(sig),
            Err(e) => warn!(signature = %name, error = %e, "Skipping unusable catalog record"),
        }
    }
    Ok(compiled)
}

fn builtin(
    name: &str,
    category: BotCategory,
    subcategory: &str,
    patterns: &[&str],
    ranges: &[&str],
    impact: Impact,
    operator: &str,
    purpose: &str,
    respects_robots: bool,
) -> CompiledSignature {
    CompiledSignature {
        name: name.to_string(),
        category,
        subcategory: Some(subcategory.to_string()),
        patterns: patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){}", p)).expect("builtin pattern is valid"))
            .collect(),
        ip_ranges: ranges
            .iter()
            .map(|r| r.parse().expect("builtin CIDR is valid"))
            .collect(),
        impact,
        metadata: BotMetadata {
            operator: Some(operator.to_string()),
            purpose: Some(purpose.to_string()),
            respects_robots_txt: Some(respects_robots),
            average_crawl_rate: None,
        },
        verification: None,
    }
}

/// Minimal built-in signature set, used whenever the external catalog is
/// absent or corrupt. Coverage shrinks; confidence-scoring logic does not.
pub fn builtin_signatures() -> Vec<CompiledSignature> {
    vec![
        builtin(
            "Googlebot",
            BotCategory::Beneficial,
            "search_engine",
            &["googlebot", "google-inspectiontool"],
            &[
                "66.249.64.0/19",
                "64.233.160.0/19",
                "66.102.0.0/20",
                "72.14.192.0/18",
                "209.85.128.0/17",
                "216.239.32.0/19",
            ],
            Impact::Low,
            "Google",
            "Search indexing",
            true,
        ),
        builtin(
            "Bingbot",
            BotCategory::Beneficial,
            "search_engine",
            &["bingbot", "msnbot"],
            &[
                "40.77.167.0/24",
                "207.46.0.0/16",
                "157.55.0.0/16",
                "157.56.0.0/16",
            ],
            Impact::Low,
            "Microsoft",
            "Search indexing",
            true,
        ),
        builtin(
            "GPTBot",
            BotCategory::Extractive,
            "ai_training",
            &[r"gptbot"],
            &["20.15.240.64/28", "20.15.240.80/28", "52.230.152.0/24"],
            Impact::High,
            "OpenAI",
            "AI model training",
            true,
        ),
        builtin(
            "ClaudeBot",
            BotCategory::Extractive,
            "ai_training",
            &["claudebot", "anthropic-ai"],
            &[],
            Impact::Medium,
            "Anthropic",
            "AI model training",
            true,
        ),
        builtin(
            "CCBot",
            BotCategory::Extractive,
            "ai_training",
            &["ccbot"],
            &[],
            Impact::Medium,
            "Common Crawl",
            "Open web corpus",
            true,
        ),
        builtin(
            "AhrefsBot",
            BotCategory::Malicious,
            "seo_tool",
            &["ahrefsbot"],
            &[],
            Impact::Medium,
            "Ahrefs",
            "SEO backlink indexing",
            true,
        ),
    ]
}
