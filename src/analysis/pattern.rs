use std::collections::{HashMap, HashSet};

use regex::Regex;
use tracing::debug;

use crate::models::classification::{CrawlPattern, PatternIndicators, PatternType};

/// Extensions favored by crawlers harvesting machine-readable content.
const CRAWLER_EXTENSIONS: &[&str] = &[".xml", ".json", ".rss", ".atom", ".txt", ".csv"];

/// Well-known crawler infrastructure paths.
const CRAWLER_PATHS: &[&str] = &[
    "robots.txt",
    ".well-known",
    "/api/",
    "/admin",
    "/wp-",
    "/feed",
    "/rss",
];

/// Detects systematic and sequential crawling from the sequence of paths
/// requested within one session.
pub struct PatternAnalyzer {
    /// Numeric path templates, e.g. `/page/N` or `?page=N`. Matched numbers
    /// are checked for consecutive runs.
    numeric_templates: Vec<Regex>,
}

impl PatternAnalyzer {
    pub fn new() -> Self {
        let sources = [
            r"/page/(\d+)",
            r"/p/(\d+)",
            r"/(\d+)/",
            r"[?&]page=(\d+)",
            r"[?&]p=(\d+)",
            r"/product/(\d+)",
            r"/article/(\d+)",
            r"/item/(\d+)",
            r"/post/(\d+)",
        ];
        let numeric_templates = sources
            .iter()
            .map(|s| Regex::new(s).expect("numeric path template is valid"))
            .collect();
        Self { numeric_templates }
    }

    /// Analyze one session's path sequence. Empty input returns the
    /// zero-valued `random` default.
    pub fn analyze(&self, paths: &[&str]) -> CrawlPattern {
        if paths.is_empty() {
            return CrawlPattern::empty();
        }

        let sequential_score = self.sequential_score(paths);
        let systematic_score = Self::systematic_score(paths);
        let sitemap_access = paths.iter().any(|p| is_sitemap_path(p));
        let depth_consistency = Self::depth_consistency(paths);

        let pattern_type = if sequential_score > 0.6 {
            PatternType::Sequential
        } else if systematic_score > 0.5 || sitemap_access {
            PatternType::Systematic
        } else if paths.len() < 10 && depth_consistency > 0.8 {
            PatternType::Targeted
        } else {
            PatternType::Random
        };

        let mut confidence = sequential_score
            .max(systematic_score)
            .max(if sitemap_access { 0.3 } else { 0.0 });
        if paths.len() >= 20 {
            confidence += 0.1;
        }
        if paths.len() >= 50 {
            confidence += 0.1;
        }
        if depth_consistency > 0.7 {
            confidence += 0.1;
        }
        let confidence = confidence.min(1.0);

        debug!(
            pattern = %pattern_type,
            sequential = sequential_score,
            systematic = systematic_score,
            confidence = confidence,
            "Pattern analysis complete"
        );

        CrawlPattern {
            pattern_type,
            confidence,
            sample_paths: sample_paths(paths, 10),
            indicators: PatternIndicators {
                sequential_score,
                systematic_score,
                sitemap_access,
                depth_consistency,
            },
        }
    }

    /// Max over templates of (longest consecutive-integer run / matches),
    /// combined with the alphabetical-segment variant.
    fn sequential_score(&self, paths: &[&str]) -> f64 {
        let mut best: f64 = 0.0;

        for template in &self.numeric_templates {
            let mut numbers: Vec<i64> = Vec::new();
            for path in paths {
                for cap in template.captures_iter(path) {
                    if let Some(m) = cap.get(1) {
                        if let Ok(n) = m.as_str().parse::<i64>() {
                            numbers.push(n);
                        }
                    }
                }
            }
            if numbers.len() < 2 {
                continue;
            }
            let total = numbers.len();
            numbers.sort_unstable();
            let run = longest_consecutive_run(&numbers);
            best = best.max(run as f64 / total as f64);
        }

        best.max(Self::alphabetical_score(paths)).min(1.0)
    }

    /// Single-letter path segments sorted and checked for consecutive
    /// character codes, e.g. /a, /b, /c.
    fn alphabetical_score(paths: &[&str]) -> f64 {
        let mut letters: Vec<i64> = Vec::new();
        for path in paths {
            for segment in path_segments(path) {
                let mut chars = segment.chars();
                if let (Some(c), None) = (chars.next(), chars.next()) {
                    if c.is_ascii_alphabetic() {
                        letters.push(c.to_ascii_lowercase() as i64);
                    }
                }
            }
        }
        if letters.len() < 2 {
            return 0.0;
        }
        let total = letters.len();
        letters.sort_unstable();
        longest_consecutive_run(&letters) as f64 / total as f64
    }

    /// Max of four sub-signals: hierarchical crawling, parameter sweeps,
    /// crawler-favored extensions, and known crawler paths.
    fn systematic_score(paths: &[&str]) -> f64 {
        let total = paths.len() as f64;

        // Hierarchical: shallow-then-deep depth distribution.
        let depths: Vec<usize> = paths.iter().map(|p| path_depth(p)).collect();
        let mut hierarchical: f64 = 0.0;
        if let Some(&min_depth) = depths.iter().min() {
            let at_min = depths.iter().filter(|&&d| d == min_depth).count();
            if at_min as f64 / total > 0.6 {
                hierarchical += 0.5;
            }
            let mut distinct: Vec<usize> = depths.iter().copied().collect::<HashSet<_>>().into_iter().collect();
            distinct.sort_unstable();
            if distinct.len() > 1 && distinct.windows(2).all(|w| w[1] == w[0] + 1) {
                hierarchical += 0.3;
            }
        }

        // Parameter sweep: one query key cycling through many values.
        let mut param_values: HashMap<String, HashSet<String>> = HashMap::new();
        for path in paths {
            if let Some((_, query)) = path.split_once('?') {
                for pair in query.split('&') {
                    let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                    if !key.is_empty() {
                        param_values
                            .entry(key.to_string())
                            .or_default()
                            .insert(value.to_string());
                    }
                }
            }
        }
        let sweep = param_values
            .values()
            .map(|values| (values.len() as f64 / total * 2.0).min(1.0))
            .fold(0.0f64, f64::max);

        // Crawler-favored extensions.
        let ext_hits = paths
            .iter()
            .filter(|p| {
                let bare = p.split('?').next().unwrap_or(p);
                CRAWLER_EXTENSIONS.iter().any(|ext| bare.ends_with(ext))
            })
            .count();
        let extensions = ext_hits as f64 / total;

        // Known crawler paths.
        let path_hits = paths
            .iter()
            .filter(|p| is_sitemap_path(p) || CRAWLER_PATHS.iter().any(|c| p.contains(c)))
            .count();
        let crawler_paths = path_hits as f64 / total;

        hierarchical
            .max(sweep)
            .max(extensions)
            .max(crawler_paths)
            .min(1.0)
    }

    /// 1 - (stddev of path depth / mean path depth), floored at 0.
    fn depth_consistency(paths: &[&str]) -> f64 {
        let depths: Vec<f64> = paths.iter().map(|p| path_depth(p) as f64).collect();
        let mean = depths.iter().sum::<f64>() / depths.len() as f64;
        if mean <= 0.0 {
            return 0.0;
        }
        let variance =
            depths.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / depths.len() as f64;
        (1.0 - variance.sqrt() / mean).max(0.0)
    }
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_sitemap_path(path: &str) -> bool {
    let bare = path.split('?').next().unwrap_or(path);
    bare.contains("robots.txt") || (bare.contains("sitemap") && bare.ends_with(".xml"))
}

fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('?')
        .next()
        .unwrap_or("")
        .split('/')
        .filter(|s| !s.is_empty())
}

fn path_depth(path: &str) -> usize {
    path_segments(path).count()
}

/// Longest run of consecutive integers in a sorted slice. Repeats extend
/// neither the run nor break it.
fn longest_consecutive_run(sorted: &[i64]) -> usize {
    let mut best = 1usize;
    let mut current = 1usize;
    for w in sorted.windows(2) {
        if w[1] == w[0] + 1 {
            current += 1;
            best = best.max(current);
        } else if w[1] != w[0] {
            current = 1;
        }
    }
    best
}

/// Up to `limit` evenly-strided representative paths.
fn sample_paths(paths: &[&str], limit: usize) -> Vec<String> {
    if paths.len() <= limit {
        return paths.iter().map(|p| p.to_string()).collect();
    }
    let stride = (paths.len() + limit - 1) / limit;
    paths
        .iter()
        .step_by(stride)
        .take(limit)
        .map(|p| p.to_string())
        .collect()
}
