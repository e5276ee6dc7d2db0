use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classification::BotCategory;

/// Placeholder used whenever an entry is missing its IP or User-Agent.
/// Grouping treats all such entries as one identity rather than erroring.
pub const UNKNOWN: &str = "unknown";

/// A single normalized HTTP access-log record.
///
/// Produced by the provider-specific normalization layer upstream of this
/// crate; the engine only reads these. Every field except the timestamp is
/// optional with a documented default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Wall-clock time of the request. Required.
    pub timestamp: DateTime<Utc>,

    /// Client IP as reported by the provider. Absent means "unknown".
    #[serde(default)]
    pub ip: Option<String>,

    /// Raw User-Agent header value.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Request path, including any query string.
    #[serde(default)]
    pub path: Option<String>,

    /// HTTP method.
    #[serde(default)]
    pub method: Option<String>,

    /// Response status code.
    #[serde(default)]
    pub status_code: Option<u16>,

    /// Response body size in bytes. Defaults to 0 when the provider
    /// does not report it.
    #[serde(default)]
    pub bytes_transferred: u64,

    /// Server-side response time in milliseconds, if reported.
    #[serde(default)]
    pub response_time_ms: Option<f64>,

    /// Referer header value, if present.
    #[serde(default)]
    pub referer: Option<String>,
}

impl LogEntry {
    /// Minimal constructor for a timestamp-only record; everything else
    /// takes its documented default.
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ip: None,
            user_agent: None,
            path: None,
            method: None,
            status_code: None,
            bytes_transferred: 0,
            response_time_ms: None,
            referer: None,
        }
    }

    /// IP with the missing-value fallback applied.
    pub fn ip_key(&self) -> &str {
        self.ip.as_deref().filter(|s| !s.is_empty()).unwrap_or(UNKNOWN)
    }

    /// User-Agent with the missing-value fallback applied.
    pub fn ua_key(&self) -> &str {
        self.user_agent
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN)
    }

    /// Path with missing values treated as the empty string.
    pub fn path_str(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }

    /// Composite grouping key: `ip|user_agent`.
    pub fn identity_key(&self) -> String {
        format!("{}|{}", self.ip_key(), self.ua_key())
    }

    /// Whether this entry carries a non-empty referer.
    pub fn has_referer(&self) -> bool {
        self.referer.as_deref().map_or(false, |r| !r.is_empty())
    }
}

/// A log row with its detection verdict re-attached by the pipeline.
///
/// Rows whose session produced no surviving detection keep `is_bot = false`.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedEntry {
    #[serde(flatten)]
    pub entry: LogEntry,

    /// Id of the gap-split session this row fell into, if any.
    pub session_id: Option<String>,

    pub is_bot: bool,
    pub bot_name: Option<String>,
    pub bot_category: Option<BotCategory>,
}

impl AnnotatedEntry {
    pub fn unclassified(entry: LogEntry) -> Self {
        Self {
            entry,
            session_id: None,
            is_bot: false,
            bot_name: None,
            bot_category: None,
        }
    }
}
