use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::entry::LogEntry;

/// A contiguous burst of activity from one (IP, User-Agent) pair.
///
/// Sessions are ephemeral: they are recomputed on every analysis call and
/// carry no persisted identity. Grouping never produces an empty session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Deterministic id derived from ip + ordinal + start timestamp.
    pub id: String,
    pub ip: String,
    pub user_agent: String,
    /// Entries ordered by timestamp ascending.
    pub entries: Vec<LogEntry>,
    /// Positions of this session's entries in the caller's slice, so the
    /// pipeline can re-attach verdicts onto individual rows.
    pub indices: Vec<usize>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Session {
    pub fn duration_ms(&self) -> f64 {
        (self.end_time.timestamp_millis() - self.start_time.timestamp_millis()) as f64
    }
}

fn session_id(ip: &str, ordinal: usize, start: DateTime<Utc>) -> String {
    format!("{}-{}-{}", ip, ordinal, start.timestamp_millis())
}

/// Partition entries into identity groups keyed by `ip|user_agent`, in
/// first-seen order after the timestamp sort. Missing IP/UA values are
/// replaced by the literal "unknown".
fn identity_groups(entries: &[LogEntry]) -> Vec<(String, Vec<usize>)> {
    // Stable sort by timestamp; ties keep input order so output is
    // deterministic for a fixed input ordering.
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by_key(|&i| entries[i].timestamp);

    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    let mut index_of: HashMap<String, usize> = HashMap::new();

    for i in order {
        let key = entries[i].identity_key();
        match index_of.get(&key) {
            Some(&g) => groups[g].1.push(i),
            None => {
                index_of.insert(key.clone(), groups.len());
                groups.push((key, vec![i]));
            }
        }
    }

    groups
}

/// Group entries into gap-split sessions.
///
/// Within each identity group, entries are walked in time order and a new
/// session starts whenever the gap to the previous entry exceeds
/// `max_gap_minutes`. Pure function; empty input yields empty output.
pub fn group_sessions(entries: &[LogEntry], max_gap_minutes: i64) -> Vec<Session> {
    let max_gap_ms = max_gap_minutes * 60 * 1000;
    let mut sessions = Vec::new();

    for (key, indices) in identity_groups(entries) {
        let (ip, user_agent) = split_identity(&key);
        let mut ordinal = 0usize;
        let mut current: Vec<usize> = Vec::new();

        for &i in &indices {
            if let Some(&prev) = current.last() {
                let gap = entries[i].timestamp.timestamp_millis()
                    - entries[prev].timestamp.timestamp_millis();
                if gap > max_gap_ms {
                    sessions.push(build_session(entries, &ip, &user_agent, ordinal, current));
                    ordinal += 1;
                    current = Vec::new();
                }
            }
            current.push(i);
        }

        if !current.is_empty() {
            sessions.push(build_session(entries, &ip, &user_agent, ordinal, current));
        }
    }

    sessions
}

/// Group entries by identity only, without gap-splitting. This is the
/// batch-level view the fusion classifier works over: each identity's full
/// history in one session.
pub fn group_identity_sessions(entries: &[LogEntry]) -> Vec<Session> {
    identity_groups(entries)
        .into_iter()
        .map(|(key, indices)| {
            let (ip, user_agent) = split_identity(&key);
            build_session(entries, &ip, &user_agent, 0, indices)
        })
        .collect()
}

fn split_identity(key: &str) -> (String, String) {
    match key.split_once('|') {
        Some((ip, ua)) => (ip.to_string(), ua.to_string()),
        None => (key.to_string(), String::new()),
    }
}

fn build_session(
    entries: &[LogEntry],
    ip: &str,
    user_agent: &str,
    ordinal: usize,
    indices: Vec<usize>,
) -> Session {
    debug_assert!(!indices.is_empty(), "grouper never builds an empty session");
    let owned: Vec<LogEntry> = indices.iter().map(|&i| entries[i].clone()).collect();
    let start_time = owned.first().map(|e| e.timestamp).unwrap_or_else(Utc::now);
    let end_time = owned.last().map(|e| e.timestamp).unwrap_or(start_time);

    Session {
        id: session_id(ip, ordinal, start_time),
        ip: ip.to_string(),
        user_agent: user_agent.to_string(),
        entries: owned,
        indices,
        start_time,
        end_time,
    }
}
