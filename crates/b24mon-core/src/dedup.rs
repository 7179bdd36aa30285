//! Suppression of repeated outage alerts.
//!
//! Alerts are keyed by region, status and the sorted component list. A key
//! seen again inside the dedup window is dropped. Recoveries always pass.

use std::{collections::HashMap, time::Duration};

use sha2::{Digest, Sha256};
use tokio::{sync::Mutex, time::Instant};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Alerts seen, including suppressed repeats.
    pub total_alerts: u64,
    pub unique_alerts: usize,
    pub duplicates_prevented: u64,
    pub window: Duration,
    pub group_interval: Duration,
}

#[derive(Clone, Copy, Debug)]
struct Seen {
    last_sent: Instant,
    count: u64,
}

struct State {
    history: HashMap<String, Seen>,
    last_cleanup: Instant,
}

pub struct AlertDeduplicator {
    window: Duration,
    /// Reported in stats only.
    group_interval: Duration,
    state: Mutex<State>,
}

impl AlertDeduplicator {
    pub fn new(window: Duration, group_interval: Duration) -> Self {
        Self {
            window,
            group_interval,
            state: Mutex::new(State {
                history: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Whether an alert with this identity should go out now. Records it if so.
    pub async fn should_send(&self, components: &[String], status: &str, region: &str) -> bool {
        if status == "up" {
            return true;
        }

        let now = Instant::now();
        let mut state = self.state.lock().await;
        self.cleanup_locked(&mut state, now);

        let key = alert_key(region, status, components);
        if let Some(seen) = state.history.get_mut(&key) {
            let since = now.duration_since(seen.last_sent);
            if since < self.window {
                seen.count += 1;
                tracing::info!(region, status, ?components, since_secs = since.as_secs(), count = seen.count, "duplicate alert suppressed");
                return false;
            }
        }

        state.history.insert(
            key,
            Seen {
                last_sent: now,
                count: 1,
            },
        );
        tracing::info!(region, status, ?components, "alert allowed");
        true
    }

    pub async fn stats(&self) -> DedupStats {
        let state = self.state.lock().await;
        let total: u64 = state.history.values().map(|s| s.count).sum();
        let unique = state.history.len();
        DedupStats {
            total_alerts: total,
            unique_alerts: unique,
            duplicates_prevented: total.saturating_sub(unique as u64),
            window: self.window,
            group_interval: self.group_interval,
        }
    }

    fn cleanup_locked(&self, state: &mut State, now: Instant) {
        if now.duration_since(state.last_cleanup) < CLEANUP_INTERVAL {
            return;
        }
        let max_age = self.window * 2;
        let before = state.history.len();
        state
            .history
            .retain(|_, seen| now.duration_since(seen.last_sent) <= max_age);
        let removed = before - state.history.len();
        if removed > 0 {
            tracing::debug!(removed, "pruned old alert records");
        }
        state.last_cleanup = now;
    }
}

fn alert_key(region: &str, status: &str, components: &[String]) -> String {
    let mut sorted: Vec<&str> = components.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let raw = format!("{region}|{status}|{}", sorted.join(","));
    let digest = Sha256::digest(raw.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
