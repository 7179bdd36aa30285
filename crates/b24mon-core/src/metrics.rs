//! Operational counters persisted to a JSON file.
//!
//! Persistence is best effort: a failed write is logged and the in-memory
//! counters keep going.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{formatting::format_uptime, storage};

const PARSE_TIME_WINDOW: usize = 100;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub start_time: Option<DateTime<Utc>>,
    pub uptime_seconds: i64,
    pub alerts_sent: u64,
    pub recoveries_sent: u64,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub last_check_time: Option<DateTime<Utc>>,
    /// Seconds.
    pub last_check_duration: Option<f64>,
    /// Mean over the last 100 successful checks, in seconds.
    pub average_parse_time: f64,
    pub parse_times: Vec<f64>,
    pub errors_last_hour: usize,
    pub error_timestamps: Vec<DateTime<Utc>>,
    pub last_error_time: Option<DateTime<Utc>>,
}

impl Metrics {
    /// Share of successful checks, 0..=100.
    pub fn success_rate(&self) -> f64 {
        if self.total_checks == 0 {
            return 0.0;
        }
        self.successful_checks as f64 * 100.0 / self.total_checks as f64
    }

    fn prune_errors(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(1);
        self.error_timestamps.retain(|t| *t > cutoff);
        self.errors_last_hour = self.error_timestamps.len();
    }
}

pub struct MetricsCollector {
    path: PathBuf,
    started: DateTime<Utc>,
    state: Mutex<Metrics>,
}

impl MetricsCollector {
    /// Load counters from `path`. An unreadable or corrupt file starts fresh.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let started = Utc::now();
        let mut metrics = match storage::read_json::<Metrics>(&path).await {
            Ok(Some(m)) => {
                tracing::info!(path = %path.display(), "metrics loaded");
                m
            }
            Ok(None) => Metrics::default(),
            Err(e) => {
                tracing::error!(error = %e, "failed to load metrics, starting fresh");
                Metrics::default()
            }
        };
        metrics.start_time = Some(started);

        Self {
            path,
            started,
            state: Mutex::new(metrics),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record_check(&self, duration: std::time::Duration, success: bool) {
        self.record_check_at(duration, success, Utc::now()).await;
    }

    async fn record_check_at(&self, duration: std::time::Duration, success: bool, now: DateTime<Utc>) {
        let secs = duration.as_secs_f64();
        let mut m = self.state.lock().await;
        m.total_checks += 1;
        m.last_check_time = Some(now);
        m.last_check_duration = Some(secs);

        if success {
            m.successful_checks += 1;
            m.parse_times.push(secs);
            if m.parse_times.len() > PARSE_TIME_WINDOW {
                let excess = m.parse_times.len() - PARSE_TIME_WINDOW;
                m.parse_times.drain(..excess);
            }
            m.average_parse_time = m.parse_times.iter().sum::<f64>() / m.parse_times.len() as f64;
        } else {
            m.failed_checks += 1;
            m.error_timestamps.push(now);
            m.last_error_time = Some(now);
        }
        self.save(&mut m, now).await;
    }

    pub async fn record_alert(&self) {
        let mut m = self.state.lock().await;
        m.alerts_sent += 1;
        self.save(&mut m, Utc::now()).await;
    }

    pub async fn record_recovery(&self) {
        let mut m = self.state.lock().await;
        m.recoveries_sent += 1;
        self.save(&mut m, Utc::now()).await;
    }

    /// Current counters with uptime and the one-hour error window refreshed.
    pub async fn snapshot(&self) -> Metrics {
        let now = Utc::now();
        let mut m = self.state.lock().await;
        m.uptime_seconds = (now - self.started).num_seconds();
        m.prune_errors(now);
        m.clone()
    }

    pub fn uptime_formatted(&self) -> String {
        format_uptime((Utc::now() - self.started).num_seconds())
    }

    async fn save(&self, m: &mut Metrics, now: DateTime<Utc>) {
        m.uptime_seconds = (now - self.started).num_seconds();
        m.prune_errors(now);
        if let Err(e) = storage::write_json_atomic(&self.path, &*m).await {
            tracing::error!(path = %self.path.display(), error = %e, "failed to save metrics");
        }
    }
}
