//! Outage history: at most one active incident, plus resolved ones.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    formatting::{duration_between, to_msk},
    status::StatusSnapshot,
    storage, Result,
};

pub const CSV_HEADER: &str = "Дата,Время начала,Время конца,Длительность,Регион,Компоненты,Описание";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Active,
    Resolved,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: u64,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// `HH:MM:SS`, set when the incident is resolved.
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub components: Vec<String>,
    pub status: IncidentStatus,
}

impl Incident {
    pub fn is_active(&self) -> bool {
        self.status == IncidentStatus::Active
    }

    fn csv_row(&self) -> String {
        let start = to_msk(self.start_time);
        let end = self
            .end_time
            .map(|t| to_msk(t).format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "В процессе".to_string());
        let components = if self.components.is_empty() {
            "N/A".to_string()
        } else {
            self.components.join(";")
        };
        let description = self.description.replace(',', ";").replace(['\n', '\r'], " ");
        format!(
            "{},{},{},{},{},{},\"{}\"",
            start.format("%Y-%m-%d"),
            start.format("%H:%M:%S"),
            end,
            self.duration.as_deref().unwrap_or("N/A"),
            if self.region.is_empty() { "N/A" } else { &self.region },
            components,
            description.replace('"', "\"\"")
        )
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IncidentLog {
    next_id: u64,
    incidents: Vec<Incident>,
}

/// JSON-file backed incident history.
pub struct IncidentTracker {
    path: PathBuf,
    state: Mutex<IncidentLog>,
}

impl IncidentTracker {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        storage::ensure_parent_dir(&path).await?;
        let mut log: IncidentLog = storage::read_json(&path).await?.unwrap_or_default();

        let max_id = log.incidents.iter().map(|i| i.id).max().unwrap_or(0);
        log.next_id = log.next_id.max(max_id + 1);
        tracing::debug!(count = log.incidents.len(), path = %path.display(), "incident log opened");

        Ok(Self {
            path,
            state: Mutex::new(log),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open an incident for `snap`, or return the one already active.
    pub async fn start_incident(&self, snap: &StatusSnapshot, at: DateTime<Utc>) -> Result<Incident> {
        let mut log = self.state.lock().await;
        if let Some(active) = log.incidents.iter().find(|i| i.is_active()) {
            tracing::debug!(id = active.id, "incident already active");
            return Ok(active.clone());
        }

        let incident = Incident {
            id: log.next_id,
            start_time: at,
            end_time: None,
            duration: None,
            description: snap.description.clone(),
            region: snap.region.clone(),
            components: snap.components.clone(),
            status: IncidentStatus::Active,
        };
        log.next_id += 1;
        log.incidents.push(incident.clone());

        if let Err(e) = storage::write_json_atomic(&self.path, &*log).await {
            log.incidents.pop();
            log.next_id -= 1;
            return Err(e);
        }
        tracing::info!(id = incident.id, region = %incident.region, "incident started");
        Ok(incident)
    }

    /// Resolve the active incident. `Ok(None)` when nothing is active.
    pub async fn end_incident(&self, at: DateTime<Utc>) -> Result<Option<Incident>> {
        let mut log = self.state.lock().await;
        let Some(idx) = log.incidents.iter().position(|i| i.is_active()) else {
            return Ok(None);
        };

        let before = log.incidents[idx].clone();
        {
            let inc = &mut log.incidents[idx];
            inc.end_time = Some(at);
            inc.duration = Some(duration_between(inc.start_time, at));
            inc.status = IncidentStatus::Resolved;
        }

        if let Err(e) = storage::write_json_atomic(&self.path, &*log).await {
            log.incidents[idx] = before;
            return Err(e);
        }
        let resolved = log.incidents[idx].clone();
        tracing::info!(id = resolved.id, duration = ?resolved.duration, "incident resolved");
        Ok(Some(resolved))
    }

    pub async fn active_incident(&self) -> Option<Incident> {
        self.state
            .lock()
            .await
            .incidents
            .iter()
            .find(|i| i.is_active())
            .cloned()
    }

    /// Newest first, any status.
    pub async fn recent(&self, limit: usize) -> Vec<Incident> {
        let log = self.state.lock().await;
        let mut all = log.incidents.clone();
        all.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        all.truncate(limit);
        all
    }

    /// Newest first, resolved only.
    pub async fn history(&self, limit: usize) -> Vec<Incident> {
        let log = self.state.lock().await;
        let mut resolved: Vec<Incident> = log
            .incidents
            .iter()
            .filter(|i| !i.is_active())
            .cloned()
            .collect();
        resolved.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        resolved.truncate(limit);
        resolved
    }

    /// The most recently started incident, regardless of status.
    pub async fn latest(&self) -> Option<Incident> {
        self.recent(1).await.into_iter().next()
    }

    pub async fn count(&self) -> usize {
        self.state.lock().await.incidents.len()
    }

    /// Full history as CSV (Moscow time), newest first.
    pub async fn export_csv(&self) -> String {
        let all = self.recent(usize::MAX).await;
        let mut out = String::from(CSV_HEADER);
        out.push('\n');
        for inc in &all {
            out.push_str(&inc.csv_row());
            out.push('\n');
        }
        out
    }
}
