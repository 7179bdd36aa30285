//! Background status monitor.
//!
//! Polls the status source, turns transitions between snapshots into
//! notifications, and keeps the incident log and metrics up to date.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    dedup::AlertDeduplicator,
    dispatcher::{Delivery, Notification, NotificationDispatcher, NotificationKind},
    domain::{ChatId, MessageRef},
    formatting::{
        admin_fetch_warning, all_ok_notice, duration_between, outage_alert, recovery_notice,
        status_keyboard,
    },
    incidents::{Incident, IncidentStatus, IncidentTracker},
    metrics::MetricsCollector,
    status::{StatusSnapshot, StatusSource},
};

/// A resolved incident younger than this is announced again on startup.
pub const RECENT_INCIDENT_HOURS: i64 = 24;
/// Consecutive fetch failures before the admin is warned (and every multiple after).
pub const ADMIN_ALERT_THRESHOLD: u32 = 5;
const DISABLED_POLL: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    pub alert_on_issues: bool,
    pub alert_on_recovery: bool,
    pub admin_chat_id: Option<ChatId>,
}

impl MonitorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            check_interval: cfg.check_interval,
            alert_on_issues: cfg.alert_on_issues,
            alert_on_recovery: cfg.alert_on_recovery,
            admin_chat_id: cfg.admin_chat_id.map(ChatId),
        }
    }
}

/// What a single check did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    FetchFailed { consecutive_errors: u32, admin_warned: bool },
    /// First check after startup while the service is healthy.
    Initial { announced: bool },
    OutageStarted { alerted: bool },
    OutageOngoing { updated: usize },
    Recovered { announced: bool },
    Unchanged,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MonitorHealth {
    pub enabled: bool,
    pub last_successful_check: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub outage_since: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MonitorState {
    previous: Option<StatusSnapshot>,
    alert_messages: HashMap<ChatId, MessageRef>,
    issue_started: Option<DateTime<Utc>>,
    consecutive_errors: u32,
    last_error: Option<String>,
    last_successful_check: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct StatusMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    source: Arc<dyn StatusSource>,
    dispatcher: NotificationDispatcher,
    incidents: Arc<IncidentTracker>,
    metrics: Arc<MetricsCollector>,
    dedup: Arc<AlertDeduplicator>,
    settings: MonitorSettings,
    enabled: AtomicBool,
    state: Mutex<MonitorState>,
    /// Copy of the health fields, refreshed after every check so readers never
    /// wait on a dispatch in progress.
    published: Mutex<MonitorHealth>,
}

impl StatusMonitor {
    pub fn new(
        source: Arc<dyn StatusSource>,
        dispatcher: NotificationDispatcher,
        incidents: Arc<IncidentTracker>,
        metrics: Arc<MetricsCollector>,
        dedup: Arc<AlertDeduplicator>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                source,
                dispatcher,
                incidents,
                metrics,
                dedup,
                settings,
                enabled: AtomicBool::new(true),
                state: Mutex::new(MonitorState::default()),
                published: Mutex::new(MonitorHealth::default()),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let was = self.inner.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            tracing::info!(enabled, "monitoring toggled");
        }
    }

    pub async fn health(&self) -> MonitorHealth {
        MonitorHealth {
            enabled: self.is_enabled(),
            ..self.inner.published.lock().await.clone()
        }
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move { monitor.run(cancel).await })
    }

    /// Poll until `cancel` fires. The first check runs immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = self.inner.settings.check_interval;
        tracing::info!(
            url = self.inner.source.url(),
            interval_secs = interval.as_secs(),
            "status monitor started"
        );

        loop {
            let wait = if self.is_enabled() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    transition = self.check_once() => {
                        tracing::debug!(?transition, "status check finished");
                    }
                }
                interval
            } else {
                DISABLED_POLL
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        tracing::info!("status monitor stopped");
    }

    /// Fetch one snapshot and act on it.
    pub async fn check_once(&self) -> Transition {
        let inner = &self.inner;
        let started = Instant::now();
        let snap = inner.source.fetch().await;
        inner.metrics.record_check(started.elapsed(), !snap.error).await;

        let mut st = inner.state.lock().await;
        let transition = if snap.error {
            inner.on_fetch_error(&mut st, &snap).await
        } else {
            inner.on_snapshot(&mut st, snap).await
        };
        inner.publish(&st).await;
        transition
    }
}

impl MonitorInner {
    fn url(&self) -> &str {
        self.source.url()
    }

    async fn publish(&self, st: &MonitorState) {
        *self.published.lock().await = MonitorHealth {
            enabled: false,
            last_successful_check: st.last_successful_check,
            consecutive_errors: st.consecutive_errors,
            last_error: st.last_error.clone(),
            outage_since: st.issue_started,
        };
    }

    async fn on_snapshot(&self, st: &mut MonitorState, snap: StatusSnapshot) -> Transition {
        let now = Utc::now();
        st.consecutive_errors = 0;
        st.last_error = None;
        st.last_successful_check = Some(now);
        tracing::info!(has_issues = snap.has_issues, "status checked");

        let transition = match st.previous.take() {
            None => self.on_first_check(st, &snap, now).await,
            Some(prev) => self.on_next_check(st, &prev, &snap, now).await,
        };
        st.previous = Some(snap);
        transition
    }

    async fn on_fetch_error(&self, st: &mut MonitorState, snap: &StatusSnapshot) -> Transition {
        st.consecutive_errors += 1;
        st.last_error = Some(snap.message.clone());
        let count = st.consecutive_errors;
        tracing::warn!(consecutive_errors = count, message = %snap.message, "status fetch failed");

        let mut admin_warned = false;
        if let Some(admin) = self.settings.admin_chat_id {
            if count >= ADMIN_ALERT_THRESHOLD && count % ADMIN_ALERT_THRESHOLD == 0 {
                let n = Notification::new(
                    NotificationKind::AdminWarning,
                    admin_fetch_warning(count, &snap.message),
                );
                let outcome = self.dispatcher.send_to(admin, &n).await;
                admin_warned = outcome.is_success();
                if !admin_warned {
                    tracing::warn!(?outcome, "failed to warn admin about fetch errors");
                }
            }
        }
        Transition::FetchFailed {
            consecutive_errors: count,
            admin_warned,
        }
    }

    async fn on_first_check(
        &self,
        st: &mut MonitorState,
        snap: &StatusSnapshot,
        now: DateTime<Utc>,
    ) -> Transition {
        let active = self.incidents.active_incident().await;
        tracing::info!(has_issues = snap.has_issues, active_incident = active.is_some(), "first check after startup");

        if snap.has_issues {
            let started = match active {
                Some(inc) => inc.start_time,
                None => self.open_incident(snap, now).await,
            };
            st.issue_started = Some(started);
            if !self.settings.alert_on_issues {
                return Transition::OutageStarted { alerted: false };
            }
            let alerted = self.send_outage_alert(st, snap, started, now).await;
            return Transition::OutageStarted { alerted };
        }

        if active.is_some() {
            let ended = self.close_incident(now).await;
            if !self.settings.alert_on_recovery {
                tracing::info!("closed incident left open by the previous run");
                return Transition::Recovered { announced: false };
            }
            let (region, duration) = ended
                .map(|inc| (inc.region, inc.duration))
                .unwrap_or_default();
            let html = recovery_notice(&region, self.url(), duration.as_deref(), now);
            self.announce_recovery(&html, &HashMap::new()).await;
            return Transition::Recovered { announced: true };
        }

        if !self.settings.alert_on_recovery {
            return Transition::Initial { announced: false };
        }

        match self.incidents.latest().await {
            Some(inc) if inc.status == IncidentStatus::Resolved => {
                let recent = inc
                    .end_time
                    .is_some_and(|end| now - end < chrono::Duration::hours(RECENT_INCIDENT_HOURS));
                if !recent {
                    tracing::info!(id = inc.id, "last incident is old, nothing to announce");
                    return Transition::Initial { announced: false };
                }
                let duration = inc.duration.as_deref().unwrap_or("N/A");
                let html = recovery_notice(&inc.region, self.url(), Some(duration), now);
                self.announce_recovery(&html, &HashMap::new()).await;
                Transition::Recovered { announced: true }
            }
            _ => {
                let n = Notification::new(NotificationKind::Info, all_ok_notice(self.url(), now))
                    .with_keyboard(status_keyboard());
                let report = self.dispatcher.broadcast(&n).await;
                Transition::Initial {
                    announced: report.delivered() > 0,
                }
            }
        }
    }

    async fn on_next_check(
        &self,
        st: &mut MonitorState,
        prev: &StatusSnapshot,
        snap: &StatusSnapshot,
        now: DateTime<Utc>,
    ) -> Transition {
        match (prev.has_issues, snap.has_issues) {
            (false, true) => {
                let started = self.open_incident(snap, now).await;
                st.issue_started = Some(started);
                st.alert_messages.clear();
                if !self.settings.alert_on_issues {
                    return Transition::OutageStarted { alerted: false };
                }
                let alerted = self.send_outage_alert(st, snap, started, now).await;
                Transition::OutageStarted { alerted }
            }
            (true, false) => {
                let ended = self.close_incident(now).await;
                let mut announced = false;
                if self.settings.alert_on_recovery {
                    let duration = st
                        .issue_started
                        .map(|start| duration_between(start, now))
                        .or_else(|| ended.as_ref().and_then(|i| i.duration.clone()));
                    let region = ended
                        .as_ref()
                        .map(|i| i.region.clone())
                        .unwrap_or_else(|| prev.region.clone());
                    let html = recovery_notice(&region, self.url(), duration.as_deref(), now);
                    self.announce_recovery(&html, &st.alert_messages).await;
                    announced = true;
                }
                st.alert_messages.clear();
                st.issue_started = None;
                Transition::Recovered { announced }
            }
            (true, true) => {
                let Some(started) = st.issue_started else {
                    return Transition::OutageOngoing { updated: 0 };
                };
                if st.alert_messages.is_empty() {
                    return Transition::OutageOngoing { updated: 0 };
                }
                let duration = duration_between(started, now);
                let html = outage_alert(snap, self.url(), Some(started), Some(&duration), now);
                let n = Notification::new(NotificationKind::OutageUpdate, html)
                    .with_keyboard(status_keyboard());
                let targets = st
                    .alert_messages
                    .values()
                    .map(|m| (m.chat_id, Delivery::Edit(*m)))
                    .collect();
                let report = self.dispatcher.dispatch(&n, targets).await;
                for (from, to) in report.migrations() {
                    tracing::info!(from = from.0, to = to.0, "alert now lives in migrated chat");
                    st.alert_messages.remove(&from);
                }
                for gone in report.removed() {
                    st.alert_messages.remove(&gone);
                }
                st.alert_messages.extend(report.message_refs());
                Transition::OutageOngoing {
                    updated: report.delivered(),
                }
            }
            (false, false) => Transition::Unchanged,
        }
    }

    /// Start (or reuse) the incident, returning its start time.
    async fn open_incident(&self, snap: &StatusSnapshot, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.incidents.start_incident(snap, now).await {
            Ok(inc) => inc.start_time,
            Err(e) => {
                tracing::error!(error = %e, "failed to record incident");
                now
            }
        }
    }

    async fn close_incident(&self, now: DateTime<Utc>) -> Option<Incident> {
        match self.incidents.end_incident(now).await {
            Ok(ended) => ended,
            Err(e) => {
                tracing::error!(error = %e, "failed to close incident");
                None
            }
        }
    }

    async fn send_outage_alert(
        &self,
        st: &mut MonitorState,
        snap: &StatusSnapshot,
        started: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self
            .dedup
            .should_send(&snap.components, snap.status_label(), &snap.region)
            .await
        {
            return false;
        }

        let html = outage_alert(snap, self.url(), Some(started), None, now);
        let n = Notification::new(NotificationKind::Outage, html).with_keyboard(status_keyboard());
        let report = self.dispatcher.broadcast(&n).await;
        st.alert_messages = report.message_refs();
        if report.delivered() == 0 {
            tracing::warn!(total = report.total(), "outage alert reached nobody");
            return false;
        }
        self.metrics.record_alert().await;
        true
    }

    async fn announce_recovery(&self, html: &str, previous: &HashMap<ChatId, MessageRef>) {
        let n = Notification::new(NotificationKind::Recovery, html).with_keyboard(status_keyboard());
        let report = self.dispatcher.broadcast_editing(&n, previous).await;
        if report.delivered() > 0 {
            self.metrics.record_recovery().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dispatcher::DispatcherConfig,
        retry::RetryPolicy,
        subscribers::SubscriberStore,
        testing::FakeMessenger,
    };
    use async_trait::async_trait;
    use std::{collections::VecDeque, sync::Mutex as StdMutex};

    /// Serves scripted snapshots; the last one repeats.
    struct ScriptedSource {
        script: StdMutex<VecDeque<StatusSnapshot>>,
    }

    impl ScriptedSource {
        fn new(snaps: Vec<StatusSnapshot>) -> Self {
            Self {
                script: StdMutex::new(snaps.into()),
            }
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        fn url(&self) -> &str {
            "https://status.example/"
        }

        async fn fetch(&self) -> StatusSnapshot {
            let mut q = self.script.lock().unwrap();
            if q.len() > 1 {
                q.pop_front().unwrap()
            } else {
                q.front().cloned().unwrap_or_default()
            }
        }

        async fn check_availability(&self) -> bool {
            true
        }
    }

    fn ok() -> StatusSnapshot {
        StatusSnapshot::default()
    }

    fn down() -> StatusSnapshot {
        StatusSnapshot {
            has_issues: true,
            region: ".ru".to_string(),
            components: vec!["CRM".to_string()],
            description: "Проблемы с CRM".to_string(),
            ..StatusSnapshot::default()
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        fake: Arc<FakeMessenger>,
        incidents: Arc<IncidentTracker>,
        metrics: Arc<MetricsCollector>,
        monitor: StatusMonitor,
    }

    async fn harness(snaps: Vec<StatusSnapshot>, settings: MonitorSettings) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SubscriberStore::open(dir.path().join("subs.json"))
                .await
                .unwrap(),
        );
        store.add(ChatId(1)).await.unwrap();
        store.add(ChatId(2)).await.unwrap();
        let incidents = Arc::new(
            IncidentTracker::open(dir.path().join("incidents.json"))
                .await
                .unwrap(),
        );
        let metrics = Arc::new(MetricsCollector::open(dir.path().join("metrics.json")).await);
        let fake = Arc::new(FakeMessenger::default());
        let dispatcher = NotificationDispatcher::new(
            fake.clone(),
            store,
            vec![],
            DispatcherConfig {
                concurrency: 2,
                send_timeout: Duration::from_secs(5),
                retry: RetryPolicy::new(1, Duration::from_millis(1)),
                remove_on_permanent: true,
            },
        );
        let monitor = StatusMonitor::new(
            Arc::new(ScriptedSource::new(snaps)),
            dispatcher,
            incidents.clone(),
            metrics.clone(),
            Arc::new(AlertDeduplicator::new(
                Duration::from_secs(300),
                Duration::from_secs(30),
            )),
            settings,
        );
        Harness {
            _dir: dir,
            fake,
            incidents,
            metrics,
            monitor,
        }
    }

    fn settings() -> MonitorSettings {
        MonitorSettings {
            check_interval: Duration::from_secs(60),
            alert_on_issues: true,
            alert_on_recovery: true,
            admin_chat_id: Some(ChatId(99)),
        }
    }

    fn quiet_start() -> MonitorSettings {
        MonitorSettings {
            alert_on_recovery: false,
            ..settings()
        }
    }

    #[tokio::test]
    async fn outage_then_recovery_edits_the_alert() {
        let h = harness(vec![ok(), down(), down(), ok()], settings()).await;

        assert_eq!(
            h.monitor.check_once().await,
            Transition::Initial { announced: true }
        );
        assert!(h.fake.keyboards()[0].1.contains("работает нормально"));

        assert_eq!(
            h.monitor.check_once().await,
            Transition::OutageStarted { alerted: true }
        );
        assert!(h.incidents.active_incident().await.is_some());
        let alerts: Vec<_> = h
            .fake
            .keyboards()
            .into_iter()
            .filter(|(_, html, _)| html.contains("АЛЕРТ"))
            .collect();
        assert_eq!(alerts.len(), 2);

        assert_eq!(
            h.monitor.check_once().await,
            Transition::OutageOngoing { updated: 2 }
        );

        assert_eq!(
            h.monitor.check_once().await,
            Transition::Recovered { announced: true }
        );
        assert!(h.incidents.active_incident().await.is_none());
        assert_eq!(h.incidents.history(10).await.len(), 1);

        let recoveries = h
            .fake
            .keyboards()
            .into_iter()
            .filter(|(_, html, _)| html.contains("СЕРВИС ВОССТАНОВЛЕН"))
            .count();
        assert_eq!(recoveries, 2);

        let m = h.metrics.snapshot().await;
        assert_eq!(m.alerts_sent, 1);
        assert_eq!(m.recoveries_sent, 1);
        assert_eq!(m.total_checks, 4);
        assert_eq!(h.monitor.health().await.outage_since, None);
    }

    #[tokio::test]
    async fn first_check_with_outage_alerts_and_reuses_incident() {
        let h = harness(vec![down()], settings()).await;
        let earlier = Utc::now() - chrono::Duration::minutes(30);
        let existing = h.incidents.start_incident(&down(), earlier).await.unwrap();

        assert_eq!(
            h.monitor.check_once().await,
            Transition::OutageStarted { alerted: true }
        );
        assert_eq!(h.incidents.count().await, 1);
        assert_eq!(
            h.monitor.health().await.outage_since,
            Some(existing.start_time)
        );
    }

    #[tokio::test]
    async fn first_check_closes_stale_active_incident() {
        let h = harness(vec![ok()], settings()).await;
        h.incidents
            .start_incident(&down(), Utc::now() - chrono::Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(
            h.monitor.check_once().await,
            Transition::Recovered { announced: true }
        );
        assert!(h.incidents.active_incident().await.is_none());
    }

    #[tokio::test]
    async fn quiet_start_still_closes_leftover_incident() {
        let h = harness(vec![ok(), down()], quiet_start()).await;
        let stale = Utc::now() - chrono::Duration::days(3);
        h.incidents.start_incident(&down(), stale).await.unwrap();

        assert_eq!(
            h.monitor.check_once().await,
            Transition::Recovered { announced: false }
        );
        assert!(h.incidents.active_incident().await.is_none());
        assert!(h.fake.keyboards().is_empty());

        assert_eq!(
            h.monitor.check_once().await,
            Transition::OutageStarted { alerted: true }
        );
        let active = h.incidents.active_incident().await.unwrap();
        assert!(active.start_time > stale + chrono::Duration::days(2));
        assert_eq!(h.incidents.count().await, 2);
    }

    #[tokio::test]
    async fn first_check_announces_recent_recovery() {
        let h = harness(vec![ok()], settings()).await;
        let start = Utc::now() - chrono::Duration::hours(2);
        h.incidents.start_incident(&down(), start).await.unwrap();
        h.incidents
            .end_incident(start + chrono::Duration::minutes(10))
            .await
            .unwrap();

        assert_eq!(
            h.monitor.check_once().await,
            Transition::Recovered { announced: true }
        );
        assert!(h.fake.keyboards()[0].1.contains("00:10:00"));
    }

    #[tokio::test]
    async fn old_incident_is_not_announced() {
        let h = harness(vec![ok()], settings()).await;
        let start = Utc::now() - chrono::Duration::hours(30);
        h.incidents.start_incident(&down(), start).await.unwrap();
        h.incidents
            .end_incident(start + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(
            h.monitor.check_once().await,
            Transition::Initial { announced: false }
        );
        assert!(h.fake.keyboards().is_empty());
    }

    #[tokio::test]
    async fn duplicate_outage_is_recorded_but_not_sent() {
        let h = harness(vec![ok(), down(), ok(), down()], quiet_start()).await;
        h.monitor.check_once().await;
        assert_eq!(
            h.monitor.check_once().await,
            Transition::OutageStarted { alerted: true }
        );
        h.monitor.check_once().await;
        assert_eq!(
            h.monitor.check_once().await,
            Transition::OutageStarted { alerted: false }
        );
        assert_eq!(h.incidents.count().await, 2);
        assert!(h.incidents.active_incident().await.is_some());
    }

    #[tokio::test]
    async fn migrated_chat_keeps_a_single_alert() {
        let h = harness(vec![ok(), down(), down(), down(), down()], quiet_start()).await;
        h.fake.migrate_edits(2, 1002);

        h.monitor.check_once().await;
        assert_eq!(
            h.monitor.check_once().await,
            Transition::OutageStarted { alerted: true }
        );
        for _ in 0..3 {
            assert_eq!(
                h.monitor.check_once().await,
                Transition::OutageOngoing { updated: 2 }
            );
        }

        let edits_in_new_chat = h
            .fake
            .keyboard_edits()
            .iter()
            .filter(|(m, _)| m.chat_id == ChatId(1002))
            .count();
        let messages_in_new_chat = h
            .fake
            .keyboards()
            .iter()
            .filter(|(c, _, _)| *c == ChatId(1002))
            .count()
            - edits_in_new_chat;
        assert_eq!(messages_in_new_chat, 1);
        assert_eq!(edits_in_new_chat, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn health_is_readable_during_a_slow_dispatch() {
        let h = harness(vec![down()], settings()).await;
        h.fake.set_latency(Duration::from_secs(3));
        let monitor = h.monitor.clone();
        let check = tokio::spawn(async move { monitor.check_once().await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        let health = tokio::time::timeout(Duration::from_millis(10), h.monitor.health())
            .await
            .expect("health waits for the dispatch");
        assert_eq!(health.outage_since, None);

        assert_eq!(
            check.await.unwrap(),
            Transition::OutageStarted { alerted: true }
        );
        assert!(h.monitor.health().await.outage_since.is_some());
    }

    #[tokio::test]
    async fn admin_is_warned_after_repeated_fetch_errors() {
        let h = harness(vec![StatusSnapshot::failed("boom")], settings()).await;

        for expected in 1..ADMIN_ALERT_THRESHOLD {
            assert_eq!(
                h.monitor.check_once().await,
                Transition::FetchFailed {
                    consecutive_errors: expected,
                    admin_warned: false
                }
            );
        }
        assert_eq!(
            h.monitor.check_once().await,
            Transition::FetchFailed {
                consecutive_errors: ADMIN_ALERT_THRESHOLD,
                admin_warned: true
            }
        );
        let warnings = h.fake.sent_to(99);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Ошибок подряд: <code>5</code>"));

        let health = h.monitor.health().await;
        assert_eq!(health.consecutive_errors, 5);
        assert_eq!(health.last_error.as_deref(), Some("boom"));
        assert_eq!(h.metrics.snapshot().await.failed_checks, 5);
    }

    #[tokio::test]
    async fn alerts_can_be_switched_off() {
        let h = harness(
            vec![ok(), down()],
            MonitorSettings {
                alert_on_issues: false,
                ..quiet_start()
            },
        )
        .await;
        h.monitor.check_once().await;
        assert_eq!(
            h.monitor.check_once().await,
            Transition::OutageStarted { alerted: false }
        );
        assert!(h.fake.keyboards().is_empty());
        assert!(h.incidents.active_incident().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let h = harness(vec![ok()], quiet_start()).await;
        let cancel = CancellationToken::new();
        let handle = h.monitor.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(130)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(h.metrics.snapshot().await.total_checks >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_monitor_does_not_poll() {
        let h = harness(vec![ok()], quiet_start()).await;
        h.monitor.set_enabled(false);
        let cancel = CancellationToken::new();
        let handle = h.monitor.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(300)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(h.metrics.snapshot().await.total_checks, 0);
        assert!(!h.monitor.health().await.enabled);
    }
}
