//! End-to-end flows through the public API: status page -> monitor ->
//! dispatcher -> messenger, plus the health check.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use b24mon_core::{
    config::Config,
    dedup::AlertDeduplicator,
    dispatcher::{
        DispatcherConfig, Notification, NotificationDispatcher, NotificationKind, Outcome,
    },
    domain::{ChatId, MessageId, MessageRef},
    health::HealthCheck,
    incidents::{IncidentStatus, IncidentTracker},
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    metrics::MetricsCollector,
    monitor::{MonitorSettings, StatusMonitor, Transition},
    retry::RetryPolicy,
    status::StatusClient,
    subscribers::SubscriberStore,
    Error, Result,
};

const OUTAGE_PAGE: &str = r#"<html><body>
    <h2>ВРЕМЕННЫЙ СБОЙ</h2>
    <p>Наблюдаются проблемы с доступом к порталам в зоне .ru.</p>
  </body></html>"#;

const OK_PAGE: &str = r#"<html><body><h2>ВСЕ ОТЛИЧНО РАБОТАЕТ</h2></body></html>"#;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    Sent { chat: i64, html: String },
    Edited { chat: i64, message: i32, html: String },
}

/// Records traffic; chats in `blocked` reject everything.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
    blocked: Mutex<HashSet<i64>>,
    next_id: Mutex<i32>,
}

impl Recorder {
    fn block(&self, chat: i64) {
        self.blocked.lock().unwrap().insert(chat);
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn check(&self, chat: ChatId) -> Result<()> {
        if self.blocked.lock().unwrap().contains(&chat.0) {
            return Err(Error::Recipient {
                chat_id: chat.0,
                reason: "bot was blocked by the user".to_string(),
            });
        }
        Ok(())
    }

    fn record_send(&self, chat: ChatId, html: &str) -> Result<MessageRef> {
        self.check(chat)?;
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        self.events.lock().unwrap().push(Event::Sent {
            chat: chat.0,
            html: html.to_string(),
        });
        Ok(MessageRef {
            chat_id: chat,
            message_id: MessageId(*id),
        })
    }

    fn record_edit(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.check(msg.chat_id)?;
        self.events.lock().unwrap().push(Event::Edited {
            chat: msg.chat_id.0,
            message: msg.message_id.0,
            html: html.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl MessagingPort for Recorder {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_edit: true,
            supports_documents: false,
            supports_inline_keyboards: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.record_send(chat_id, html)
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.record_edit(msg, html)
    }

    async fn delete_message(&self, _msg: MessageRef) -> Result<()> {
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        _keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.record_send(chat_id, html)
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        html: &str,
        _keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.record_edit(msg, html)
    }

    async fn send_document(
        &self,
        _chat_id: ChatId,
        _file_name: &str,
        _bytes: Vec<u8>,
        _caption: Option<&str>,
    ) -> Result<MessageRef> {
        Err(Error::External("documents not supported".to_string()))
    }

    async fn answer_callback_query(&self, _callback_id: &str, _text: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn probe(&self) -> Result<String> {
        Ok("recorder_bot".to_string())
    }
}

fn dispatcher_cfg() -> DispatcherConfig {
    DispatcherConfig {
        concurrency: 2,
        send_timeout: Duration::from_secs(2),
        retry: RetryPolicy::new(2, Duration::from_millis(5)),
        remove_on_permanent: true,
    }
}

#[tokio::test]
async fn outage_is_announced_then_edited_into_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(OUTAGE_PAGE))
        .mount(&server)
        .await;

    let store = Arc::new(
        SubscriberStore::open(dir.path().join("subscribers.json"))
            .await
            .unwrap(),
    );
    store.add(ChatId(1)).await.unwrap();
    store.add(ChatId(2)).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let dispatcher = NotificationDispatcher::new(
        recorder.clone(),
        store.clone(),
        vec![ChatId(-100)],
        dispatcher_cfg(),
    );
    let incidents = Arc::new(
        IncidentTracker::open(dir.path().join("incidents.json"))
            .await
            .unwrap(),
    );
    let metrics = Arc::new(MetricsCollector::open(dir.path().join("metrics.json")).await);
    let source = Arc::new(
        StatusClient::new(
            server.uri(),
            Duration::from_secs(2),
            RetryPolicy::new(1, Duration::from_millis(5)),
            Duration::ZERO,
        )
        .unwrap(),
    );
    let monitor = StatusMonitor::new(
        source,
        dispatcher,
        incidents.clone(),
        metrics.clone(),
        Arc::new(AlertDeduplicator::new(
            Duration::from_secs(300),
            Duration::from_secs(30),
        )),
        MonitorSettings {
            check_interval: Duration::from_secs(60),
            alert_on_issues: true,
            alert_on_recovery: true,
            admin_chat_id: None,
        },
    );

    assert_eq!(
        monitor.check_once().await,
        Transition::OutageStarted { alerted: true }
    );
    let alerts: HashMap<i64, (i32, String)> = recorder
        .events()
        .into_iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            Event::Sent { chat, html } => Some((chat, (i as i32 + 1, html))),
            _ => None,
        })
        .collect();
    assert_eq!(alerts.len(), 3, "group and both subscribers get the alert");
    assert!(alerts.values().all(|(_, html)| !html.is_empty()));
    assert!(incidents.active_incident().await.is_some());

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(OK_PAGE))
        .mount(&server)
        .await;

    assert_eq!(
        monitor.check_once().await,
        Transition::Recovered { announced: true }
    );
    let edits: Vec<(i64, i32, String)> = recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Edited { chat, message, html } => Some((chat, message, html)),
            _ => None,
        })
        .collect();
    assert_eq!(edits.len(), 3, "each alert is edited in place");
    for (chat, message, html) in &edits {
        assert_eq!(alerts[chat].0, *message, "edit targets the alert of chat {chat}");
        assert_ne!(&alerts[chat].1, html);
    }

    let history = incidents.history(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, IncidentStatus::Resolved);

    let m = metrics.snapshot().await;
    assert_eq!(m.total_checks, 2);
    assert_eq!(m.alerts_sent, 1);
    assert_eq!(m.recoveries_sent, 1);
}

#[tokio::test]
async fn blocked_subscriber_is_dropped_but_others_still_receive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("subscribers.json");
    let store = Arc::new(SubscriberStore::open(&path).await.unwrap());
    for id in [10, 20, 30] {
        assert!(store.add(ChatId(id)).await.unwrap());
    }
    assert!(!store.add(ChatId(10)).await.unwrap());

    let recorder = Arc::new(Recorder::default());
    recorder.block(20);
    recorder.block(-5);
    let dispatcher = NotificationDispatcher::new(
        recorder.clone(),
        store.clone(),
        vec![ChatId(-5)],
        dispatcher_cfg(),
    );

    let report = dispatcher
        .broadcast(&Notification::new(NotificationKind::Info, "hello"))
        .await;
    assert_eq!(report.total(), 4);
    assert_eq!(report.delivered(), 2);
    assert_eq!(report.removed(), vec![ChatId(20)]);
    assert!(matches!(
        report.outcome_for(ChatId(-5)),
        Some(Outcome::PermanentFailure { removed: false, .. })
    ));

    // The removal is persisted.
    let reopened = SubscriberStore::open(&path).await.unwrap();
    assert_eq!(reopened.ids().await, vec![ChatId(10), ChatId(30)]);
}

#[tokio::test]
async fn health_check_reports_unusable_storage() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let vars: HashMap<&str, String> = HashMap::from([
        ("BOT_TOKEN", "123456:abcdef".to_string()),
        ("LOG_FILE", String::new()),
        (
            "SUBSCRIBERS_FILE",
            blocker.join("subscribers.json").display().to_string(),
        ),
        (
            "INCIDENTS_FILE",
            dir.path().join("incidents.json").display().to_string(),
        ),
        (
            "METRICS_FILE",
            dir.path().join("metrics.json").display().to_string(),
        ),
    ]);
    let cfg = Config::from_lookup(|key| vars.get(key).cloned());

    let report = HealthCheck::new(&cfg).offline(true).run().await;
    assert!(!report.is_healthy());
    assert_eq!(report.exit_code(), 3);

    let fixed = Config {
        subscribers_file: dir.path().join("subscribers.json"),
        ..cfg
    };
    let report = HealthCheck::new(&fixed)
        .offline(true)
        .with_messenger(Arc::new(Recorder::default()))
        .run()
        .await;
    assert_eq!(report.exit_code(), 0, "{report}");
}
