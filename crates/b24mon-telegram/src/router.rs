use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio_util::sync::CancellationToken;

use b24mon_core::{
    config::Config,
    dedup::AlertDeduplicator,
    dispatcher::{DispatcherConfig, NotificationDispatcher},
    domain::ChatId,
    incidents::IncidentTracker,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    metrics::MetricsCollector,
    monitor::{MonitorSettings, StatusMonitor},
    status::{StatusClient, StatusSource},
    subscribers::SubscriberStore,
};

use crate::handlers;
use crate::TelegramMessenger;

/// Everything a handler can reach.
pub struct AppState {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub store: Arc<SubscriberStore>,
    pub incidents: Arc<IncidentTracker>,
    pub metrics: Arc<MetricsCollector>,
    pub dedup: Arc<AlertDeduplicator>,
    pub status: Arc<dyn StatusSource>,
    pub monitor: StatusMonitor,
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.user.username.clone().unwrap_or_default(), "bot authorized"),
        Err(e) => tracing::warn!(error = %e, "getMe failed, continuing"),
    }

    // Alerts fan out to every subscriber at once; the throttle keeps the burst
    // under Telegram's flood limits. The adapter still retries on RetryAfter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let store = Arc::new(SubscriberStore::open(cfg.subscribers_file.clone()).await?);
    let incidents = Arc::new(IncidentTracker::open(cfg.incidents_file.clone()).await?);
    let metrics = Arc::new(MetricsCollector::open(cfg.metrics_file.clone()).await);
    let dedup = Arc::new(AlertDeduplicator::new(cfg.dedup_window, cfg.group_interval));
    let status: Arc<dyn StatusSource> = Arc::new(StatusClient::from_config(&cfg)?);

    let groups: Vec<ChatId> = cfg.alert_groups.iter().copied().map(ChatId).collect();
    let dispatcher = NotificationDispatcher::new(
        messenger.clone(),
        store.clone(),
        groups,
        DispatcherConfig::from_config(&cfg),
    );
    let monitor = StatusMonitor::new(
        status.clone(),
        dispatcher,
        incidents.clone(),
        metrics.clone(),
        dedup.clone(),
        MonitorSettings::from_config(&cfg),
    );

    tracing::info!(
        url = %cfg.status_url,
        interval_secs = cfg.check_interval.as_secs(),
        subscribers = store.count().await,
        groups = cfg.alert_groups.len(),
        "bot started"
    );

    let cancel = CancellationToken::new();
    let monitor_task = monitor.spawn(cancel.clone());

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        messenger,
        store,
        incidents,
        metrics,
        dedup,
        status,
        monitor,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build();

    #[cfg(unix)]
    {
        let token = dispatcher.shutdown_token();
        tokio::spawn(async move {
            let Ok(mut term) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            else {
                tracing::warn!("failed to install SIGTERM handler");
                return;
            };
            term.recv().await;
            tracing::info!("SIGTERM received, shutting down");
            match token.shutdown() {
                Ok(done) => done.await,
                Err(e) => tracing::debug!(error = %e, "dispatcher was not running"),
            }
        });
    }

    dispatcher.dispatch().await;

    tracing::info!("stopping status monitor");
    cancel.cancel();
    if let Err(e) = monitor_task.await {
        tracing::error!(error = %e, "status monitor task failed");
    }
    tracing::info!("bot stopped");
    Ok(())
}
