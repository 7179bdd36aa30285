//! Fan-out of notifications to alert groups and subscribers.
//!
//! Every recipient is delivered to in its own task. Tasks share a semaphore
//! that bounds the number of in-flight API calls, each call runs under a
//! timeout, and transient failures are retried with backoff. One recipient's
//! failure never affects another's delivery.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::Semaphore, task::JoinSet, time::timeout};

use crate::{
    config::Config,
    domain::{ChatId, MessageRef},
    errors::Error,
    messaging::{port::MessagingPort, types::InlineKeyboard},
    retry::RetryPolicy,
    subscribers::SubscriberStore,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    Outage,
    OutageUpdate,
    Recovery,
    Info,
    AdminWarning,
}

/// A rendered notification, ready to be sent.
#[derive(Clone, Debug)]
pub struct Notification {
    pub kind: NotificationKind,
    pub html: String,
    pub keyboard: Option<InlineKeyboard>,
}

impl Notification {
    pub fn new(kind: NotificationKind, html: impl Into<String>) -> Self {
        Self {
            kind,
            html: html.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// How to reach one recipient.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Send,
    /// Edit an earlier message in place; falls back to a fresh send if the
    /// message can no longer be edited.
    Edit(MessageRef),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Delivered { message: MessageRef, attempts: u32 },
    Edited { message: MessageRef, attempts: u32 },
    /// The chat moved; the notification went to the new id.
    Migrated { to: ChatId, message: MessageRef },
    /// Still failing after every retry.
    TransientFailure { error: String, attempts: u32 },
    /// The recipient rejected the message for good.
    PermanentFailure { error: String, removed: bool },
    Failed { error: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Outcome::Delivered { .. } | Outcome::Edited { .. } | Outcome::Migrated { .. }
        )
    }

    pub fn message(&self) -> Option<MessageRef> {
        match self {
            Outcome::Delivered { message, .. }
            | Outcome::Edited { message, .. }
            | Outcome::Migrated { message, .. } => Some(*message),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipientOutcome {
    pub chat_id: ChatId,
    pub outcome: Outcome,
}

#[derive(Clone, Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<RecipientOutcome>,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.delivered()
    }

    /// Subscribers dropped from the store because they rejected delivery.
    pub fn removed(&self) -> Vec<ChatId> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::PermanentFailure { removed: true, .. }))
            .map(|o| o.chat_id)
            .collect()
    }

    /// `(old, new)` ids of chats that turned out to have migrated.
    pub fn migrations(&self) -> Vec<(ChatId, ChatId)> {
        self.outcomes
            .iter()
            .filter_map(|o| match o.outcome {
                Outcome::Migrated { to, .. } => Some((o.chat_id, to)),
                _ => None,
            })
            .collect()
    }

    /// Message handles keyed by the chat they now live in (the new id for
    /// migrated chats), for later in-place edits.
    pub fn message_refs(&self) -> HashMap<ChatId, MessageRef> {
        self.outcomes
            .iter()
            .filter_map(|o| o.outcome.message())
            .map(|m| (m.chat_id, m))
            .collect()
    }

    pub fn outcome_for(&self, chat_id: ChatId) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.chat_id == chat_id)
            .map(|o| &o.outcome)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    pub concurrency: usize,
    pub send_timeout: Duration,
    pub retry: RetryPolicy,
    pub remove_on_permanent: bool,
}

impl DispatcherConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            concurrency: cfg.dispatch_concurrency.max(1),
            send_timeout: cfg.send_timeout,
            retry: RetryPolicy::new(cfg.retry_attempts, cfg.retry_delay),
            remove_on_permanent: cfg.remove_blocked_subscribers,
        }
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    messenger: Arc<dyn MessagingPort>,
    store: Arc<SubscriberStore>,
    groups: Vec<ChatId>,
    cfg: DispatcherConfig,
    permits: Arc<Semaphore>,
}

impl NotificationDispatcher {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        store: Arc<SubscriberStore>,
        groups: Vec<ChatId>,
        cfg: DispatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                messenger,
                store,
                groups,
                permits: Arc::new(Semaphore::new(cfg.concurrency.max(1))),
                cfg,
            }),
        }
    }

    /// Alert groups first, then subscribers, without duplicates.
    pub async fn recipients(&self) -> Vec<ChatId> {
        let mut out = self.inner.groups.clone();
        for id in self.inner.store.ids().await {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    /// Send `notification` to every current recipient.
    pub async fn broadcast(&self, notification: &Notification) -> DispatchReport {
        self.broadcast_editing(notification, &HashMap::new()).await
    }

    /// Send `notification` to every current recipient, editing `previous[chat]`
    /// in place where one exists.
    pub async fn broadcast_editing(
        &self,
        notification: &Notification,
        previous: &HashMap<ChatId, MessageRef>,
    ) -> DispatchReport {
        let targets = self
            .recipients()
            .await
            .into_iter()
            .map(|chat| {
                let delivery = previous
                    .get(&chat)
                    .map(|m| Delivery::Edit(*m))
                    .unwrap_or(Delivery::Send);
                (chat, delivery)
            })
            .collect();
        self.dispatch(notification, targets).await
    }

    /// Deliver to an explicit target list.
    pub async fn dispatch(
        &self,
        notification: &Notification,
        targets: Vec<(ChatId, Delivery)>,
    ) -> DispatchReport {
        if targets.is_empty() {
            tracing::info!(kind = ?notification.kind, "no recipients for notification");
            return DispatchReport::default();
        }

        let notification = Arc::new(notification.clone());
        let mut tasks = JoinSet::new();
        for (idx, (chat_id, delivery)) in targets.iter().copied().enumerate() {
            let inner = self.inner.clone();
            let notification = notification.clone();
            tasks.spawn(async move {
                let outcome = match inner.permits.clone().acquire_owned().await {
                    Ok(_permit) => inner.deliver(chat_id, delivery, &notification).await,
                    Err(_) => Outcome::Failed {
                        error: "dispatcher is shut down".to_string(),
                    },
                };
                (idx, RecipientOutcome { chat_id, outcome })
            });
        }

        let mut slots: Vec<Option<RecipientOutcome>> = vec![None; targets.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => slots[idx] = Some(outcome),
                Err(e) => tracing::error!(error = %e, "delivery task panicked"),
            }
        }

        let outcomes: Vec<RecipientOutcome> = slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| RecipientOutcome {
                    chat_id: targets[idx].0,
                    outcome: Outcome::Failed {
                        error: "delivery task aborted".to_string(),
                    },
                })
            })
            .collect();
        let report = DispatchReport { outcomes };

        tracing::info!(
            kind = ?notification.kind,
            total = report.total(),
            delivered = report.delivered(),
            failed = report.failed(),
            removed = report.removed().len(),
            "notification dispatched"
        );
        report
    }

    /// Deliver to a single chat (admin warnings, command replies that must be
    /// retried).
    pub async fn send_to(&self, chat_id: ChatId, notification: &Notification) -> Outcome {
        let _permit = self.inner.permits.clone().acquire_owned().await;
        self.inner
            .deliver(chat_id, Delivery::Send, notification)
            .await
    }
}

impl DispatcherInner {
    async fn deliver(
        &self,
        chat_id: ChatId,
        delivery: Delivery,
        notification: &Notification,
    ) -> Outcome {
        if let Delivery::Edit(msg) = delivery {
            let out = self
                .cfg
                .retry
                .run(move |_| self.timed(self.edit(msg, notification)))
                .await;
            match out.result {
                Ok(()) => {
                    return Outcome::Edited {
                        message: msg,
                        attempts: out.attempts,
                    }
                }
                Err(e @ (Error::Recipient { .. } | Error::ChatMigrated { .. })) => {
                    return self.handle_failure(chat_id, e, out.attempts, notification).await;
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(chat_id = chat_id.0, attempts = out.attempts, error = %e, "edit failed after retries");
                    return Outcome::TransientFailure {
                        error: e.to_string(),
                        attempts: out.attempts,
                    };
                }
                Err(e) => {
                    tracing::debug!(chat_id = chat_id.0, error = %e, "edit not possible, sending a new message");
                }
            }
        }

        let out = self
            .cfg
            .retry
            .run(move |_| self.timed(self.send(chat_id, notification)))
            .await;
        match out.result {
            Ok(message) => Outcome::Delivered {
                message,
                attempts: out.attempts,
            },
            Err(e) => self.handle_failure(chat_id, e, out.attempts, notification).await,
        }
    }

    async fn handle_failure(
        &self,
        chat_id: ChatId,
        err: Error,
        attempts: u32,
        notification: &Notification,
    ) -> Outcome {
        match err {
            Error::ChatMigrated { to, .. } => {
                self.follow_migration(chat_id, ChatId(to), notification)
                    .await
            }
            Error::Recipient { reason, .. } => {
                let removed = self.drop_recipient(chat_id).await;
                tracing::warn!(chat_id = chat_id.0, removed, %reason, "recipient rejected notification");
                Outcome::PermanentFailure {
                    error: reason,
                    removed,
                }
            }
            e if e.is_retryable() => {
                tracing::warn!(chat_id = chat_id.0, attempts, error = %e, "delivery failed after retries");
                Outcome::TransientFailure {
                    error: e.to_string(),
                    attempts,
                }
            }
            e => {
                tracing::error!(chat_id = chat_id.0, error = %e, "delivery failed");
                Outcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn follow_migration(
        &self,
        from: ChatId,
        to: ChatId,
        notification: &Notification,
    ) -> Outcome {
        if self.groups.contains(&from) {
            tracing::warn!(from = from.0, to = to.0, "alert group migrated; update GROUP_ID/GROUP_IDS");
        }
        if let Err(e) = self.store.migrate(from, to).await {
            tracing::error!(from = from.0, to = to.0, error = %e, "failed to persist chat migration");
        }

        let out = self
            .cfg
            .retry
            .run(move |_| self.timed(self.send(to, notification)))
            .await;
        match out.result {
            Ok(message) => {
                tracing::info!(from = from.0, to = to.0, "notification re-sent to migrated chat");
                Outcome::Migrated { to, message }
            }
            Err(e) if e.is_retryable() => Outcome::TransientFailure {
                error: e.to_string(),
                attempts: out.attempts,
            },
            Err(e) => Outcome::Failed {
                error: e.to_string(),
            },
        }
    }

    /// Remove a subscriber that can no longer be reached. Alert groups are
    /// configuration, not subscriptions, and are never removed.
    async fn drop_recipient(&self, chat_id: ChatId) -> bool {
        if !self.cfg.remove_on_permanent || self.groups.contains(&chat_id) {
            return false;
        }
        match self.store.remove(chat_id).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!(chat_id = chat_id.0, error = %e, "failed to remove unreachable subscriber");
                false
            }
        }
    }

    async fn timed<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.cfg.send_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(Error::transient(format!(
                "messaging call timed out after {:?}",
                self.cfg.send_timeout
            ))),
        }
    }

    async fn send(&self, chat_id: ChatId, n: &Notification) -> Result<MessageRef> {
        match &n.keyboard {
            Some(kb) => {
                self.messenger
                    .send_inline_keyboard(chat_id, &n.html, kb.clone())
                    .await
            }
            None => self.messenger.send_html(chat_id, &n.html).await,
        }
    }

    async fn edit(&self, msg: MessageRef, n: &Notification) -> Result<()> {
        match &n.keyboard {
            Some(kb) => {
                self.messenger
                    .edit_inline_keyboard(msg, &n.html, kb.clone())
                    .await
            }
            None => self.messenger.edit_html(msg, &n.html).await,
        }
    }
}
