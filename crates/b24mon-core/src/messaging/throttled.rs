use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

/// Past this many tracked chats, expired slots are swept (at most once per
/// per-chat interval).
const PRUNE_THRESHOLD: usize = 512;

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two Bot API calls (~30 msg/s bot-wide limit).
    pub global_min_interval: Duration,
    /// Minimum spacing between calls to one chat (~1 msg/s per chat).
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(1050),
        }
    }
}

/// Next free slot, bot-wide and per chat.
#[derive(Debug)]
struct Schedule {
    global_next: Instant,
    chat_next: HashMap<i64, Instant>,
    last_prune: Instant,
}

impl Schedule {
    fn new(now: Instant) -> Self {
        Self {
            global_next: now,
            chat_next: HashMap::new(),
            last_prune: now,
        }
    }

    /// Book the earliest slot free on both clocks; returns how long to wait.
    fn reserve(&mut self, cfg: &ThrottleConfig, chat: Option<i64>, now: Instant) -> Duration {
        let global_start = self.global_next.max(now);
        self.global_next = global_start + cfg.global_min_interval;

        let mut start = global_start;
        if let Some(chat) = chat {
            let chat_start = self
                .chat_next
                .get(&chat)
                .map_or(now, |next| (*next).max(now));
            self.chat_next
                .insert(chat, chat_start + cfg.per_chat_min_interval);
            start = start.max(chat_start);
            self.prune(now, cfg.per_chat_min_interval);
        }
        start.saturating_duration_since(now)
    }

    /// Forget chats whose next slot has already passed.
    fn prune(&mut self, now: Instant, every: Duration) {
        if self.chat_next.len() <= PRUNE_THRESHOLD
            || now.saturating_duration_since(self.last_prune) < every
        {
            return;
        }
        let before = self.chat_next.len();
        self.chat_next.retain(|_, next| *next > now);
        self.last_prune = now;
        tracing::debug!(
            before,
            after = self.chat_next.len(),
            "pruned idle chat throttle slots"
        );
    }
}

/// MessagingPort decorator that rate-limits outbound calls.
///
/// An outage alert fans out to every subscriber at once; spacing the calls keeps
/// the bot under Telegram's flood limits. It does not guarantee zero 429s,
/// the adapter still honours `RetryAfter`.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    schedule: Mutex<Schedule>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            schedule: Mutex::new(Schedule::new(Instant::now())),
        }
    }

    async fn throttle(&self, chat: Option<ChatId>) {
        let wait = {
            let mut schedule = self.schedule.lock().await;
            schedule.reserve(&self.cfg, chat.map(|c| c.0), Instant::now())
        };
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    #[cfg(test)]
    async fn tracked_chats(&self) -> usize {
        self.schedule.lock().await.chat_next.len()
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.throttle(Some(chat_id)).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.throttle(Some(msg.chat_id)).await;
        self.inner.edit_html(msg, html).await
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.throttle(Some(msg.chat_id)).await;
        self.inner.delete_message(msg).await
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.throttle(Some(chat_id)).await;
        self.inner.send_inline_keyboard(chat_id, html, keyboard).await
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.throttle(Some(msg.chat_id)).await;
        self.inner.edit_inline_keyboard(msg, html, keyboard).await
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        file_name: &str,
        bytes: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<MessageRef> {
        self.throttle(Some(chat_id)).await;
        self.inner
            .send_document(chat_id, file_name, bytes, caption)
            .await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        // Callback answers carry no chat id.
        self.throttle(None).await;
        self.inner.answer_callback_query(callback_id, text).await
    }

    async fn probe(&self) -> Result<String> {
        self.inner.probe().await
    }
}
