//! In-memory messenger used by unit tests across the crate.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub enum Failure {
    Transient,
    Blocked,
    Migrated(i64),
    /// Hang longer than any sane per-call timeout.
    Hang(Duration),
}

impl Failure {
    fn to_error(self, chat_id: i64) -> Error {
        match self {
            Failure::Transient | Failure::Hang(_) => Error::transient("connection reset"),
            Failure::Blocked => Error::Recipient {
                chat_id,
                reason: "bot was blocked by the user".to_string(),
            },
            Failure::Migrated(to) => Error::ChatMigrated { from: chat_id, to },
        }
    }
}

#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    sends: Mutex<Vec<(ChatId, String)>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    keyboards: Mutex<Vec<(ChatId, String, InlineKeyboard)>>,
    documents: Mutex<Vec<(ChatId, String, Vec<u8>)>>,
    attempts: Mutex<HashMap<i64, u32>>,
    scripted: Mutex<HashMap<i64, VecDeque<Failure>>>,
    always: Mutex<HashMap<i64, Failure>>,
    failing_edits: Mutex<Vec<i64>>,
    migrating_edits: Mutex<HashMap<i64, i64>>,
    keyboard_edits: Mutex<Vec<(MessageRef, String)>>,
    latency: Mutex<Option<Duration>>,
    in_flight: Mutex<(usize, usize)>,
    probe_error: Mutex<Option<String>>,
}

impl FakeMessenger {
    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        if *guard == 0 {
            *guard = 1;
        }
        let id = *guard;
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(id),
        }
    }

    /// Fail the next `times` calls to `chat_id` with `failure`.
    pub fn fail_next(&self, chat_id: i64, times: usize, failure: Failure) {
        let mut map = self.scripted.lock().unwrap();
        let q = map.entry(chat_id).or_default();
        for _ in 0..times {
            q.push_back(failure);
        }
    }

    pub fn fail_always(&self, chat_id: i64, failure: Failure) {
        self.always.lock().unwrap().insert(chat_id, failure);
    }

    pub fn fail_edits(&self, chat_id: i64) {
        self.failing_edits.lock().unwrap().push(chat_id);
    }

    /// Edits in `chat_id` fail as if the group had become supergroup `to`.
    pub fn migrate_edits(&self, chat_id: i64, to: i64) {
        self.migrating_edits.lock().unwrap().insert(chat_id, to);
    }

    /// Every gated call sleeps this long while counted as in flight.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().1
    }

    pub fn fail_probe(&self, reason: &str) {
        *self.probe_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c.0 == chat_id)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn keyboard_edits(&self) -> Vec<(MessageRef, String)> {
        self.keyboard_edits.lock().unwrap().clone()
    }

    pub fn keyboards(&self) -> Vec<(ChatId, String, InlineKeyboard)> {
        self.keyboards.lock().unwrap().clone()
    }

    pub fn documents(&self) -> Vec<(ChatId, String, Vec<u8>)> {
        self.documents.lock().unwrap().clone()
    }

    pub fn attempts(&self, chat_id: i64) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&chat_id)
            .copied()
            .unwrap_or(0)
    }

    fn edit_gate(&self, msg: MessageRef) -> Result<()> {
        let chat = msg.chat_id.0;
        if self.failing_edits.lock().unwrap().contains(&chat) {
            return Err(Error::External(
                "Bad Request: message to edit not found".to_string(),
            ));
        }
        if let Some(&to) = self.migrating_edits.lock().unwrap().get(&chat) {
            return Err(Error::ChatMigrated { from: chat, to });
        }
        Ok(())
    }

    async fn gate(&self, chat_id: i64) -> Result<()> {
        *self.attempts.lock().unwrap().entry(chat_id).or_default() += 1;

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            {
                let mut counts = self.in_flight.lock().unwrap();
                counts.0 += 1;
                counts.1 = counts.1.max(counts.0);
            }
            tokio::time::sleep(latency).await;
            self.in_flight.lock().unwrap().0 -= 1;
        }

        let failure = {
            let scripted = self
                .scripted
                .lock()
                .unwrap()
                .get_mut(&chat_id)
                .and_then(|q| q.pop_front());
            scripted.or_else(|| self.always.lock().unwrap().get(&chat_id).copied())
        };

        match failure {
            None => Ok(()),
            Some(Failure::Hang(d)) => {
                tokio::time::sleep(d).await;
                Err(Failure::Hang(d).to_error(chat_id))
            }
            Some(f) => Err(f.to_error(chat_id)),
        }
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_edit: true,
            supports_documents: true,
            supports_inline_keyboards: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.gate(chat_id.0).await?;
        self.sends.lock().unwrap().push((chat_id, html.to_string()));
        Ok(self.alloc(chat_id))
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.edit_gate(msg)?;
        self.gate(msg.chat_id.0).await?;
        self.edits.lock().unwrap().push((msg, html.to_string()));
        Ok(())
    }

    async fn delete_message(&self, _msg: MessageRef) -> Result<()> {
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.gate(chat_id.0).await?;
        self.keyboards
            .lock()
            .unwrap()
            .push((chat_id, html.to_string(), keyboard));
        Ok(self.alloc(chat_id))
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.edit_gate(msg)?;
        self.keyboards
            .lock()
            .unwrap()
            .push((msg.chat_id, html.to_string(), keyboard));
        self.keyboard_edits
            .lock()
            .unwrap()
            .push((msg, html.to_string()));
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        file_name: &str,
        bytes: Vec<u8>,
        _caption: Option<&str>,
    ) -> Result<MessageRef> {
        self.gate(chat_id.0).await?;
        self.documents
            .lock()
            .unwrap()
            .push((chat_id, file_name.to_string(), bytes));
        Ok(self.alloc(chat_id))
    }

    async fn answer_callback_query(&self, _callback_id: &str, _text: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn probe(&self) -> Result<String> {
        match self.probe_error.lock().unwrap().clone() {
            Some(reason) => Err(Error::External(reason)),
            None => Ok("fake_bot".to_string()),
        }
    }
}
