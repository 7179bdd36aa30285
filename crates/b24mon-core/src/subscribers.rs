//! Durable subscriber registry keyed by chat id.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{domain::ChatId, storage, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub chat_id: i64,
    pub subscribed_at: DateTime<Utc>,
    /// Free-form labels (chat title, chat type, ...) captured at subscribe time.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    subscribers: Vec<Subscriber>,
}

/// Older deployments stored a bare array of chat ids.
#[derive(Deserialize)]
#[serde(untagged)]
enum OnDisk {
    Current(StoreFile),
    Legacy(Vec<i64>),
}

/// JSON-file backed subscriber store.
///
/// `add` and `remove` are idempotent. Every mutation is written through to disk
/// before returning; if the write fails the in-memory state is rolled back and
/// the caller gets `Error::Storage`.
pub struct SubscriberStore {
    path: PathBuf,
    state: Mutex<BTreeMap<i64, Subscriber>>,
}

impl SubscriberStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        storage::ensure_parent_dir(&path).await?;

        let records = match storage::read_json::<OnDisk>(&path).await? {
            None => Vec::new(),
            Some(OnDisk::Current(file)) => file.subscribers,
            Some(OnDisk::Legacy(ids)) => {
                tracing::info!(count = ids.len(), path = %path.display(), "migrating legacy subscriber list");
                let now = Utc::now();
                ids.into_iter()
                    .map(|chat_id| Subscriber {
                        chat_id,
                        subscribed_at: now,
                        metadata: BTreeMap::new(),
                    })
                    .collect()
            }
        };

        let mut state = BTreeMap::new();
        for s in records {
            // First record wins if the file somehow holds duplicates.
            state.entry(s.chat_id).or_insert(s);
        }
        tracing::debug!(count = state.len(), path = %path.display(), "subscriber store opened");

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register `chat_id`. Returns `true` only when a new record was created.
    pub async fn add(&self, chat_id: ChatId) -> Result<bool> {
        self.add_with_metadata(chat_id, BTreeMap::new()).await
    }

    pub async fn add_with_metadata(
        &self,
        chat_id: ChatId,
        metadata: BTreeMap<String, String>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.contains_key(&chat_id.0) {
            return Ok(false);
        }

        state.insert(
            chat_id.0,
            Subscriber {
                chat_id: chat_id.0,
                subscribed_at: Utc::now(),
                metadata,
            },
        );
        if let Err(e) = self.persist(&state).await {
            state.remove(&chat_id.0);
            return Err(e);
        }

        tracing::info!(chat_id = chat_id.0, total = state.len(), "subscriber added");
        Ok(true)
    }

    /// Unregister `chat_id`. Removing an unknown id is a no-op returning `false`.
    pub async fn remove(&self, chat_id: ChatId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(prev) = state.remove(&chat_id.0) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&state).await {
            state.insert(chat_id.0, prev);
            return Err(e);
        }

        tracing::info!(chat_id = chat_id.0, total = state.len(), "subscriber removed");
        Ok(true)
    }

    /// Move a subscription to the new id of a migrated chat, keeping its
    /// original `subscribed_at`. Returns `false` if `from` was not subscribed.
    pub async fn migrate(&self, from: ChatId, to: ChatId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(mut record) = state.remove(&from.0) else {
            return Ok(false);
        };
        let old = record.clone();
        let displaced = state.get(&to.0).cloned();

        record.chat_id = to.0;
        state.entry(to.0).or_insert(record);

        if let Err(e) = self.persist(&state).await {
            state.remove(&to.0);
            if let Some(d) = displaced {
                state.insert(to.0, d);
            }
            state.insert(from.0, old);
            return Err(e);
        }

        tracing::info!(from = from.0, to = to.0, "subscriber migrated");
        Ok(true)
    }

    pub async fn is_subscribed(&self, chat_id: ChatId) -> bool {
        self.state.lock().await.contains_key(&chat_id.0)
    }

    /// All subscribers, ordered by chat id.
    pub async fn list_all(&self) -> Vec<Subscriber> {
        self.state.lock().await.values().cloned().collect()
    }

    pub async fn ids(&self) -> Vec<ChatId> {
        self.state.lock().await.keys().map(|&id| ChatId(id)).collect()
    }

    pub async fn count(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Check that the backing file is readable and its directory writable.
    pub async fn probe(&self) -> Result<()> {
        storage::probe(&self.path).await
    }

    async fn persist(&self, state: &BTreeMap<i64, Subscriber>) -> Result<()> {
        let file = StoreFile {
            subscribers: state.values().cloned().collect(),
        };
        storage::write_json_atomic(&self.path, &file).await
    }
}
