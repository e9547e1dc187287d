//! In-memory chat registry.
//!
//! Remembers every chat seen since startup: its settings, when it started, and
//! the exchanges it produced. Nothing is written to disk.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use murmur_core::config::SessionConfig;
use murmur_core::types::Exchange;
use murmur_session::ExchangeRecorder;

const HEADER_MAX_CHARS: usize = 60;

#[derive(Debug, Clone, Serialize)]
pub struct ChatSummary {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub header: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    /// First prompt of the chat, shortened.
    pub header: Option<String>,
    pub config: SessionConfig,
    pub exchanges: Vec<Exchange>,
    #[serde(skip)]
    seq: u64,
}

impl ChatRecord {
    fn summary(&self) -> ChatSummary {
        ChatSummary {
            id: self.id.clone(),
            started_at: self.started_at,
            header: self.header.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ChatRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    chats: HashMap<String, ChatRecord>,
    next_seq: u64,
}

impl ChatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for a session on `chat_id`: the chat's own if it is known,
    /// else those of the most recently started chat, else `default`.
    pub fn resolve_config(&self, chat_id: &str, default: &SessionConfig) -> SessionConfig {
        let inner = self.read();
        if let Some(chat) = inner.chats.get(chat_id) {
            return chat.config.clone();
        }
        inner
            .chats
            .values()
            .max_by_key(|c| c.seq)
            .map(|c| c.config.clone())
            .unwrap_or_else(|| default.clone())
    }

    /// Register a chat if it is new. Returns its earlier exchanges.
    pub fn open(&self, chat_id: &str, config: SessionConfig) -> Vec<Exchange> {
        let mut inner = self.write();
        if let Some(chat) = inner.chats.get(chat_id) {
            return chat.exchanges.clone();
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.chats.insert(
            chat_id.to_string(),
            ChatRecord {
                id: chat_id.to_string(),
                started_at: Utc::now(),
                header: None,
                config,
                exchanges: Vec::new(),
                seq,
            },
        );
        Vec::new()
    }

    /// All chats, newest first.
    pub fn list(&self) -> Vec<ChatSummary> {
        let inner = self.read();
        let mut chats: Vec<&ChatRecord> = inner.chats.values().collect();
        chats.sort_by(|a, b| b.seq.cmp(&a.seq));
        chats.into_iter().map(ChatRecord::summary).collect()
    }

    pub fn get(&self, chat_id: &str) -> Option<ChatRecord> {
        self.read().chats.get(chat_id).cloned()
    }

    pub fn remove(&self, chat_id: &str) -> bool {
        self.write().chats.remove(chat_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ExchangeRecorder for ChatRegistry {
    fn record_exchange(&self, chat_id: &str, exchange: &Exchange) {
        let mut inner = self.write();
        // A deleted chat stays deleted.
        let Some(chat) = inner.chats.get_mut(chat_id) else {
            return;
        };
        if chat.header.is_none() && !exchange.prompt.trim().is_empty() {
            chat.header = Some(header_from(&exchange.prompt));
        }
        chat.exchanges.push(exchange.clone());
    }
}

fn header_from(prompt: &str) -> String {
    let prompt = prompt.trim();
    match prompt.char_indices().nth(HEADER_MAX_CHARS) {
        Some((cut, _)) => format!("{}...", &prompt[..cut]),
        None => prompt.to_string(),
    }
}
