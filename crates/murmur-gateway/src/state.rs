//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use murmur_core::config::Config;
use murmur_media::AudioStore;
use murmur_providers::Providers;
use murmur_session::SessionHandle;

use crate::chats::ChatRegistry;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub providers: Providers,
    pub audio_store: Arc<AudioStore>,
    pub chats: Arc<ChatRegistry>,
    pub sessions: RwLock<HashMap<String, LiveSession>>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

/// The session currently attached to a chat, and the connection that owns it.
pub struct LiveSession {
    pub conn_id: String,
    pub handle: Arc<SessionHandle>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, providers: Providers) -> Self {
        let audio_store = Arc::new(AudioStore::new(config.audio_dir()));
        Self {
            config,
            providers,
            audio_store,
            chats: Arc::new(ChatRegistry::new()),
            sessions: RwLock::new(HashMap::new()),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Attach a session to its chat, returning whatever was attached before.
    pub async fn attach_session(
        &self,
        chat_id: &str,
        conn_id: &str,
        handle: Arc<SessionHandle>,
    ) -> Option<LiveSession> {
        self.sessions.write().await.insert(
            chat_id.to_string(),
            LiveSession {
                conn_id: conn_id.to_string(),
                handle,
            },
        )
    }

    /// Detach the chat's session, but only if `conn_id` still owns it.
    pub async fn detach_session(&self, chat_id: &str, conn_id: &str) -> Option<LiveSession> {
        let mut sessions = self.sessions.write().await;
        if sessions.get(chat_id).is_some_and(|s| s.conn_id == conn_id) {
            return sessions.remove(chat_id);
        }
        None
    }

    /// Detach the chat's session regardless of owner.
    pub async fn take_session(&self, chat_id: &str) -> Option<LiveSession> {
        self.sessions.write().await.remove(chat_id)
    }

    pub async fn live_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Disconnect every live session.
    pub async fn close_all_sessions(&self) {
        let sessions: Vec<LiveSession> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.handle.on_disconnect();
        }
    }
}
