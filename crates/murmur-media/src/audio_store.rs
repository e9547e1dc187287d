//! Synthesized audio files, one directory per chat.
//!
//! Files live at `<root>/<chat_id>/<uuid>.wav` and are served by the gateway
//! under `/audio/<chat_id>/<uuid>.wav`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use murmur_core::error::{MurmurError, Result};
use murmur_providers::AudioOutput;

#[derive(Debug, Clone)]
pub struct AudioStore {
    root: PathBuf,
}

/// A file written by [`AudioStore::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAudio {
    pub file_name: String,
    pub path: PathBuf,
    pub url: String,
}

impl AudioStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn save(&self, chat_id: &str, wav: &[u8]) -> Result<StoredAudio> {
        let dir = self.chat_dir(chat_id)?;
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = format!("{}.wav", uuid::Uuid::new_v4().simple());
        let path = dir.join(&file_name);
        tokio::fs::write(&path, wav).await?;

        debug!(chat_id, file = %file_name, bytes = wav.len(), "Stored synthesized audio");

        Ok(StoredAudio {
            url: Self::url_for(chat_id, &file_name),
            file_name,
            path,
        })
    }

    pub fn url_for(chat_id: &str, file_name: &str) -> String {
        format!("/audio/{chat_id}/{file_name}")
    }

    /// Delete every file stored for a chat. Missing directories are fine.
    pub async fn remove_chat(&self, chat_id: &str) -> Result<()> {
        let dir = self.chat_dir(chat_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn chat_dir(&self, chat_id: &str) -> Result<PathBuf> {
        if !is_valid_chat_id(chat_id) {
            return Err(MurmurError::Session(format!("invalid chat id: {chat_id:?}")));
        }
        Ok(self.root.join(chat_id))
    }
}

#[async_trait]
impl AudioOutput for AudioStore {
    async fn store(&self, chat_id: &str, wav: bytes::Bytes) -> anyhow::Result<String> {
        let stored = self.save(chat_id, &wav).await?;
        Ok(stored.url)
    }
}

/// Chat ids become path components, so only a safe alphabet is allowed.
pub fn is_valid_chat_id(chat_id: &str) -> bool {
    !chat_id.is_empty()
        && chat_id.len() <= 128
        && chat_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
