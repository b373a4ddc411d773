//! Session persistence: conversations written to disk as JSON.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::Conversation;
use crate::error::{EngineError, EngineResult};

/// On-disk shape of a saved session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub conversation: Conversation,
}

/// Writes sessions as `{session_id}.json` under one directory.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    pub async fn save(&self, conversation: &Conversation) -> EngineResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let record = SessionRecord {
            session_id: conversation.session_id.clone(),
            saved_at: Utc::now(),
            conversation: conversation.clone(),
        };
        let json = serde_json::to_string_pretty(&record)?;
        let path = self.path_for(&record.session_id);
        tokio::fs::write(&path, json).await?;
        tracing::debug!(session = %record.session_id, path = %path.display(), "session saved");
        Ok(())
    }

    pub async fn load(&self, session_id: &str) -> EngineResult<Conversation> {
        let path = self.path_for(session_id);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| EngineError::UnknownSession(session_id.to_string()))?;
        let record: SessionRecord = serde_json::from_str(&text)?;
        Ok(record.conversation)
    }

    /// The most recently updated saved session, if any.
    pub async fn find_latest(&self) -> EngineResult<Option<Conversation>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<SessionRecord> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(text) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<SessionRecord>(&text) else {
                tracing::warn!(path = %path.display(), "skipping unreadable session file");
                continue;
            };
            if latest
                .as_ref()
                .is_none_or(|l| record.saved_at > l.saved_at)
            {
                latest = Some(record);
            }
        }
        Ok(latest.map(|r| r.conversation))
    }

    pub async fn list(&self) -> EngineResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        let mut conv = Conversation::new("sess-1", "model", "anthropic");
        conv.add_user_message("hello");
        store.save(&conv).await.unwrap();

        let loaded = store.load("sess-1").await.unwrap();
        assert_eq!(loaded.session_id, "sess-1");
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].content, "hello");
    }

    #[tokio::test]
    async fn missing_session_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(matches!(
            store.load("nope").await,
            Err(EngineError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn find_latest_picks_newest_save() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        store
            .save(&Conversation::new("older", "m", "p"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        store
            .save(&Conversation::new("newer", "m", "p"))
            .await
            .unwrap();

        let latest = store.find_latest().await.unwrap().unwrap();
        assert_eq!(latest.session_id, "newer");
        assert_eq!(store.list().await.unwrap(), vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn empty_directory_has_no_latest() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("does-not-exist"));
        assert!(store.find_latest().await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }
}
