//! Conversation persistence.
//!
//! Stores hold conversations as their JSON form, so every load goes through
//! the same ordering checks as any other deserialization.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::conversation::Conversation;
use crate::errors::ChatError;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Conversation>, ChatError>;
    async fn save(&self, id: &str, conversation: &Conversation) -> Result<(), ChatError>;
    async fn delete(&self, id: &str) -> Result<(), ChatError>;
}

fn decode(id: &str, json: &str) -> Result<Conversation, ChatError> {
    serde_json::from_str(json)
        .map_err(|e| ChatError::StoreError(format!("Stored conversation '{}' is invalid: {}", id, e)))
}

fn encode(id: &str, conversation: &Conversation) -> Result<String, ChatError> {
    serde_json::to_string_pretty(conversation)
        .map_err(|e| ChatError::StoreError(format!("Failed to serialize conversation '{}': {}", id, e)))
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    conversations: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn load(&self, id: &str) -> Result<Option<Conversation>, ChatError> {
        let conversations = self.conversations.read().await;
        conversations.get(id).map(|json| decode(id, json)).transpose()
    }

    async fn save(&self, id: &str, conversation: &Conversation) -> Result<(), ChatError> {
        let json = encode(id, conversation)?;
        self.conversations.write().await.insert(id.to_string(), json);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), ChatError> {
        self.conversations.write().await.remove(id);
        Ok(())
    }
}

/// One `<id>.json` file per conversation in a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, ChatError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ChatError::StoreError(format!(
                "Invalid conversation id '{}'",
                id
            )));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl ConversationStore for JsonFileStore {
    async fn load(&self, id: &str) -> Result<Option<Conversation>, ChatError> {
        let path = self.path_for(id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => decode(id, &json).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ChatError::StoreError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn save(&self, id: &str, conversation: &Conversation) -> Result<(), ChatError> {
        let path = self.path_for(id)?;
        let json = encode(id, conversation)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        // Write beside the target and rename so readers never see a partial file.
        let staging = self
            .dir
            .join(format!(".{}.{}.tmp", id, uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&staging, json).await?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(ChatError::StoreError(format!(
                "Failed to replace {}: {}",
                path.display(),
                e
            )));
        }
        log::debug!("Saved conversation '{}' to {}", id, path.display());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), ChatError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AssistantMessage, UserMessage};
    use tempfile::TempDir;

    fn sample() -> Conversation {
        let mut conversation = Conversation::new("You are a helper.");
        conversation.append(UserMessage::new("hi")).unwrap();
        conversation
            .append(AssistantMessage::new("hello", "end_turn"))
            .unwrap();
        conversation
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryStore::new();
        assert!(store.load("a").await.unwrap().is_none());

        let conversation = sample();
        store.save("a", &conversation).await.unwrap();
        let loaded = store.load("a").await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.messages()[1].id(), conversation.messages()[1].id());

        store.delete("a").await.unwrap();
        assert!(store.load("a").await.unwrap().is_none());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("conversations"));
        let conversation = sample();

        store.save("chat-1", &conversation).await.unwrap();
        store.save("chat-1", &conversation).await.unwrap();
        let loaded = store.load("chat-1").await.unwrap().unwrap();
        assert_eq!(loaded.system, "You are a helper.");
        assert_eq!(loaded.messages()[0].id(), conversation.messages()[0].id());

        let leftovers: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        store.delete("chat-1").await.unwrap();
        store.delete("chat-1").await.unwrap();
        assert!(store.load("chat-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_ids() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        let err = store.save("../escape", &sample()).await.unwrap_err();
        assert!(matches!(err, ChatError::StoreError(_)));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_store_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("bad.json"),
            r#"{"system": "s", "messages": [
                {"role": "user", "content": "a"},
                {"role": "user", "content": "b"}
            ]}"#,
        )
        .unwrap();
        let store = JsonFileStore::new(dir.path());
        let err = store.load("bad").await.unwrap_err();
        assert!(matches!(err, ChatError::StoreError(_)));
    }
}
