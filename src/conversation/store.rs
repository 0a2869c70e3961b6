//! JSON-file mirrored conversation store.
//!
//! The whole conversation is rewritten on every mutation. Writes go to a
//! sibling `.tmp` file which is then renamed over the mirror, and they happen
//! while the store lock is held, so there is only ever one writer.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::conversation::errors::{PersistenceError, PersistenceResult};
use crate::conversation::types::{Conversation, Turn};

/// Ordered, append-only conversation with a durable mirror.
#[derive(Debug)]
pub struct ConversationStore {
    path: PathBuf,
    turns: Mutex<Conversation>,
    exchange: Mutex<()>,
}

impl ConversationStore {
    /// Load the conversation mirrored at `path`.
    ///
    /// A missing, empty or unparseable mirror yields an empty conversation and
    /// the mirror is (re)created as `[]`. This never fails: a mirror that cannot
    /// be written is logged and the store runs memory-only until a later write
    /// succeeds.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let loaded = match tokio::fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => None,
            Ok(text) => match serde_json::from_str::<Conversation>(&text) {
                Ok(turns) => Some(turns),
                Err(err) => {
                    warn!("Unparseable conversation mirror {}: {err}", path.display());
                    None
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!("Cannot read conversation mirror {}: {err}", path.display());
                None
            }
        };

        let turns = if let Some(turns) = loaded {
            debug!("Loaded {} turns from {}", turns.len(), path.display());
            turns
        } else {
            let empty = Conversation::new();
            if let Err(err) = write_mirror(&path, &empty).await {
                warn!("Cannot create conversation mirror: {err}");
            }
            empty
        };

        Self {
            path,
            turns: Mutex::new(turns),
            exchange: Mutex::new(()),
        }
    }

    /// Location of the durable mirror.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a turn and rewrite the mirror.
    ///
    /// # Errors
    /// Returns a [`PersistenceError`] if the mirror cannot be written. The turn
    /// is kept in memory either way.
    pub async fn append(&self, turn: Turn) -> PersistenceResult<()> {
        let mut turns = self.turns.lock().await;
        turns.push(turn);
        write_mirror(&self.path, &turns).await
    }

    /// Empty the conversation and rewrite the mirror as `[]`.
    ///
    /// # Errors
    /// Returns a [`PersistenceError`] if the mirror cannot be written. The
    /// in-memory conversation is empty either way.
    pub async fn clear(&self) -> PersistenceResult<()> {
        let mut turns = self.turns.lock().await;
        turns.clear();
        write_mirror(&self.path, &turns).await
    }

    /// Snapshot of the full ordered conversation.
    pub async fn all(&self) -> Conversation {
        self.turns.lock().await.clone()
    }

    /// Number of stored turns.
    pub async fn len(&self) -> usize {
        self.turns.lock().await.len()
    }

    /// Whether the conversation is empty.
    pub async fn is_empty(&self) -> bool {
        self.turns.lock().await.is_empty()
    }

    /// Lock held across one question/answer exchange.
    ///
    /// Holding it keeps another exchange on the same conversation from
    /// slipping its turns between this exchange's user and assistant turns.
    pub async fn exchange(&self) -> MutexGuard<'_, ()> {
        self.exchange.lock().await
    }
}

async fn write_mirror(path: &Path, turns: &[Turn]) -> PersistenceResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| PersistenceError::io(parent, err))?;
    }

    let body = serde_json::to_string_pretty(turns)?;
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|err| PersistenceError::io(&tmp, err))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|err| PersistenceError::io(path, err))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::conversation::types::Role;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_missing_creates_empty_mirror() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chats.json");

        let store = ConversationStore::load(&path).await;

        assert!(store.is_empty().await);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), "[]");
    }

    #[tokio::test]
    async fn test_load_unparseable_resets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chats.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = ConversationStore::load(&path).await;

        assert!(store.all().await.is_empty());
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), "[]");
    }

    #[tokio::test]
    async fn test_load_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("chats.json");

        let _store = ConversationStore::load(&path).await;

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let dir = TempDir::new().unwrap();
        let store = ConversationStore::load(dir.path().join("chats.json")).await;

        store.append(Turn::user("first")).await.unwrap();
        store.append(Turn::assistant("second")).await.unwrap();
        store.append(Turn::user("third")).await.unwrap();

        let turns = store.all().await;
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["first", "second", "third"]);
        assert_eq!(turns[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chats.json");
        let store = ConversationStore::load(&path).await;
        store.append(Turn::user("Où êtes-vous situés ?")).await.unwrap();
        store.append(Turn::assistant("India")).await.unwrap();
        let before = store.all().await;
        drop(store);

        let reloaded = ConversationStore::load(&path).await;

        assert_eq!(reloaded.all().await, before);
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chats.json");
        let store = ConversationStore::load(&path).await;
        store.append(Turn::user("hello")).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.all().await.is_empty());
        store.clear().await.unwrap();
        assert!(store.all().await.is_empty());

        let reloaded = ConversationStore::load(&path).await;
        assert_eq!(reloaded.len().await, 0);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_memory() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "a file, not a directory").unwrap();
        let store = ConversationStore::load(blocker.join("chats.json")).await;

        let result = store.append(Turn::user("still answered")).await;

        assert!(matches!(result, Err(PersistenceError::Io { .. })));
        assert_eq!(store.all().await, vec![Turn::user("still answered")]);
    }
}
