//! Registry of conversation stores keyed by session.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::conversation::ids::SessionId;
use crate::conversation::store::ConversationStore;

/// Default number of session conversations kept in memory.
pub const DEFAULT_MAX_CACHED_SESSIONS: usize = 256;

/// Default time an unused session conversation stays in memory.
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(30 * 60);

/// A loaded session store and when it was last handed out.
#[derive(Debug)]
struct CachedSession {
    store: Arc<ConversationStore>,
    last_used: Instant,
}

impl CachedSession {
    fn new(store: Arc<ConversationStore>) -> Self {
        Self {
            store,
            last_used: Instant::now(),
        }
    }

    /// A caller still holds the store.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.store) > 1
    }

    fn is_idle(&self, idle: Duration) -> bool {
        !self.in_use() && self.last_used.elapsed() >= idle
    }
}

/// Maps an optional session id to its conversation store.
///
/// `None` selects the shared default conversation. Session stores are loaded
/// lazily from `<sessions_dir>/<id>.json` and kept in a bounded cache: stores
/// unused for longer than the idle time are dropped, and past the size limit
/// the least recently used ones go first. A store a caller still holds is
/// never dropped, so one session never has two live stores. Dropped stores
/// are reloaded from their mirror on the next use.
#[derive(Debug)]
pub struct SessionRegistry {
    default: Arc<ConversationStore>,
    sessions_dir: PathBuf,
    sessions: DashMap<SessionId, CachedSession>,
    loading: Mutex<()>,
    max_cached: usize,
    idle: Duration,
}

impl SessionRegistry {
    /// Load the default conversation. Session stores are loaded on demand.
    pub async fn open(chat_file: impl Into<PathBuf>, sessions_dir: impl Into<PathBuf>) -> Self {
        let default = ConversationStore::load(chat_file).await;
        Self {
            default: Arc::new(default),
            sessions_dir: sessions_dir.into(),
            sessions: DashMap::new(),
            loading: Mutex::new(()),
            max_cached: DEFAULT_MAX_CACHED_SESSIONS,
            idle: DEFAULT_SESSION_IDLE,
        }
    }

    /// Set the cache size limit and idle time.
    #[must_use]
    pub fn with_limits(mut self, max_cached: usize, idle: Duration) -> Self {
        self.max_cached = max_cached.max(1);
        self.idle = idle;
        self
    }

    /// Directory holding per-session mirrors.
    #[must_use]
    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// The shared default conversation.
    #[must_use]
    pub fn default_store(&self) -> Arc<ConversationStore> {
        Arc::clone(&self.default)
    }

    /// Resolve the store for `session`, creating it on first use.
    pub async fn store(&self, session: Option<SessionId>) -> Arc<ConversationStore> {
        let Some(id) = session else {
            return self.default_store();
        };

        if let Some(store) = self.cached(id) {
            return store;
        }
        self.open_session(id).await
    }

    /// Resolve the store for `session` only if it already exists in memory or
    /// on disk. Never creates a mirror.
    pub async fn existing(&self, session: Option<SessionId>) -> Option<Arc<ConversationStore>> {
        let Some(id) = session else {
            return Some(self.default_store());
        };

        if let Some(store) = self.cached(id) {
            return Some(store);
        }

        let path = self.session_path(id);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(self.open_session(id).await),
            Ok(false) => None,
            Err(err) => {
                warn!("Cannot check conversation mirror {}: {err}", path.display());
                None
            }
        }
    }

    /// Number of session stores currently held in memory.
    #[must_use]
    pub fn loaded_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Drop idle session stores, then the least recently used ones while the
    /// cache is over its limit. Stores held by a caller stay.
    pub fn evict_idle(&self) {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.is_idle(self.idle))
            .map(|entry| *entry.key())
            .collect();
        for id in expired {
            self.sessions.remove_if(&id, |_, cached| cached.is_idle(self.idle));
        }

        let excess = self.sessions.len().saturating_sub(self.max_cached);
        if excess == 0 {
            return;
        }

        let mut oldest: Vec<(SessionId, Instant)> = self
            .sessions
            .iter()
            .filter(|entry| !entry.in_use())
            .map(|entry| (*entry.key(), entry.last_used))
            .collect();
        oldest.sort_by_key(|(_, last_used)| *last_used);
        for (id, _) in oldest.into_iter().take(excess) {
            self.sessions.remove_if(&id, |_, cached| !cached.in_use());
        }
    }

    async fn open_session(&self, id: SessionId) -> Arc<ConversationStore> {
        let _guard = self.loading.lock().await;
        if let Some(store) = self.cached(id) {
            return store;
        }

        debug!("Opening conversation for session {id}");
        let store = Arc::new(ConversationStore::load(self.session_path(id)).await);
        self.sessions.insert(id, CachedSession::new(Arc::clone(&store)));
        self.evict_idle();
        store
    }

    fn session_path(&self, id: SessionId) -> PathBuf {
        self.sessions_dir.join(id.file_name())
    }

    fn cached(&self, id: SessionId) -> Option<Arc<ConversationStore>> {
        self.sessions.get_mut(&id).map(|mut entry| {
            entry.last_used = Instant::now();
            Arc::clone(&entry.store)
        })
    }
}
