//! In-memory session store.
//! Optionally mirrored to a JSON snapshot on disk so sessions survive restarts.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use studio_core::ports::SessionStore;
use studio_types::{AgentError, Result, message::Message, session::StoredSession};

#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
    snapshot: Option<PathBuf>,
    /// One snapshot write at a time.
    flush_lock: tokio::sync::Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a JSON snapshot. A missing file starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let sessions = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let records: Vec<StoredSession> = serde_json::from_slice(&bytes)?;
                log::info!("Loaded {} sessions from {}", records.len(), path.display());
                records
                    .into_iter()
                    .map(|r| (r.session_id.clone(), r))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(AgentError::Storage(format!("{}: {}", path.display(), e)));
            }
        };
        Ok(Self {
            sessions: RwLock::new(sessions),
            snapshot: Some(path),
            flush_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, session_id: &str) -> Option<StoredSession> {
        self.read().get(session_id).cloned()
    }

    /// Rewrite the snapshot: serialize under the flush lock, write a sibling
    /// temp file, then rename it over the snapshot.
    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let _flushing = self.flush_lock.lock().await;

        // Taken after the lock so the last writer persists every save before it.
        let mut records: Vec<StoredSession> = self.read().values().cloned().collect();
        records.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        let bytes = serde_json::to_vec_pretty(&records)?;

        let staging = path.with_extension("json.tmp");
        let storage_err = |e: std::io::Error| AgentError::Storage(format!("{}: {}", path.display(), e));
        tokio::fs::write(&staging, bytes).await.map_err(storage_err)?;
        tokio::fs::rename(&staging, path).await.map_err(storage_err)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, StoredSession>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, StoredSession>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_image_description(&self, intent: &str) -> Result<String> {
        let wanted = tokens(intent);
        let sessions = self.read();
        let best = sessions
            .values()
            .filter(|r| !r.image_description.is_empty())
            .max_by_key(|r| {
                let known = tokens(&format!("{} {}", r.summary, r.image_description));
                let score = wanted.intersection(&known).count();
                (score, updated_at(r))
            })
            .ok_or_else(|| AgentError::Storage("no stored images to recall".to_string()))?;
        log::info!("Recalled session {} for intent {:?}", best.session_id, intent);
        Ok(best.image_description.clone())
    }

    async fn get_conversation_history(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .read()
            .get(session_id)
            .map(|r| r.history.clone())
            .unwrap_or_default())
    }

    async fn save_session(&self, record: StoredSession) -> Result<()> {
        self.write().insert(record.session_id.clone(), record);
        self.flush().await
    }

    async fn save_history(&self, session_id: &str, history: Vec<Message>) -> Result<()> {
        let updated = match self.write().get_mut(session_id) {
            Some(record) => {
                record.history = history;
                record.updated_at = chrono::Utc::now().to_rfc3339();
                true
            }
            None => false,
        };
        if updated {
            self.flush().await?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let Some(dir) = self.snapshot.as_ref().and_then(|p| p.parent()) else {
            return Ok(());
        };
        if dir.as_os_str().is_empty() {
            return Ok(());
        }
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(AgentError::Storage(format!("{} is not a directory", dir.display()))),
            Err(e) => Err(AgentError::Storage(format!("{}: {}", dir.display(), e))),
        }
    }

    fn backend_name(&self) -> &str {
        if self.snapshot.is_some() {
            "file"
        } else {
            "memory"
        }
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn updated_at(record: &StoredSession) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(&record.updated_at).ok()
}
