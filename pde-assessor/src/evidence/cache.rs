use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::EvidenceClient;
use crate::models::EvidenceAnswer;

/// In-memory entries kept per client unless configured otherwise
pub const DEFAULT_MEMORY_ENTRIES: usize = 1024;

/// Memoizes successful answers keyed by the exact prompt text.
///
/// Entries live in memory and, when a directory is configured, as one JSON file per key.
/// Memory holds at most `memory_capacity` entries; past that the oldest one is evicted
/// (the disk copy stays and is reloaded on the next hit).
/// Concurrent runs may race on a key; every writer stores the answer for the same
/// prompt and files are replaced by rename, so the last writer wins. Error answers
/// are never stored.
pub struct CachedEvidenceClient {
    inner: Arc<dyn EvidenceClient>,
    namespace: String,
    memory: DashMap<String, EvidenceAnswer>,
    memory_order: Mutex<VecDeque<String>>,
    memory_capacity: usize,
    dir: Option<PathBuf>,
    force_refresh: bool,
}

impl CachedEvidenceClient {
    pub fn new(inner: Arc<dyn EvidenceClient>, namespace: impl Into<String>) -> Self {
        Self {
            inner,
            namespace: namespace.into(),
            memory: DashMap::new(),
            memory_order: Mutex::new(VecDeque::new()),
            memory_capacity: DEFAULT_MEMORY_ENTRIES,
            dir: None,
            force_refresh: false,
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Cap the in-memory entries; zero keeps nothing in memory
    pub fn with_memory_capacity(mut self, entries: usize) -> Self {
        self.memory_capacity = entries;
        self
    }

    /// Skip lookups but still store fresh answers
    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    pub fn cache_key(&self, prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update(b"\n");
        hasher.update(prompt.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    async fn load(&self, key: &str) -> Option<EvidenceAnswer> {
        if let Some(hit) = self.memory.get(key) {
            return Some(hit.clone());
        }

        let path = self.dir.as_ref()?.join(format!("{}.json", key));
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice::<EvidenceAnswer>(&bytes) {
            Ok(answer) => {
                self.remember(key, &answer).await;
                Some(answer)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable cache entry");
                None
            }
        }
    }

    async fn remember(&self, key: &str, answer: &EvidenceAnswer) {
        if self.memory_capacity == 0 {
            return;
        }
        let mut order = self.memory_order.lock().await;
        if self.memory.insert(key.to_string(), answer.clone()).is_some() {
            return;
        }
        order.push_back(key.to_string());
        while order.len() > self.memory_capacity {
            let Some(oldest) = order.pop_front() else {
                break;
            };
            self.memory.remove(&oldest);
            debug!(namespace = %self.namespace, key = %oldest, "evicted evidence cache entry from memory");
        }
    }

    async fn store(&self, key: &str, answer: &EvidenceAnswer) {
        self.remember(key, answer).await;

        let Some(dir) = &self.dir else {
            return;
        };
        if let Err(e) = write_entry(dir, key, answer).await {
            warn!(key, error = %e, "failed to persist cache entry");
        }
    }
}

async fn write_entry(dir: &Path, key: &str, answer: &EvidenceAnswer) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let body = serde_json::to_vec_pretty(answer)?;
    let tmp = dir.join(format!("{}.{}.tmp", key, Uuid::new_v4()));
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, dir.join(format!("{}.json", key))).await?;
    Ok(())
}

#[async_trait]
impl EvidenceClient for CachedEvidenceClient {
    async fn ask(&self, prompt: &str) -> EvidenceAnswer {
        let key = self.cache_key(prompt);
        if !self.force_refresh {
            if let Some(hit) = self.load(&key).await {
                debug!(namespace = %self.namespace, key = %key, "evidence cache hit");
                return hit;
            }
        }

        let answer = self.inner.ask(prompt).await;
        if answer.is_success() {
            self.store(&key, &answer).await;
        }
        answer
    }
}
