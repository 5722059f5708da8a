use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{GraphError, Result};

/// A stage that failed during a graph run, kept so the caller can report it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub task_id: String,
    pub message: String,
}

/// Context for sharing data between tasks in a graph execution.
///
/// Values are stored as JSON so any serde type can move between stages. Clones share
/// the same underlying store, which is how fan-out branches publish their outputs.
#[derive(Clone, Debug)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
    failures: Arc<Mutex<Vec<StageFailure>>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            failures: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let key = key.into();
        let value = serde_json::to_value(value)
            .map_err(|e| GraphError::ContextError(format!("cannot store '{}': {}", key, e)))?;
        self.data.insert(key, value);
        Ok(())
    }

    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_sync(key)
    }

    /// Synchronous read, used by edge conditions
    pub fn get_sync<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }

    pub async fn record_failure(&self, task_id: impl Into<String>, message: impl Into<String>) {
        self.failures.lock().await.push(StageFailure {
            task_id: task_id.into(),
            message: message.into(),
        });
    }

    /// Failures in the order they were recorded
    pub async fn failures(&self) -> Vec<StageFailure> {
        self.failures.lock().await.clone()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
