use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{context::Context, error::Result};

/// Result of a task execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Set by the graph to the id of the task that produced this result
    pub task_id: String,
    /// Short human-readable note on what the stage produced
    pub status_message: Option<String>,
    /// Next action to take
    pub next_action: NextAction,
}

impl TaskResult {
    pub fn new(next_action: NextAction) -> Self {
        Self {
            task_id: String::new(),
            status_message: None,
            next_action,
        }
    }

    pub fn new_with_status(next_action: NextAction, status_message: impl Into<String>) -> Self {
        Self {
            task_id: String::new(),
            status_message: Some(status_message.into()),
            next_action,
        }
    }
}

/// Defines what should happen after a task completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextAction {
    /// Follow the outgoing edges of this task
    Continue,
    /// Jump to a specific task by id
    GoTo(String),
    /// Stop the run
    End,
}

/// Core trait that all stages implement
#[async_trait]
pub trait Task: Send + Sync {
    /// Unique identifier for this task
    fn id(&self) -> &str;

    /// Execute the task with the given context
    async fn run(&self, context: Context) -> Result<TaskResult>;
}
