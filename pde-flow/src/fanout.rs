use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use crate::{
    context::Context,
    error::Result,
    task::{NextAction, Task, TaskResult},
};

/// Runs independent child tasks concurrently and joins all of them.
///
/// Children share the parent's [`Context`]. A failing child is recorded as a stage
/// failure under its own id and does not affect its siblings; the fan-out itself
/// always completes and continues along its outgoing edge.
pub struct FanOutTask {
    id: String,
    children: Vec<Arc<dyn Task>>,
}

impl FanOutTask {
    pub fn new(id: impl Into<String>, children: Vec<Arc<dyn Task>>) -> Self {
        Self {
            id: id.into(),
            children,
        }
    }

    pub fn child_ids(&self) -> Vec<&str> {
        self.children.iter().map(|c| c.id()).collect()
    }
}

#[async_trait]
impl Task for FanOutTask {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let runs = self.children.iter().map(|child| {
            let context = context.clone();
            async move { (child.id().to_string(), child.run(context).await) }
        });

        let mut completed = 0;
        for (child_id, outcome) in join_all(runs).await {
            match outcome {
                Ok(_) => completed += 1,
                Err(e) => {
                    warn!(task_id = %child_id, error = %e, "fan-out branch failed");
                    context.record_failure(child_id, e.to_string()).await;
                }
            }
        }

        info!(task_id = %self.id, completed, total = self.children.len(), "fan-out joined");
        Ok(TaskResult::new_with_status(
            NextAction::Continue,
            format!("{}/{} branches completed", completed, self.children.len()),
        ))
    }
}
