use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    context::Context,
    error::{GraphError, Result},
    task::{NextAction, Task, TaskResult},
};

/// Type alias for edge condition functions
pub type EdgeCondition = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Edge between tasks in the graph
#[derive(Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: Option<EdgeCondition>,
}

/// A graph of stages executed in dependency order.
///
/// Execution never stops on a failing stage: the error is recorded on the
/// [`Context`] and the run follows the failing stage's outgoing edges, so later
/// stages see missing inputs and degrade on their own terms.
pub struct Graph {
    pub id: String,
    tasks: HashMap<String, Arc<dyn Task>>,
    edges: Vec<Edge>,
    start_task_id: Option<String>,
    stage_timeout: Option<Duration>,
}

impl Graph {
    /// Run the graph from its start task until a task ends the run or no edge applies.
    pub async fn execute(&self, context: Context) -> Result<ExecutionSummary> {
        let mut current = self
            .start_task_id
            .clone()
            .ok_or_else(|| GraphError::TaskNotFound("<start>".to_string()))?;
        let limit = self.tasks.len().max(1) * 4;
        let mut outcomes = Vec::new();

        loop {
            if outcomes.len() >= limit {
                return Err(GraphError::StepLimitExceeded {
                    graph_id: self.id.clone(),
                    limit,
                });
            }

            let next = match self.run_stage(&current, context.clone()).await {
                Ok(result) => {
                    debug!(task_id = %current, "stage completed");
                    outcomes.push(StageOutcome {
                        task_id: current.clone(),
                        status: StageStatus::Completed,
                        status_message: result.status_message.clone(),
                    });
                    match result.next_action {
                        NextAction::Continue => self.find_next_task(&current, &context),
                        NextAction::GoTo(target) => {
                            if !self.tasks.contains_key(&target) {
                                return Err(GraphError::TaskNotFound(target));
                            }
                            Some(target)
                        }
                        NextAction::End => None,
                    }
                }
                Err(e) => {
                    warn!(task_id = %current, error = %e, "stage failed, continuing with downstream stages");
                    context.record_failure(current.clone(), e.to_string()).await;
                    outcomes.push(StageOutcome {
                        task_id: current.clone(),
                        status: StageStatus::Failed(e.to_string()),
                        status_message: None,
                    });
                    self.find_next_task(&current, &context)
                }
            };

            match next {
                Some(task_id) => current = task_id,
                None => break,
            }
        }

        info!(graph_id = %self.id, stages = outcomes.len(), "graph run finished");
        Ok(ExecutionSummary {
            graph_id: self.id.clone(),
            outcomes,
        })
    }

    async fn run_stage(&self, task_id: &str, context: Context) -> Result<TaskResult> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| GraphError::TaskNotFound(task_id.to_string()))?;

        let mut result = match self.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, task.run(context))
                .await
                .map_err(|_| GraphError::StageTimeout {
                    task_id: task_id.to_string(),
                    seconds: limit.as_secs(),
                })??,
            None => task.run(context).await?,
        };

        result.task_id = task_id.to_string();
        Ok(result)
    }

    /// Find the next task: the first matching conditional edge, else the first plain edge
    pub fn find_next_task(&self, current_task_id: &str, context: &Context) -> Option<String> {
        let outgoing = || self.edges.iter().filter(|e| e.from == current_task_id);

        outgoing()
            .find(|e| e.condition.as_ref().is_some_and(|condition| condition(context)))
            .or_else(|| outgoing().find(|e| e.condition.is_none()))
            .map(|e| e.to.clone())
    }

    pub fn start_task_id(&self) -> Option<&str> {
        self.start_task_id.as_deref()
    }

    pub fn get_task(&self, task_id: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(task_id).cloned()
    }
}

/// Builder for creating graphs
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            graph: Graph {
                id: id.into(),
                tasks: HashMap::new(),
                edges: Vec::new(),
                start_task_id: None,
                stage_timeout: None,
            },
        }
    }

    /// Add a task; the first task added becomes the start task
    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        let task_id = task.id().to_string();
        if self.graph.start_task_id.is_none() {
            self.graph.start_task_id = Some(task_id.clone());
        }
        self.graph.tasks.insert(task_id, task);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.graph.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition: None,
        });
        self
    }

    pub fn add_conditional_edge<F>(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: F,
    ) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.graph.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition: Some(Arc::new(condition)),
        });
        self
    }

    pub fn set_start_task(mut self, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        if self.graph.tasks.contains_key(&task_id) {
            self.graph.start_task_id = Some(task_id);
        }
        self
    }

    /// Fail any single stage that runs longer than `limit`
    pub fn with_stage_timeout(mut self, limit: Duration) -> Self {
        self.graph.stage_timeout = Some(limit);
        self
    }

    pub fn build(self) -> Graph {
        self.graph
    }
}

/// What happened to every stage visited during one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub graph_id: String,
    pub outcomes: Vec<StageOutcome>,
}

impl ExecutionSummary {
    pub fn failed(&self) -> impl Iterator<Item = &StageOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, StageStatus::Failed(_)))
    }

    pub fn visited(&self, task_id: &str) -> bool {
        self.outcomes.iter().any(|o| o.task_id == task_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub task_id: String,
    pub status: StageStatus,
    pub status_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Completed,
    Failed(String),
}
