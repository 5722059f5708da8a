use thiserror::Error;

/// Errors raised while building or executing a stage graph
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Task execution failed: {0}")]
    TaskExecutionFailed(String),

    #[error("Context error: {0}")]
    ContextError(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Stage {task_id} timed out after {seconds}s")]
    StageTimeout { task_id: String, seconds: u64 },

    #[error("Graph {graph_id} exceeded {limit} steps")]
    StepLimitExceeded { graph_id: String, limit: usize },
}

pub type Result<T> = std::result::Result<T, GraphError>;
