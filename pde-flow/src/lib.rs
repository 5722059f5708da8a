pub mod context;
pub mod error;
pub mod fanout;
pub mod graph;
pub mod task;

// Re-export commonly used types
pub use context::{Context, StageFailure};
pub use error::{GraphError, Result};
pub use fanout::FanOutTask;
pub use graph::{ExecutionSummary, Graph, GraphBuilder, StageOutcome, StageStatus};
pub use task::{NextAction, Task, TaskResult};
