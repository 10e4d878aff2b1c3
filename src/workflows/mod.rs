// Workflow orchestration: graph, nodes, executor and durable checkpoints

pub mod checkpoint;
pub mod error;
pub mod executor;
pub mod graph;
pub mod locks;
pub mod nodes;
pub mod retry;
pub mod run;

pub use checkpoint::{
    CheckpointStore, DirectoryLock, FileCheckpointStore, MemoryCheckpointStore, PersistenceError,
};
pub use error::{EngineError, FailureReason, NodeError};
pub use executor::{EngineBuilder, WorkflowEngine};
pub use graph::{AmbiguityPolicy, GraphSettings, WorkflowGraph};
pub use retry::RetryPolicy;
pub use run::{NodeExecutionRecord, NodeId, RecordOutcome, RunId, RunInput, RunStatus, WorkflowRun};
