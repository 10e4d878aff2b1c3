// iac-conductor library - IaC dialect detection and durable delegation workflows
// This exposes the core components for testing and integration

pub mod approval;
pub mod classifier;
pub mod cli;
pub mod clock;
pub mod config;
pub mod delegation;
pub mod github;
pub mod notify;
pub mod observability;
pub mod scanner;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use approval::{ApprovalDesk, ApprovalError, ApprovalGate, GateDecision, Resumption};
pub use classifier::{
    CachedClassifier, ClassificationResult, ClassifierSettings, CloudProvider, Dialect, IacDialect,
    InfraClassifier, ListingEntry, RepositoryListing, SuggestedLayout,
};
pub use clock::Clock;
pub use config::ConductorConfig;
pub use delegation::{
    AgentStatus, CodingAgent, DelegatedTask, DelegationError, DelegationRequest, TaskStatus,
};
pub use github::{GitHubClient, GitHubError};
pub use notify::{BroadcastNotifier, Milestone, Notification, NotificationSink, TracingNotifier};
pub use observability::{engine_metrics, EngineMetrics, OperationTimer};
pub use scanner::{DirectoryScanner, EvidenceScanner, GitIndexScanner, ScanError};
pub use telemetry::{create_run_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use workflows::{
    CheckpointStore, EngineError, FailureReason, FileCheckpointStore, MemoryCheckpointStore, RunId,
    RunInput, RunStatus, WorkflowEngine, WorkflowRun,
};
