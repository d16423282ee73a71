pub mod llm;
pub mod session;
pub mod trace;

pub use llm::{ModelConfig, Provider, ProviderCredentials};
pub use session::{Budget, Message, Session};
pub use trace::{ExecutionStep, Snapshot, SnapshotStage, Trace, TraceStatus};
