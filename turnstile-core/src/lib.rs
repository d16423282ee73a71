pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod stats;
pub mod store;
pub mod tracer;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::CoreError;
pub use llm::{ChatOptions, LlmService};
pub use tracer::{Tracer, TurnScope};
pub use upstream::{AgentClient, HttpAgentClient, StreamChunk};
