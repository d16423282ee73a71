use std::sync::Arc;

use sqlx::PgPool;

use turnstile_core::analysis::CostAnalyzer;
use turnstile_core::store::{MessageStore, SessionStore, TraceStore};
use turnstile_core::upstream::AgentClient;
use turnstile_core::{GatewayConfig, LlmService, Tracer};

/// Shared state for all HTTP handlers. One instance per process; every
/// request clones the `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub pool: PgPool,
    pub sessions: SessionStore,
    pub messages: MessageStore,
    pub traces: TraceStore,
    pub tracer: Arc<Tracer>,
    pub llm: LlmService,
    pub agent: Arc<dyn AgentClient>,
    pub cost: CostAnalyzer,
}

impl AppState {
    pub fn new(config: GatewayConfig, pool: PgPool, agent: Arc<dyn AgentClient>) -> Self {
        let traces = TraceStore::new(pool.clone());
        Self {
            sessions: SessionStore::new(pool.clone(), config.budget.clone()),
            messages: MessageStore::new(pool.clone()),
            tracer: Arc::new(Tracer::new(traces.clone())),
            llm: LlmService::new(config.llm.clone()),
            cost: CostAnalyzer::new(traces.clone()),
            traces,
            config,
            pool,
            agent,
        }
    }
}
