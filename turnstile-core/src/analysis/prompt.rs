//! Prompt-effectiveness aggregation: per-agent success rate and spend,
//! the substrate for prompt A/B comparisons. Contract only for now; the
//! comparison endpoints are not exposed yet.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::CoreError;
use crate::models::trace::{Trace, TraceStatus};
use crate::stats;
use crate::store::TraceStore;

#[derive(Debug, Clone, Serialize)]
pub struct PromptAnalysisResult {
    pub session_id: String,
    pub variants: Vec<PromptVariantStats>,
}

/// One "prompt variant" is one agent kind as recorded on the trace.
#[derive(Debug, Clone, Serialize)]
pub struct PromptVariantStats {
    pub agent_name: String,
    pub trace_count: usize,
    pub success_rate: f64,
    pub avg_cost: f64,
    pub avg_tokens: f64,
}

#[derive(Clone)]
pub struct PromptAnalyzer {
    store: TraceStore,
}

impl PromptAnalyzer {
    pub fn new(store: TraceStore) -> Self {
        Self { store }
    }

    pub async fn analyze(&self, session_id: &str) -> Result<PromptAnalysisResult, CoreError> {
        let traces = self.store.get_session_traces(session_id).await?;
        Ok(analyze_variants(session_id, &traces))
    }
}

pub fn analyze_variants(session_id: &str, traces: &[Trace]) -> PromptAnalysisResult {
    let mut grouped: BTreeMap<&str, Vec<&Trace>> = BTreeMap::new();
    for trace in traces {
        grouped.entry(trace.agent_name.as_str()).or_default().push(trace);
    }

    let variants = grouped
        .into_iter()
        .map(|(agent_name, group)| {
            let costs: Vec<f64> = group.iter().map(|t| t.cost_api).collect();
            let tokens: Vec<f64> = group.iter().map(|t| t.cost_tokens as f64).collect();
            let successes = group
                .iter()
                .filter(|t| t.status == TraceStatus::Completed)
                .count();
            PromptVariantStats {
                agent_name: agent_name.to_string(),
                trace_count: group.len(),
                success_rate: successes as f64 / group.len() as f64,
                avg_cost: stats::avg(&costs),
                avg_tokens: stats::avg(&tokens),
            }
        })
        .collect();

    PromptAnalysisResult {
        session_id: session_id.to_string(),
        variants,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_trace;

    #[test]
    fn variants_group_by_agent_and_compute_success_rate() {
        let mut traces = vec![
            test_trace("a", 0.1, 10),
            test_trace("b", 0.3, 30),
            test_trace("c", 0.2, 20),
        ];
        traces[1].status = TraceStatus::Failed;
        traces[2].agent_name = "simple_chat".to_string();

        let result = analyze_variants("s1", &traces);
        assert_eq!(result.variants.len(), 2);

        let stream = result
            .variants
            .iter()
            .find(|v| v.agent_name == "stream_chat")
            .unwrap();
        assert_eq!(stream.trace_count, 2);
        assert!((stream.success_rate - 0.5).abs() < 1e-9);
        assert!((stream.avg_cost - 0.2).abs() < 1e-9);
    }
}
