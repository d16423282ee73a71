//! Read-only analytics over the trace store. Each analyzer consumes an
//! input record and returns a structured result computed purely from the
//! persisted trace/step data plus the [`crate::stats`] helpers.

pub mod cost;
pub mod performance;
pub mod prompt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::trace::{Trace, TraceStatus};

pub use cost::{CostAnalysisInput, CostAnalysisResult, CostAnalyzer};
pub use performance::{PerformanceAnalysisResult, PerformanceAnalyzer};
pub use prompt::{PromptAnalysisResult, PromptAnalyzer};

/// Inclusive time window over trace start times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start_time && ts <= self.end_time
    }
}

/// Optional filters applied before aggregation.
#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    pub min_cost: Option<f64>,
    pub max_cost: Option<f64>,
    pub status: Option<TraceStatus>,
    pub model_names: Vec<String>,
}

pub fn filter_traces(traces: Vec<Trace>, criteria: &FilterCriteria) -> Vec<Trace> {
    traces
        .into_iter()
        .filter(|t| criteria.min_cost.map_or(true, |min| t.cost_api >= min))
        .filter(|t| criteria.max_cost.map_or(true, |max| t.cost_api <= max))
        .filter(|t| criteria.status.map_or(true, |s| t.status == s))
        .filter(|t| {
            criteria.model_names.is_empty()
                || criteria.model_names.iter().any(|m| m == &model_of(t))
        })
        .collect()
}

/// Model attribution for a trace: the `model` metadata key when present,
/// otherwise the agent name.
pub fn model_of(trace: &Trace) -> String {
    trace
        .metadata
        .get("model")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            if trace.agent_name.is_empty() {
                "unknown".to_string()
            } else {
                trace.agent_name.clone()
            }
        })
}

#[cfg(test)]
pub(crate) fn test_trace(id: &str, cost_api: f64, cost_tokens: i32) -> Trace {
    Trace {
        id: id.to_string(),
        session_id: "s1".to_string(),
        agent_name: "stream_chat".to_string(),
        status: TraceStatus::Completed,
        started_at: Utc::now(),
        ended_at: Some(Utc::now()),
        cost_tokens,
        cost_api,
        metadata: serde_json::json!({}),
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_by_cost_and_status() {
        let traces = vec![
            test_trace("a", 0.05, 10),
            test_trace("b", 0.20, 20),
            test_trace("c", 1.50, 30),
        ];
        let criteria = FilterCriteria {
            min_cost: Some(0.1),
            max_cost: Some(1.0),
            ..Default::default()
        };
        let filtered = filter_traces(traces, &criteria);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "b");
    }

    #[test]
    fn model_attribution_prefers_metadata() {
        let mut trace = test_trace("a", 0.0, 0);
        assert_eq!(model_of(&trace), "stream_chat");
        trace.metadata = serde_json::json!({"model": "gpt-4"});
        assert_eq!(model_of(&trace), "gpt-4");
    }
}
