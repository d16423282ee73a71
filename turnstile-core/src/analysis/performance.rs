//! Latency analysis over recorded execution steps. Shares the result shape
//! of the cost analyzer; consumed programmatically (the HTTP endpoint for
//! it is not exposed yet).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::CoreError;
use crate::models::trace::ExecutionStep;
use crate::stats;
use crate::store::TraceStore;

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceAnalysisResult {
    pub session_id: String,
    pub summary: PerformanceSummary,
    pub breakdown: PerformanceBreakdown,
    pub bottlenecks: Vec<PerformanceBottleneck>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceSummary {
    pub avg_latency: f64,
    pub max_latency: f64,
    pub min_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub step_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceBreakdown {
    /// Total latency in milliseconds per step type.
    pub by_step_type: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceBottleneck {
    pub step_type: String,
    pub avg_latency: f64,
    pub impact: &'static str,
}

#[derive(Clone)]
pub struct PerformanceAnalyzer {
    store: TraceStore,
}

impl PerformanceAnalyzer {
    pub fn new(store: TraceStore) -> Self {
        Self { store }
    }

    pub async fn analyze(&self, session_id: &str) -> Result<PerformanceAnalysisResult, CoreError> {
        let traces = self.store.get_session_traces(session_id).await?;
        let mut steps = Vec::new();
        for trace in &traces {
            steps.extend(self.store.get_steps(&trace.id).await?);
        }
        Ok(analyze_steps(session_id, &steps))
    }
}

pub fn analyze_steps(session_id: &str, steps: &[ExecutionStep]) -> PerformanceAnalysisResult {
    // Snapshot markers carry no latency of their own.
    let timed: Vec<&ExecutionStep> = steps.iter().filter(|s| s.latency_ms > 0).collect();
    let latencies: Vec<f64> = timed.iter().map(|s| s.latency_ms as f64).collect();

    let summary = if latencies.is_empty() {
        PerformanceSummary::default()
    } else {
        PerformanceSummary {
            avg_latency: stats::avg(&latencies),
            max_latency: stats::max(&latencies),
            min_latency: stats::min(&latencies),
            p95_latency: stats::percentile(&latencies, 95.0),
            p99_latency: stats::percentile(&latencies, 99.0),
            step_count: latencies.len(),
        }
    };

    let mut by_step_type: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for step in &timed {
        by_step_type
            .entry(step.step_type.clone())
            .or_default()
            .push(step.latency_ms as f64);
    }

    let breakdown = PerformanceBreakdown {
        by_step_type: by_step_type
            .iter()
            .map(|(k, v)| (k.clone(), stats::sum(v)))
            .collect(),
    };

    let mut bottlenecks: Vec<PerformanceBottleneck> = by_step_type
        .iter()
        .map(|(step_type, latencies)| {
            let avg = stats::avg(latencies);
            let impact = if avg > 10_000.0 {
                "high"
            } else if avg > 1_000.0 {
                "medium"
            } else {
                "low"
            };
            PerformanceBottleneck {
                step_type: step_type.clone(),
                avg_latency: avg,
                impact,
            }
        })
        .collect();
    bottlenecks.sort_by(|a, b| {
        b.avg_latency
            .partial_cmp(&a.avg_latency)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.step_type.cmp(&b.step_type))
    });

    PerformanceAnalysisResult {
        session_id: session_id.to_string(),
        summary,
        breakdown,
        bottlenecks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::trace::{STEP_LLM_CALL, STEP_SNAPSHOT, STEP_TOOL_CALL};

    fn step(step_type: &str, latency_ms: i32) -> ExecutionStep {
        let mut s = ExecutionStep::new("t1", step_type);
        s.latency_ms = latency_ms;
        s
    }

    #[test]
    fn snapshots_are_excluded_from_latency() {
        let steps = vec![step(STEP_LLM_CALL, 1200), step(STEP_SNAPSHOT, 0)];
        let result = analyze_steps("s1", &steps);
        assert_eq!(result.summary.step_count, 1);
        assert_eq!(result.summary.avg_latency, 1200.0);
    }

    #[test]
    fn bottlenecks_rank_by_average_latency() {
        let steps = vec![
            step(STEP_LLM_CALL, 12_000),
            step(STEP_LLM_CALL, 14_000),
            step(STEP_TOOL_CALL, 500),
        ];
        let result = analyze_steps("s1", &steps);
        assert_eq!(result.bottlenecks[0].step_type, STEP_LLM_CALL);
        assert_eq!(result.bottlenecks[0].impact, "high");
        assert_eq!(result.bottlenecks[1].impact, "low");
    }

    #[test]
    fn empty_steps_produce_empty_summary() {
        let result = analyze_steps("s1", &[]);
        assert_eq!(result.summary.step_count, 0);
        assert!(result.bottlenecks.is_empty());
    }
}
