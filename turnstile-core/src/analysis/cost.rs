//! Cost analysis: summary, breakdowns, cumulative trends, and hotspot
//! ranking for the traces of one session.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::CoreError;
use crate::models::trace::{ExecutionStep, Trace};
use crate::stats;
use crate::store::TraceStore;

use super::{filter_traces, model_of, FilterCriteria, TimeRange};

/// Estimated blended price used when a step declares tokens but no API cost.
const EST_COST_PER_TOKEN: f64 = 0.000_02;

const HOTSPOT_TOP_N: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct CostAnalysisInput {
    pub session_id: String,
    pub time_range: Option<TimeRange>,
    pub filters: Option<FilterCriteria>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostAnalysisResult {
    pub session_id: String,
    pub summary: CostSummary,
    pub breakdown: CostBreakdown,
    pub trends: CostTrend,
    pub hotspots: Vec<CostHotspot>,
    pub suggestions: Vec<CostSuggestion>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CostSummary {
    pub total_cost: f64,
    pub avg_cost: f64,
    pub max_cost: f64,
    pub min_cost: f64,
    pub total_tokens: i64,
    pub trace_count: usize,
    pub cost_per_token: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CostBreakdown {
    pub by_model: BTreeMap<String, f64>,
    pub by_step_type: BTreeMap<String, f64>,
    /// Keyed by day, `YYYY-MM-DD`.
    pub by_time: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CostTrend {
    pub data_points: Vec<CostDataPoint>,
    pub growth_rate: f64,
    pub is_increasing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostDataPoint {
    pub timestamp: String,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostHotspot {
    pub trace_id: String,
    pub cost: f64,
    pub tokens: i32,
    pub reason: String,
    pub impact: &'static str,
}

/// Placeholder; the suggestion engine is not built yet.
#[derive(Debug, Clone, Serialize)]
pub struct CostSuggestion {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

#[derive(Clone)]
pub struct CostAnalyzer {
    store: TraceStore,
}

impl CostAnalyzer {
    pub fn new(store: TraceStore) -> Self {
        Self { store }
    }

    pub async fn analyze(&self, input: &CostAnalysisInput) -> Result<CostAnalysisResult, CoreError> {
        let mut traces = self.store.get_session_traces(&input.session_id).await?;

        if let Some(range) = &input.time_range {
            traces.retain(|t| range.contains(t.started_at));
        }
        if let Some(filters) = &input.filters {
            traces = filter_traces(traces, filters);
        }

        if traces.is_empty() {
            return Ok(CostAnalysisResult {
                session_id: input.session_id.clone(),
                summary: CostSummary::default(),
                breakdown: CostBreakdown::default(),
                trends: CostTrend::default(),
                hotspots: Vec::new(),
                suggestions: Vec::new(),
            });
        }

        let mut steps = Vec::new();
        for trace in &traces {
            match self.store.get_steps(&trace.id).await {
                Ok(mut trace_steps) => steps.append(&mut trace_steps),
                Err(e) => {
                    tracing::warn!(trace_id = %trace.id, error = %e, "skipping steps in breakdown")
                }
            }
        }

        Ok(CostAnalysisResult {
            session_id: input.session_id.clone(),
            summary: calculate_summary(&traces),
            breakdown: calculate_breakdown(&traces, &steps),
            trends: analyze_trends(&traces),
            hotspots: identify_hotspots(&traces, HOTSPOT_TOP_N),
            suggestions: Vec::new(),
        })
    }
}

pub fn calculate_summary(traces: &[Trace]) -> CostSummary {
    let costs: Vec<f64> = traces.iter().map(|t| t.cost_api).collect();
    let total_tokens: i64 = traces.iter().map(|t| t.cost_tokens as i64).sum();
    let total_cost = stats::sum(&costs);

    CostSummary {
        total_cost,
        avg_cost: stats::avg(&costs),
        max_cost: stats::max(&costs),
        min_cost: stats::min(&costs),
        total_tokens,
        trace_count: traces.len(),
        cost_per_token: if total_tokens > 0 {
            total_cost / total_tokens as f64
        } else {
            0.0
        },
    }
}

pub fn calculate_breakdown(traces: &[Trace], steps: &[ExecutionStep]) -> CostBreakdown {
    let mut breakdown = CostBreakdown::default();

    for trace in traces {
        *breakdown.by_model.entry(model_of(trace)).or_default() += trace.cost_api;
        let day = trace.started_at.format("%Y-%m-%d").to_string();
        *breakdown.by_time.entry(day).or_default() += trace.cost_api;
    }

    for step in steps {
        let cost = if step.cost_api > 0.0 {
            step.cost_api
        } else {
            step.cost_tokens as f64 * EST_COST_PER_TOKEN
        };
        *breakdown
            .by_step_type
            .entry(step.step_type.clone())
            .or_default() += cost;
    }

    breakdown
}

/// Cumulative cost over time. Stable sort by start time ascending, ties
/// broken by trace id.
pub fn analyze_trends(traces: &[Trace]) -> CostTrend {
    let mut ordered: Vec<&Trace> = traces.iter().collect();
    ordered.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut cumulative = 0.0;
    let data_points = ordered
        .iter()
        .map(|t| {
            cumulative += t.cost_api;
            CostDataPoint {
                timestamp: t.started_at.to_rfc3339(),
                cost: cumulative,
            }
        })
        .collect();

    let (growth_rate, is_increasing) = match (ordered.first(), ordered.last()) {
        (Some(first), Some(last)) if ordered.len() > 1 && first.cost_api > 0.0 => (
            (last.cost_api - first.cost_api) / first.cost_api,
            last.cost_api > first.cost_api,
        ),
        _ => (0.0, false),
    };

    CostTrend {
        data_points,
        growth_rate,
        is_increasing,
    }
}

/// Top-N traces by API cost descending, ties broken by trace id ascending.
pub fn identify_hotspots(traces: &[Trace], top_n: usize) -> Vec<CostHotspot> {
    let mut ordered: Vec<&Trace> = traces.iter().collect();
    ordered.sort_by(|a, b| {
        b.cost_api
            .partial_cmp(&a.cost_api)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    ordered
        .into_iter()
        .take(top_n)
        .map(|trace| {
            let impact = if trace.cost_api > 1.0 {
                "high"
            } else if trace.cost_api > 0.1 {
                "medium"
            } else {
                "low"
            };
            CostHotspot {
                trace_id: trace.id.clone(),
                cost: trace.cost_api,
                tokens: trace.cost_tokens,
                reason: format!("model {}", model_of(trace)),
                impact,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_trace;
    use chrono::{Duration, Utc};

    const EPS: f64 = 1e-9;

    fn three_traces() -> Vec<Trace> {
        let base = Utc::now();
        let mut t1 = test_trace("t1", 0.05, 10);
        let mut t2 = test_trace("t2", 0.20, 20);
        let mut t3 = test_trace("t3", 1.50, 30);
        t1.started_at = base;
        t2.started_at = base + Duration::seconds(10);
        t3.started_at = base + Duration::seconds(20);
        vec![t1, t2, t3]
    }

    #[test]
    fn summary_matches_aggregates() {
        let summary = calculate_summary(&three_traces());
        assert!((summary.total_cost - 1.75).abs() < EPS);
        assert!((summary.avg_cost - 1.75 / 3.0).abs() < EPS);
        assert!((summary.max_cost - 1.50).abs() < EPS);
        assert!((summary.min_cost - 0.05).abs() < EPS);
        assert_eq!(summary.total_tokens, 60);
        assert_eq!(summary.trace_count, 3);
        assert!((summary.cost_per_token - 1.75 / 60.0).abs() < EPS);
    }

    #[test]
    fn empty_session_has_zero_cost_per_token() {
        let summary = calculate_summary(&[]);
        assert_eq!(summary.cost_per_token, 0.0);
        assert_eq!(summary.trace_count, 0);
    }

    #[test]
    fn trends_accumulate_in_start_order() {
        let trend = analyze_trends(&three_traces());
        let costs: Vec<f64> = trend.data_points.iter().map(|p| p.cost).collect();
        assert_eq!(costs.len(), 3);
        assert!((costs[0] - 0.05).abs() < EPS);
        assert!((costs[1] - 0.25).abs() < EPS);
        assert!((costs[2] - 1.75).abs() < EPS);
        assert!(trend.is_increasing);
        assert!((trend.growth_rate - (1.50 - 0.05) / 0.05).abs() < EPS);
    }

    #[test]
    fn trend_growth_guards_against_zero_first_cost() {
        let mut traces = three_traces();
        traces[0].cost_api = 0.0;
        let trend = analyze_trends(&traces);
        assert_eq!(trend.growth_rate, 0.0);
    }

    #[test]
    fn hotspots_rank_and_classify_impact() {
        let hotspots = identify_hotspots(&three_traces(), 5);
        assert_eq!(hotspots.len(), 3);
        assert_eq!(hotspots[0].trace_id, "t3");
        assert_eq!(hotspots[0].impact, "high");
        assert_eq!(hotspots[1].trace_id, "t2");
        assert_eq!(hotspots[1].impact, "medium");
        assert_eq!(hotspots[2].trace_id, "t1");
        assert_eq!(hotspots[2].impact, "low");
    }

    #[test]
    fn hotspot_ties_break_by_trace_id() {
        let traces = vec![
            test_trace("b", 0.5, 1),
            test_trace("a", 0.5, 1),
            test_trace("c", 0.5, 1),
        ];
        let hotspots = identify_hotspots(&traces, 2);
        assert_eq!(hotspots[0].trace_id, "a");
        assert_eq!(hotspots[1].trace_id, "b");
    }

    #[test]
    fn breakdown_groups_by_model_day_and_step_type() {
        let traces = three_traces();
        let mut step = ExecutionStep::new("t3", crate::models::trace::STEP_LLM_CALL_STREAM);
        step.cost_api = 1.5;
        step.cost_tokens = 30;
        let mut snap = ExecutionStep::new("t3", crate::models::trace::STEP_SNAPSHOT);
        snap.cost_tokens = 0;

        let breakdown = calculate_breakdown(&traces, &[step, snap]);
        assert!((breakdown.by_model["stream_chat"] - 1.75).abs() < EPS);
        assert!((breakdown.by_step_type["llm_call_stream"] - 1.5).abs() < EPS);
        assert!((breakdown.by_step_type["snapshot"]).abs() < EPS);
        assert_eq!(breakdown.by_time.len(), 1);
    }
}
