//! Prometheus metrics for the conversation loop
//!
//! Metrics live in the default prometheus registry. The REPL `metrics`
//! command prints them in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Turn Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Completed or aborted turn cycles.
    ///
    /// Labels:
    /// - outcome: "direct", "tool_success", "tool_failure" or "backend_unavailable"
    pub static ref TURNS: CounterVec = register_counter_vec!(
        "toolchat_turns_total",
        "Turn cycles processed by the orchestrator",
        &["outcome"]
    ).expect("failed to register TURNS metric");

    /// Intent classifier decisions.
    ///
    /// Labels:
    /// - stage: "lexical", "semantic" or "command"
    /// - decision: the chosen tool id, or "none"
    pub static ref CLASSIFIER_DECISIONS: CounterVec = register_counter_vec!(
        "toolchat_classifier_decisions_total",
        "Intent classifier decisions by stage",
        &["stage", "decision"]
    ).expect("failed to register CLASSIFIER_DECISIONS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Tool Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Tool executions by result.
    ///
    /// Labels:
    /// - tool: tool id
    /// - status: "success", "timeout", "invalid_arguments", "execution_fault", "resource_denied"
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "toolchat_tool_calls_total",
        "Tool executions by tool and status",
        &["tool", "status"]
    ).expect("failed to register TOOL_CALLS metric");

    pub static ref TOOL_DURATION: HistogramVec = register_histogram_vec!(
        "toolchat_tool_duration_seconds",
        "Wall-clock duration of tool executions",
        &["tool"],
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]
    ).expect("failed to register TOOL_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Inference Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Inference backend call latency.
    ///
    /// Labels:
    /// - model: served model name
    /// - purpose: "classify" or "complete"
    pub static ref LLM_CALL_TIME: HistogramVec = register_histogram_vec!(
        "toolchat_llm_call_seconds",
        "Latency of chat-completion calls",
        &["model", "purpose"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_TIME metric");
}

/// Render every registered metric in the text exposition format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
