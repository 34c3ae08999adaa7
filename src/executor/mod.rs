//! Tool Executor
//!
//! Runs exactly one [`ToolInvocation`] and always returns a [`ToolResult`].
//! Each run is bounded by the policy: arguments are re-validated, the
//! handler runs on its own task under a wall-clock timeout, and output is
//! capped with the truncation recorded in the result.
//!
//! ```text
//! invocation → lookup → policy check → validate → spawn(handler) ─┬─ done ──→ cap output → Success
//!                                                                 ├─ error ─→ Failure(kind)
//!                                                                 └─ timeout → abort task → Failure(Timeout)
//! ```

pub mod policy;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, info_span, warn, Instrument};

use crate::metrics::{TOOL_CALLS, TOOL_DURATION};
use crate::tools::{ToolContext, ToolError, ToolInvocation, ToolRegistry};

pub use policy::{PolicyViolation, Profile, ResourcePolicy};

/// Why a tool run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    InvalidArguments,
    ExecutionFault,
    ResourceDenied,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::InvalidArguments => "invalid_arguments",
            FailureKind::ExecutionFault => "execution_fault",
            FailureKind::ResourceDenied => "resource_denied",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureKind::Timeout => "timed out",
            FailureKind::InvalidArguments => "invalid arguments",
            FailureKind::ExecutionFault => "execution failed",
            FailureKind::ResourceDenied => "not permitted",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success { payload: String },
    Failure { kind: FailureKind, message: String },
}

/// Output dropped by the size cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncation {
    pub original_bytes: usize,
    pub kept_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub invocation: ToolInvocation,
    pub outcome: ToolOutcome,
    pub duration: Duration,
    pub truncation: Option<Truncation>,
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.outcome {
            ToolOutcome::Failure { kind, .. } => Some(kind),
            ToolOutcome::Success { .. } => None,
        }
    }

    /// Text recorded as the tool turn
    ///
    /// The payload on success (with a truncation note when capped), a
    /// one-line explanation on failure.
    pub fn summary(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { payload } => match self.truncation {
                Some(t) => format!(
                    "{payload}\n[output truncated: kept {} of {} bytes]",
                    t.kept_bytes, t.original_bytes
                ),
                None => payload.clone(),
            },
            ToolOutcome::Failure { kind, message } => {
                format!("Error: {} {kind}: {message}", self.invocation.tool_id)
            }
        }
    }

    fn status_label(&self) -> &'static str {
        self.failure_kind().map_or("success", FailureKind::as_str)
    }
}

/// Cut `text` to at most `cap` bytes on a char boundary
fn cap_output(text: String, cap: usize) -> (String, Option<Truncation>) {
    if text.len() <= cap {
        return (text, None);
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let truncation = Truncation {
        original_bytes: text.len(),
        kept_bytes: end,
    };
    (text[..end].to_string(), Some(truncation))
}

impl From<ToolError> for ToolOutcome {
    fn from(e: ToolError) -> Self {
        let (kind, message) = match e {
            ToolError::InvalidArguments(msg) => (FailureKind::InvalidArguments, msg),
            ToolError::Denied(violation) => (FailureKind::ResourceDenied, violation.to_string()),
            ToolError::Fault(msg) => (FailureKind::ExecutionFault, msg),
        };
        ToolOutcome::Failure { kind, message }
    }
}

/// Executes tool invocations under the configured resource policy
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    context: ToolContext,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, context: ToolContext) -> Self {
        Self { registry, context }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &ResourcePolicy {
        &self.context.policy
    }

    /// Run one invocation to completion, timeout or failure
    pub async fn execute(&self, invocation: ToolInvocation) -> ToolResult {
        let span = info_span!(
            "tool_execution",
            tool = %invocation.tool_id,
            otel.name = "tool_execution"
        );
        self.execute_inner(invocation).instrument(span).await
    }

    async fn execute_inner(&self, invocation: ToolInvocation) -> ToolResult {
        let start = Instant::now();
        let (outcome, truncation) = self.run(&invocation).await;
        let result = ToolResult {
            invocation,
            outcome,
            duration: start.elapsed(),
            truncation,
        };

        let tool = result.invocation.tool_id.as_str();
        let arguments = self
            .registry
            .lookup(tool)
            .map(|spec| spec.redact(&result.invocation.arguments))
            .unwrap_or_else(|| format!("<{} arguments>", result.invocation.arguments.len()));
        let duration_ms = result.duration.as_secs_f64() * 1000.0;

        TOOL_CALLS
            .with_label_values(&[tool, result.status_label()])
            .inc();
        TOOL_DURATION
            .with_label_values(&[tool])
            .observe(result.duration.as_secs_f64());

        match &result.outcome {
            ToolOutcome::Success { payload } => info!(
                tool,
                %arguments,
                duration_ms,
                output_bytes = payload.len(),
                truncated = result.truncation.is_some(),
                "Tool succeeded"
            ),
            ToolOutcome::Failure { kind, message } => warn!(
                tool,
                %arguments,
                duration_ms,
                kind = kind.as_str(),
                error = %message,
                "Tool failed"
            ),
        }
        result
    }

    async fn run(&self, invocation: &ToolInvocation) -> (ToolOutcome, Option<Truncation>) {
        let Some(spec) = self.registry.lookup(&invocation.tool_id) else {
            return (
                ToolOutcome::Failure {
                    kind: FailureKind::InvalidArguments,
                    message: format!("unknown tool '{}'", invocation.tool_id),
                },
                None,
            );
        };

        let policy = &self.context.policy;
        if let Err(violation) = policy.check_tool(&spec.id) {
            return (ToolError::Denied(violation).into(), None);
        }

        // Re-validate: the invocation may be stale or hand-built
        let arguments = match spec.validate(&invocation.arguments) {
            Ok(args) => args,
            Err(e) => return (ToolError::from(e).into(), None),
        };

        let timeout = policy.timeout_for(&spec.id, spec.timeout);
        let handler = Arc::clone(&spec.handler);
        let context = self.context.clone();
        let mut task = tokio::spawn(async move { handler.call(&arguments, &context).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(payload))) => {
                let (payload, truncation) = cap_output(payload, policy.output_cap);
                (ToolOutcome::Success { payload }, truncation)
            }
            Ok(Ok(Err(e))) => (e.into(), None),
            Ok(Err(join_error)) => (
                ToolOutcome::Failure {
                    kind: FailureKind::ExecutionFault,
                    message: format!("tool task crashed: {join_error}"),
                },
                None,
            ),
            Err(_) => {
                // Dropping the handler future kills any process group it owns
                task.abort();
                let _ = task.await;
                (
                    ToolOutcome::Failure {
                        kind: FailureKind::Timeout,
                        message: format!("no result within {}s", timeout.as_secs_f64()),
                    },
                    None,
                )
            }
        }
    }
}
