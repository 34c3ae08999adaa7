//! Conversation Orchestrator - one utterance in, one assistant turn out
//!
//! The orchestrator drives a small state machine per turn:
//!
//! ```text
//! Idle → Classifying ─┬─ Invoke ─→ Executing ─→ Completing → Idle
//!                     └─ NoTool ──────────────→ Completing → Idle
//! ```
//!
//! Turns produced while a cycle is in flight are staged and only written to
//! the session once `Completing` has an answer, so a cycle aborted by an
//! unreachable backend leaves the session exactly as it was.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classifier::{Decision, IntentClassifier, Stage};
use crate::executor::{FailureKind, ToolExecutor, ToolOutcome, ToolResult};
use crate::llm::{ChatError, ChatMessage, CompletionBackend, ToolCall};
use crate::metrics::{CLASSIFIER_DECISIONS, LLM_CALL_TIME, TURNS};
use crate::tools::{ToolInvocation, ToolRegistry};

use super::sessions::{estimate_tokens, ConversationTurn, Role, Session, SessionError, SessionStore};

/// Default system prompt for the completion step
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant running on a local \
machine. When a message from a tool is present, it holds the output of a tool that was just \
run for the user's latest request: base your answer on it, quote exact values, and if the \
tool failed, say plainly that the request could not be completed and why. Otherwise answer \
directly and concisely.";

/// Where a turn cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Classifying,
    Executing,
    Completing,
}

/// Tuning for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Custom system prompt (uses default if None)
    pub system_prompt: Option<String>,
    /// User/assistant turns handed to the classifier as context
    pub classifier_context_turns: usize,
    /// Tokens kept free in the window for the model's answer
    pub completion_reserve: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            classifier_context_turns: 6,
            completion_reserve: 1500,
        }
    }
}

/// What the tool step of a turn did, for display
#[derive(Debug, Clone)]
pub struct ToolSummary {
    pub tool_id: String,
    pub failure: Option<FailureKind>,
    pub duration: Duration,
    pub truncated: bool,
    /// Text recorded as the tool turn
    pub text: String,
}

impl ToolSummary {
    fn from_result(result: &ToolResult) -> Self {
        Self {
            tool_id: result.invocation.tool_id.clone(),
            failure: result.failure_kind(),
            duration: result.duration,
            truncated: result.truncation.is_some(),
            text: result.summary(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of one completed turn cycle
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Unique ID of this cycle (UUID v7), also the `turn_id` span field
    pub turn_id: String,
    /// Assistant text committed to the session
    pub response: String,
    pub tool: Option<ToolSummary>,
    /// `None` for the command-prefix path
    pub stage: Option<Stage>,
    /// Every state the machine passed through, starting and ending at `Idle`
    pub transitions: Vec<TurnState>,
}

/// Conversation size against the token budget
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextReport {
    pub messages: usize,
    pub chars: usize,
    pub estimated_tokens: usize,
    pub token_budget: usize,
    pub remaining_tokens: usize,
    pub usage_percent: f64,
}

/// Error type for orchestrator operations
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The inference server could not serve the turn; nothing was recorded
    #[error("{0}")]
    BackendUnavailable(#[source] ChatError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// A turn produced during the cycle, not yet in the session
struct StagedTurn {
    role: Role,
    content: String,
    tool: Option<String>,
}

/// Bookkeeping for one cycle in flight
struct Cycle {
    turn_id: String,
    staged: Vec<StagedTurn>,
    transitions: Vec<TurnState>,
}

/// Drives turns through classification, execution and completion
pub struct Orchestrator {
    classifier: IntentClassifier,
    executor: ToolExecutor,
    backend: Arc<dyn CompletionBackend>,
    session: Session,
    store: Option<SessionStore>,
    config: OrchestratorConfig,
    state: TurnState,
}

impl Orchestrator {
    /// Create an orchestrator over an already loaded session
    ///
    /// With `store` set, the session is saved after every turn and after
    /// `clear`; without it the conversation lives in memory only.
    pub fn new(
        classifier: IntentClassifier,
        executor: ToolExecutor,
        backend: Arc<dyn CompletionBackend>,
        session: Session,
        store: Option<SessionStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            classifier,
            executor,
            backend,
            session,
            store,
            config,
            state: TurnState::Idle,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.session.turns
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.executor.registry()
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Run one free-text utterance through the full cycle
    pub async fn handle_utterance(&mut self, text: &str) -> Result<TurnOutcome, AgentError> {
        let cycle = self.begin(text);
        let span = self.turn_span(&cycle.turn_id);
        self.classify_and_complete(cycle, text).instrument(span).await
    }

    /// Command-prefix path: the invocation is already decided
    ///
    /// Skips `Classifying` and enters `Executing` directly; everything after
    /// that is shared with [`Orchestrator::handle_utterance`].
    pub async fn run_invocation(
        &mut self,
        text: &str,
        invocation: ToolInvocation,
    ) -> Result<TurnOutcome, AgentError> {
        let cycle = self.begin(text);
        let span = self.turn_span(&cycle.turn_id);
        CLASSIFIER_DECISIONS
            .with_label_values(&["command", &invocation.tool_id])
            .inc();
        self.execute_and_complete(cycle, Some(invocation), None)
            .instrument(span)
            .await
    }

    /// Truncate the conversation; the state machine is untouched
    pub fn clear(&mut self) -> Result<(), AgentError> {
        self.session.clear();
        info!(session = %self.session.name, "Conversation cleared");
        self.persist()
    }

    /// Write the session now
    pub fn save(&self) -> Result<(), AgentError> {
        self.persist()
    }

    pub fn context_report(&self) -> ContextReport {
        let estimated_tokens = self.session.total_tokens();
        let token_budget = self.session.token_budget;
        let usage_percent = if token_budget == 0 {
            100.0
        } else {
            estimated_tokens as f64 * 100.0 / token_budget as f64
        };
        ContextReport {
            messages: self.session.turns.len(),
            chars: self.session.total_chars(),
            estimated_tokens,
            token_budget,
            remaining_tokens: token_budget.saturating_sub(estimated_tokens),
            usage_percent,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cycle stages
    // ─────────────────────────────────────────────────────────────────────

    fn begin(&mut self, text: &str) -> Cycle {
        self.state = TurnState::Idle;
        Cycle {
            turn_id: Uuid::now_v7().to_string(),
            staged: vec![StagedTurn {
                role: Role::User,
                content: text.to_string(),
                tool: None,
            }],
            transitions: vec![TurnState::Idle],
        }
    }

    fn turn_span(&self, turn_id: &str) -> tracing::Span {
        info_span!(
            "turn",
            turn_id = %turn_id,
            session = %self.session.name,
            otel.name = "turn"
        )
    }

    fn enter(&mut self, cycle: &mut Cycle, state: TurnState) {
        self.state = state;
        cycle.transitions.push(state);
    }

    async fn classify_and_complete(
        &mut self,
        mut cycle: Cycle,
        text: &str,
    ) -> Result<TurnOutcome, AgentError> {
        self.enter(&mut cycle, TurnState::Classifying);
        let context = self.classifier_context();
        let result = self.classifier.classify(text, &context).await;
        let classification = match result {
            Ok(classification) => classification,
            Err(e) => return Err(self.abort(e)),
        };
        let invocation = match classification.decision {
            Decision::Invoke(invocation) => Some(invocation),
            Decision::NoTool => None,
        };
        self.execute_and_complete(cycle, invocation, Some(classification.stage))
            .await
    }

    async fn execute_and_complete(
        &mut self,
        mut cycle: Cycle,
        invocation: Option<ToolInvocation>,
        stage: Option<Stage>,
    ) -> Result<TurnOutcome, AgentError> {
        let tool = match invocation {
            Some(invocation) => {
                self.enter(&mut cycle, TurnState::Executing);
                let result = self.executor.execute(invocation).await;
                let summary = ToolSummary::from_result(&result);
                cycle.staged.push(StagedTurn {
                    role: Role::Tool,
                    content: summary.text.clone(),
                    tool: Some(summary.tool_id.clone()),
                });
                Some((result, summary))
            }
            None => None,
        };

        self.enter(&mut cycle, TurnState::Completing);
        let result = self
            .complete(&cycle.staged, tool.as_ref().map(|(r, _)| r))
            .await;
        let response = match result {
            Ok(response) => response,
            Err(e) => return Err(self.abort(e)),
        };

        for staged in cycle.staged.drain(..) {
            match staged.tool {
                Some(tool_id) => self.session.append_tool(tool_id, staged.content),
                None => self.session.append(staged.role, staged.content),
            };
        }
        self.session.append(Role::Assistant, response.clone());

        let outcome = match &tool {
            None => "direct",
            Some((result, _)) if result.is_success() => "tool_success",
            Some(_) => "tool_failure",
        };
        TURNS.with_label_values(&[outcome]).inc();
        self.enter(&mut cycle, TurnState::Idle);
        info!(
            outcome,
            turns = self.session.turns.len(),
            response_chars = response.chars().count(),
            "Turn completed"
        );

        self.persist()?;
        Ok(TurnOutcome {
            turn_id: cycle.turn_id,
            response,
            tool: tool.map(|(_, summary)| summary),
            stage,
            transitions: cycle.transitions,
        })
    }

    /// Produce the assistant text for the staged turns
    ///
    /// Only an unavailable backend is an error; any other failure or an
    /// empty answer falls back to a deterministic reply built from the
    /// tool result.
    async fn complete(
        &self,
        staged: &[StagedTurn],
        tool_result: Option<&ToolResult>,
    ) -> Result<String, ChatError> {
        let messages = self.completion_messages(staged);
        let start = Instant::now();
        let result = self.backend.complete(&messages, &[]).await;
        LLM_CALL_TIME
            .with_label_values(&[self.backend.model_name(), "complete"])
            .observe(start.elapsed().as_secs_f64());

        match result {
            Ok(completion) => {
                let answer = completion.answer();
                if answer.is_empty() {
                    warn!("model returned an empty answer; using fallback reply");
                    Ok(fallback_reply(tool_result))
                } else {
                    Ok(answer)
                }
            }
            Err(e) if e.is_unavailable() => Err(e),
            Err(e) => {
                warn!(error = %e, "completion failed; using fallback reply");
                Ok(fallback_reply(tool_result))
            }
        }
    }

    fn abort(&mut self, error: ChatError) -> AgentError {
        self.state = TurnState::Idle;
        TURNS.with_label_values(&["backend_unavailable"]).inc();
        warn!(error = %error, "Turn aborted; session left unchanged");
        AgentError::BackendUnavailable(error)
    }

    fn persist(&self) -> Result<(), AgentError> {
        if let Some(store) = &self.store {
            store.save(&self.session)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Message rendering
    // ─────────────────────────────────────────────────────────────────────

    /// Recent user/assistant turns for the classifier
    fn classifier_context(&self) -> Vec<ChatMessage> {
        let window = self.session.context_window(self.config.completion_reserve);
        let mut context: Vec<ChatMessage> = window
            .iter()
            .rev()
            .filter(|turn| turn.role != Role::Tool)
            .take(self.config.classifier_context_turns)
            .map(|turn| match turn.role {
                Role::User => ChatMessage::user(turn.content.as_str()),
                _ => ChatMessage::assistant(turn.content.as_str()),
            })
            .collect();
        context.reverse();
        context
    }

    /// System prompt, the budgeted history and the staged turns
    fn completion_messages(&self, staged: &[StagedTurn]) -> Vec<ChatMessage> {
        let system = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let staged_tokens: usize = staged.iter().map(|t| estimate_tokens(&t.content)).sum();
        let reserve = self.config.completion_reserve + staged_tokens;
        let window = self.session.context_window(reserve);

        let mut messages = vec![ChatMessage::system(system)];
        for turn in window {
            push_rendered(
                &mut messages,
                turn.role,
                &turn.content,
                turn.tool.as_deref(),
                &format!("call_{}", turn.turn_index),
            );
        }
        for (i, turn) in staged.iter().enumerate() {
            push_rendered(
                &mut messages,
                turn.role,
                &turn.content,
                turn.tool.as_deref(),
                &format!("call_pending_{i}"),
            );
        }
        messages
    }
}

/// Append one turn in chat form; a tool turn becomes a call/answer pair
fn push_rendered(
    messages: &mut Vec<ChatMessage>,
    role: Role,
    content: &str,
    tool: Option<&str>,
    call_id: &str,
) {
    match (role, tool) {
        (Role::User, _) => messages.push(ChatMessage::user(content)),
        (Role::Assistant, _) => messages.push(ChatMessage::assistant(content)),
        (Role::Tool, Some(tool)) => {
            messages.push(ChatMessage::assistant_tool_call(ToolCall::new(
                call_id,
                tool,
                json!("{}"),
            )));
            messages.push(ChatMessage::tool(call_id, content));
        }
        // A tool turn without a tool name (older files) reads as context
        (Role::Tool, None) => messages.push(ChatMessage::user(format!("[tool output]\n{content}"))),
    }
}

/// Reply used when the model gives nothing usable
fn fallback_reply(tool_result: Option<&ToolResult>) -> String {
    let Some(result) = tool_result else {
        return "Sorry, I could not come up with an answer to that.".to_string();
    };
    let tool = &result.invocation.tool_id;
    match &result.outcome {
        ToolOutcome::Success { .. } => format!("Here is the {tool} result:\n{}", result.summary()),
        ToolOutcome::Failure { kind, message } => {
            format!("The {tool} request could not be completed ({kind}): {message}")
        }
    }
}
