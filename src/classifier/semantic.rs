//! Semantic stage: let the model pick at most one tool
//!
//! The model sees the tool declarations and the recent conversation and
//! either answers with a tool call or declines. Whatever it returns must
//! validate against the chosen tool's schema, otherwise the stage yields
//! nothing and the turn is answered conversationally.

use std::time::Instant;

use tracing::{debug, warn};

use crate::llm::{ChatError, ChatMessage, CompletionBackend};
use crate::metrics::LLM_CALL_TIME;
use crate::tools::{ToolInvocation, ToolRegistry};

pub const SELECTION_PROMPT: &str = "You decide whether the user's latest message needs one of \
the available tools. If a tool is needed, call exactly one tool with complete arguments. \
If the message can be answered directly from conversation or general knowledge, reply with \
the single word NO_TOOL. Never invent tools or arguments the user did not provide.";

/// Ask the model for a tool; `Ok(None)` when it declines or answers badly
///
/// Only an unreachable backend is an error; every other failure of this
/// stage degrades to "no tool".
pub async fn select_tool(
    backend: &dyn CompletionBackend,
    registry: &ToolRegistry,
    utterance: &str,
    context: &[ChatMessage],
) -> Result<Option<ToolInvocation>, ChatError> {
    let mut messages = Vec::with_capacity(context.len() + 2);
    messages.push(ChatMessage::system(SELECTION_PROMPT));
    messages.extend_from_slice(context);
    messages.push(ChatMessage::user(utterance));

    let start = Instant::now();
    let result = backend.complete(&messages, &registry.declarations()).await;
    LLM_CALL_TIME
        .with_label_values(&[backend.model_name(), "classify"])
        .observe(start.elapsed().as_secs_f64());

    let completion = match result {
        Ok(completion) => completion,
        Err(e) if e.is_unavailable() => return Err(e),
        Err(e) => {
            warn!(error = %e, "semantic classification failed; answering directly");
            return Ok(None);
        }
    };

    let Some(call) = completion.first_tool_call() else {
        debug!("model selected no tool");
        return Ok(None);
    };
    let tool_id = call.function.name.as_str();

    let Some(spec) = registry.lookup(tool_id) else {
        warn!(tool = tool_id, "model selected an unknown tool");
        return Ok(None);
    };
    let Some(raw) = call.function.parsed_arguments() else {
        warn!(tool = tool_id, "model produced unparseable arguments");
        return Ok(None);
    };
    match spec.validate(&raw) {
        Ok(arguments) => Ok(Some(ToolInvocation::new(tool_id, arguments))),
        Err(e) => {
            warn!(tool = tool_id, error = %e, "model arguments failed validation");
            Ok(None)
        }
    }
}
