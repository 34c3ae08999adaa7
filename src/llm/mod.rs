//! Inference backend integration
//!
//! This module provides the client for the locally hosted OpenAI-compatible
//! server (vLLM) and the [`CompletionBackend`] seam the classifier, the
//! orchestrator and the model-backed tools talk through.

pub mod client;
pub mod tool_use;

use async_trait::async_trait;

// Re-export public types so other modules can `use crate::llm::ChatMessage`
pub use client::{ChatClient, ClientConfig, ModelCard};
pub use tool_use::{
    parse_tool_calls_from_text, strip_thinking, ChatMessage, FunctionCall, Tool, ToolCall,
    ToolFunction,
};

/// Error type for chat operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    /// The inference server could not be reached
    #[error("inference server unavailable: {0}")]
    Unavailable(String),
    #[error("inference server returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid response from inference server: {0}")]
    InvalidResponse(String),
    #[error("empty response from inference server")]
    EmptyResponse,
}

impl ChatError {
    /// Whether this error means the backend cannot serve the turn at all
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ChatError::Unavailable(_))
            || matches!(self, ChatError::Api { status, .. } if *status >= 500 || *status == 429)
    }
}

/// A model reply: plain text, a structured tool-call request, or both
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Final answer text with reasoning blocks removed
    pub fn answer(&self) -> String {
        self.content.as_deref().map(strip_thinking).unwrap_or_default()
    }

    /// The first tool call, native or embedded in the text
    pub fn first_tool_call(&self) -> Option<ToolCall> {
        self.tool_calls.first().cloned().or_else(|| {
            self.content
                .as_deref()
                .map(strip_thinking)
                .and_then(|text| parse_tool_calls_from_text(&text).into_iter().next())
        })
    }
}

/// Chat-completion capability: `complete(messages, tools) -> text | tool call`
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<Completion, ChatError>;

    /// Model name used for metric labels
    fn model_name(&self) -> &str;
}
