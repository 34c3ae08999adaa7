//! toolchat - a tool-dispatching chat agent for a local inference server
//!
//! Each user utterance either gets a direct answer or runs exactly one
//! built-in tool (calculator, web search, code execution, file I/O,
//! translation, ...) whose output is folded into the reply.
//!
//! # Modules
//!
//! - `llm` - OpenAI-compatible chat client and the `CompletionBackend` seam
//! - `tools` - tool registry, argument schemas and the built-in tools
//! - `classifier` - lexical then semantic intent classification
//! - `executor` - bounded tool execution under a resource policy
//! - `agent` - turn orchestration, REPL commands and session persistence
//! - `config` - TOML configuration with environment overrides
//! - `metrics` - Prometheus metrics
//! - `telemetry` - logging and OpenTelemetry setup
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use toolchat::{builtin_registry, ChatClient, IntentClassifier, Orchestrator, ToolContext, ToolExecutor};
//!
//! let config = toolchat::AgentConfig::load(None)?;
//! let backend: Arc<dyn toolchat::CompletionBackend> = Arc::new(ChatClient::new(config.client_config())?);
//! let registry = Arc::new(builtin_registry()?);
//! let context = ToolContext::new(config.resource_policy()?, Some(backend.clone()));
//! let mut agent = Orchestrator::new(
//!     IntentClassifier::new(registry.clone(), Some(backend.clone()), true),
//!     ToolExecutor::new(registry, context),
//!     backend,
//!     toolchat::Session::new("scratch", 260_000),
//!     None,
//!     config.orchestrator_config(),
//! );
//! let outcome = agent.handle_utterance("What is 2^10 + 5 * 3?").await?;
//! ```

pub mod agent;
pub mod classifier;
pub mod config;
pub mod executor;
pub mod llm;
pub mod metrics;
pub mod telemetry;
pub mod tools;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentError, Orchestrator, Session, SessionStore, TurnOutcome};
pub use classifier::{Decision, IntentClassifier};
pub use config::AgentConfig;
pub use executor::{FailureKind, ResourcePolicy, ToolExecutor, ToolOutcome, ToolResult};
pub use llm::{ChatClient, ChatError, CompletionBackend};
pub use tools::{builtin_registry, ToolContext, ToolInvocation, ToolRegistry};
