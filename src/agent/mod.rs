//! Agent module: the conversation loop and its persistence
//!
//! This module ties the classifier and the executor into turns:
//! - [`Orchestrator`] runs one utterance through the turn state machine
//! - [`SessionStore`] persists the ordered turns between runs
//! - [`commands`] parses REPL lines, including tool prefixes that skip
//!   classification
//!
//! # Architecture
//!
//! ```text
//! REPL line → commands::parse
//!               ├─ tool prefix ──→ Orchestrator::run_invocation ─┐
//!               └─ free text ────→ Orchestrator::handle_utterance│
//!                                     ↓                          │
//!                              IntentClassifier                  │
//!                                     ↓                          ↓
//!                              ToolExecutor (0 or 1 tool) ←──────┘
//!                                     ↓
//!                              CompletionBackend → assistant turn
//!                                     ↓
//!                              SessionStore::save
//! ```

pub mod commands;
pub mod controller;
pub mod sessions;

pub use commands::Command;
pub use controller::{
    AgentError, ContextReport, Orchestrator, OrchestratorConfig, ToolSummary, TurnOutcome,
    TurnState, DEFAULT_SYSTEM_PROMPT,
};
pub use sessions::{ConversationTurn, Role, Session, SessionError, SessionStore, SessionSummary};
