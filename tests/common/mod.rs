//! Shared fixtures: an in-process inference backend and orchestrator builder

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use toolchat::agent::{Orchestrator, OrchestratorConfig, Session, SessionStore};
use toolchat::llm::{ChatError, ChatMessage, Completion, CompletionBackend, Tool};
use toolchat::{builtin_registry, IntentClassifier, ResourcePolicy, ToolContext, ToolExecutor};

/// One request the backend received
#[derive(Debug, Clone)]
pub struct Request {
    pub messages: Vec<ChatMessage>,
    /// Tools were offered: a classification request
    pub with_tools: bool,
}

/// Scripted stand-in for the inference server
///
/// Classification requests get `selection` (default: decline with
/// `NO_TOOL`). Completion requests echo the latest tool message as
/// `Result: ...`, greet when there is none, or return `answer` if set.
pub struct MockBackend {
    pub selection: Mutex<Completion>,
    pub answer: Mutex<Option<String>>,
    pub unavailable: AtomicBool,
    pub requests: Mutex<Vec<Request>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            selection: Mutex::new(Completion::text("NO_TOOL")),
            answer: Mutex::new(None),
            unavailable: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn select(&self, completion: Completion) {
        *self.selection.lock().unwrap() = completion;
    }

    pub fn answer_with(&self, text: &str) {
        *self.answer.lock().unwrap() = Some(text.to_string());
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn classification_requests(&self) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| r.with_tools).count()
    }

    pub fn completion_requests(&self) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| !r.with_tools).count()
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<Completion, ChatError> {
        self.requests.lock().unwrap().push(Request {
            messages: messages.to_vec(),
            with_tools: !tools.is_empty(),
        });
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChatError::Unavailable("connection refused".to_string()));
        }
        if !tools.is_empty() {
            return Ok(self.selection.lock().unwrap().clone());
        }
        if let Some(answer) = self.answer.lock().unwrap().clone() {
            return Ok(Completion::text(answer));
        }

        let reply = match messages.last() {
            Some(last) if last.role == "tool" => format!("Result: {}", last.text()),
            _ => "Hello! How can I help you today?".to_string(),
        };
        Ok(Completion::text(reply))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// Orchestrator over the built-in tools with `policy`, persisting to `store`
pub fn orchestrator(
    backend: &Arc<MockBackend>,
    policy: ResourcePolicy,
    session: Session,
    store: Option<SessionStore>,
) -> Orchestrator {
    let shared: Arc<dyn CompletionBackend> = backend.clone();
    let registry = Arc::new(builtin_registry().unwrap());
    let context = ToolContext::new(policy, Some(shared.clone()));
    Orchestrator::new(
        IntentClassifier::new(registry.clone(), Some(shared.clone()), true),
        ToolExecutor::new(registry, context),
        shared,
        session,
        store,
        OrchestratorConfig::default(),
    )
}

/// Restricted policy rooted at `root` (no network)
pub fn restricted(root: &Path) -> ResourcePolicy {
    ResourcePolicy::restricted(root)
}
