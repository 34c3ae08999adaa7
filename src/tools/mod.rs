//! Tool registry and the built-in tool set
//!
//! A tool is a named, schema-typed capability: typed arguments in, text
//! out, explicit success or failure. Handlers never see raw model output;
//! the executor validates arguments against the [`ToolSpec`] first.
//!
//! # Built-in tools
//!
//! ```text
//! calculator      math.rs     arithmetic expression evaluator
//! web_search      web.rs      instant-answer search API
//! http_get        web.rs      fetch a URL
//! ping            system.rs   ICMP reachability via `ping -c 4`
//! system_info     system.rs   disk / gpu / processes / network
//! run_code        code.rs     python / bash / javascript subprocess
//! read_file       files.rs    read a text file
//! write_file      files.rs    write a file
//! list_directory  files.rs    list a directory
//! find_files      files.rs    regex search over file names
//! translate       assist.rs   model-backed translation
//! summarize       assist.rs   model-backed summary
//! analyze_file    assist.rs   model-backed file analysis
//! generate_code   assist.rs   model-backed code generation
//! ```

pub mod assist;
pub mod code;
pub mod files;
pub mod math;
pub mod process;
pub mod registry;
pub mod system;
pub mod web;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::executor::policy::{PolicyViolation, ResourcePolicy};
use crate::llm::{ChatMessage, CompletionBackend};

pub use registry::{
    ArgSpec, ArgType, Constraint, DuplicateToolError, ToolRegistry, ToolSpec, ValidationError,
};

/// Tool arguments: name → JSON value
pub type Arguments = Map<String, Value>;

/// A request to run one tool, created by the classifier or a command prefix
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool_id: String,
    pub arguments: Arguments,
    pub requested_at: DateTime<Utc>,
}

impl ToolInvocation {
    pub fn new(tool_id: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            tool_id: tool_id.into(),
            arguments,
            requested_at: Utc::now(),
        }
    }
}

/// Failure raised inside a tool handler
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Denied(#[from] PolicyViolation),
    #[error("{0}")]
    Fault(String),
}

impl From<ValidationError> for ToolError {
    fn from(e: ValidationError) -> Self {
        ToolError::InvalidArguments(e.to_string())
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        ToolError::Fault(e.to_string())
    }
}

/// The callable half of a tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Everything a handler may touch: the policy, the model and the network
#[derive(Clone)]
pub struct ToolContext {
    pub policy: Arc<ResourcePolicy>,
    pub backend: Option<Arc<dyn CompletionBackend>>,
    pub http: reqwest::Client,
    pub search_endpoint: String,
}

pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://api.duckduckgo.com/";

const MAX_REDIRECTS: usize = 5;

/// Follow a redirect only to a host the policy would accept directly
fn redirect_policy(policy: Arc<ResourcePolicy>) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let verdict = match attempt.url().host_str() {
            Some(host) => policy.check_host(host),
            None => Err(PolicyViolation::InvalidUrl(attempt.url().to_string())),
        };
        match verdict {
            Ok(()) => attempt.follow(),
            Err(violation) => attempt.error(violation),
        }
    })
}

impl ToolContext {
    pub fn new(policy: ResourcePolicy, backend: Option<Arc<dyn CompletionBackend>>) -> Self {
        let policy = Arc::new(policy);
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent(concat!("toolchat/", env!("CARGO_PKG_VERSION")))
                .redirect(redirect_policy(Arc::clone(&policy)))
                .build()
                .unwrap_or_default(),
            policy,
            backend,
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
        }
    }

    pub fn with_search_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.search_endpoint = endpoint.into();
        self
    }

    /// One-shot prompt to the model for the model-backed tools
    ///
    /// Any backend failure here is the tool's failure, not the turn's.
    pub async fn ask_model(&self, system: &str, prompt: String) -> Result<String, ToolError> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| ToolError::Fault("no language model is configured".to_string()))?;
        let messages = [ChatMessage::system(system), ChatMessage::user(prompt)];
        let completion = backend
            .complete(&messages, &[])
            .await
            .map_err(|e| ToolError::Fault(e.to_string()))?;
        let answer = completion.answer();
        if answer.is_empty() {
            return Err(ToolError::Fault("the model returned an empty answer".to_string()));
        }
        Ok(answer)
    }
}

/// Required string argument (already validated by the executor)
pub(crate) fn str_arg<'a>(args: &'a Arguments, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required argument '{name}'")))
}

pub(crate) fn opt_str<'a>(args: &'a Arguments, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

pub(crate) fn opt_u64(args: &Arguments, name: &str) -> Option<u64> {
    args.get(name).and_then(Value::as_u64)
}

/// Registry holding every built-in tool
pub fn builtin_registry() -> Result<ToolRegistry, DuplicateToolError> {
    let mut registry = ToolRegistry::new();
    for spec in [
        math::calculator(),
        web::web_search(),
        web::http_get(),
        system::ping(),
        code::run_code(),
        files::read_file(),
        files::write_file(),
        files::list_directory(),
        files::find_files(),
        system::system_info(),
        assist::translate(),
        assist::summarize(),
        assist::analyze_file(),
        assist::generate_code(),
    ] {
        registry.register(spec)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_ids() {
        let registry = builtin_registry().unwrap();
        let ids: Vec<&str> = registry.all().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "calculator",
                "web_search",
                "http_get",
                "ping",
                "run_code",
                "read_file",
                "write_file",
                "list_directory",
                "find_files",
                "system_info",
                "translate",
                "summarize",
                "analyze_file",
                "generate_code",
            ]
        );
        assert!(registry.all().iter().all(|s| !s.description.is_empty()));
    }

    #[test]
    fn test_declarations_cover_every_tool() {
        let registry = builtin_registry().unwrap();
        let declarations = registry.declarations();
        assert_eq!(declarations.len(), registry.len());
        let calc = &declarations[0];
        assert_eq!(calc.function.name, "calculator");
        assert_eq!(calc.function.parameters["required"][0], "expression");
    }

    #[tokio::test]
    async fn test_ask_model_without_backend_is_a_fault() {
        let ctx = ToolContext::new(ResourcePolicy::restricted("/tmp"), None);
        let err = ctx.ask_model("sys", "hi".into()).await.unwrap_err();
        assert!(matches!(err, ToolError::Fault(_)));
    }
}
