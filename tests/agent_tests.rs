//! Integration tests for the agent surface
//!
//! These tests verify configuration, the chat wire types and the tool
//! declarations sent to the model. Tests that need a live inference server
//! are marked #[ignore].

use std::sync::Arc;

use toolchat::agent::commands::{self, Command};
use toolchat::agent::{Orchestrator, OrchestratorConfig, Session};
use toolchat::config::AgentConfig;
use toolchat::llm::tool_use::{ChatMessage, ToolCall};
use toolchat::llm::{ChatClient, CompletionBackend};
use toolchat::{builtin_registry, IntentClassifier, ResourcePolicy, ToolContext, ToolExecutor};

/// Test that AgentConfig has sensible defaults
#[test]
fn test_agent_config_defaults() {
    let config = AgentConfig::default();

    assert_eq!(config.base_url, "http://localhost:8000/v1");
    assert_eq!(config.max_tokens, 1500);
    assert_eq!(config.session, "default");
    assert!(config.semantic_fallback);
    assert!(config.classifier_context_turns > 0);
}

/// Test that the client settings follow the config
#[test]
fn test_client_config_from_agent_config() {
    let config = AgentConfig {
        model: "codellama".to_string(),
        request_timeout_secs: 5,
        enable_thinking: Some(false),
        ..Default::default()
    };

    let client = config.client_config();
    assert_eq!(client.model, "codellama");
    assert_eq!(client.request_timeout.as_secs(), 5);
    assert_eq!(client.enable_thinking, Some(false));
    assert_eq!(config.orchestrator_config().completion_reserve, 1500);
}

/// Test ChatMessage construction with helper methods
#[test]
fn test_chat_message_construction() {
    let user_msg = ChatMessage::user("Hello, world!");
    assert_eq!(user_msg.role, "user");
    assert_eq!(user_msg.text(), "Hello, world!");
    assert!(user_msg.tool_calls.is_none());

    let call = ToolCall::new("call_7", "calculator", serde_json::json!({"expression": "1+1"}));
    let request = ChatMessage::assistant_tool_call(call);
    assert_eq!(request.role, "assistant");
    assert!(request.content.is_none());

    let tool_msg = ChatMessage::tool("call_7", "2");
    assert_eq!(tool_msg.role, "tool");
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_7"));
}

/// Test ChatMessage serialization
#[test]
fn test_chat_message_serialization() {
    let msg = ChatMessage::user("test message");
    let json = serde_json::to_string(&msg).unwrap();

    assert!(json.contains("\"role\":\"user\""));
    assert!(json.contains("\"content\":\"test message\""));
    // tool_calls should be skipped when None
    assert!(!json.contains("tool_calls"));
}

/// Test the run_code declaration offered to the model
#[test]
fn test_run_code_declaration() {
    let registry = builtin_registry().unwrap();
    let tool = registry
        .declarations()
        .into_iter()
        .find(|t| t.function.name == "run_code")
        .unwrap();

    assert_eq!(tool.tool_type, "function");
    let params = &tool.function.parameters;
    assert_eq!(params["type"], "object");
    assert!(params["properties"]["language"].is_object());
    assert!(params["properties"]["code"].is_object());

    let required = params["required"].as_array().unwrap();
    assert!(required.iter().any(|v| v == "language"));
    assert!(required.iter().any(|v| v == "code"));

    let languages = params["properties"]["language"]["enum"].as_array().unwrap();
    assert!(languages.iter().any(|v| v == "python"));
    assert!(languages.iter().any(|v| v == "bash"));
}

/// Test every declaration serializes in the OpenAI function format
#[test]
fn test_declarations_serialize() {
    let registry = builtin_registry().unwrap();
    for tool in registry.declarations() {
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("\"type\":\"function\""));
        assert!(json.contains(&format!("\"name\":\"{}\"", tool.function.name)));
    }
}

/// Test every tool prefix names a registered tool
#[test]
fn test_command_prefixes_name_registered_tools() {
    let registry = builtin_registry().unwrap();
    for line in [
        "/read a.txt",
        "/write a.txt hi",
        "/list",
        "/search . main",
        "/web rust",
        "/curl example.com",
        "/ping localhost",
        "/gpu",
        "/ps",
        "/net",
        "/disk",
        "/calc 1+1",
        "/exec bash echo hi",
        "/analyze a.txt",
        "/summary some text",
        "/code rust hello world",
        "/translate German hello",
    ] {
        match commands::parse(line) {
            Command::Invoke(inv) => {
                let spec = registry
                    .lookup(&inv.tool_id)
                    .unwrap_or_else(|| panic!("{line}: unknown tool {}", inv.tool_id));
                assert!(spec.validate(&inv.arguments).is_ok(), "{line}: invalid arguments");
            }
            other => panic!("{line}: expected a tool invocation, got {other:?}"),
        }
    }
}

// Integration tests that require external services

/// Test a full turn against a running vLLM server
#[tokio::test]
#[ignore = "Requires a running OpenAI-compatible inference server"]
async fn test_live_server_turn() {
    let config = AgentConfig::load(None).unwrap();
    let backend: Arc<dyn CompletionBackend> =
        Arc::new(ChatClient::new(config.client_config()).unwrap());
    let registry = Arc::new(builtin_registry().unwrap());
    let dir = tempfile::tempdir().unwrap();
    let context = ToolContext::new(ResourcePolicy::restricted(dir.path()), Some(backend.clone()));

    let mut agent = Orchestrator::new(
        IntentClassifier::new(registry.clone(), Some(backend.clone()), true),
        ToolExecutor::new(registry, context),
        backend,
        Session::new("live", 260_000),
        None,
        OrchestratorConfig::default(),
    );

    let outcome = agent.handle_utterance("What is 2^10 + 5 * 3?").await.unwrap();
    assert!(outcome.response.contains("1039"));
}
