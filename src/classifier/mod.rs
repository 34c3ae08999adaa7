//! Intent Classifier
//!
//! Maps one utterance (plus a window of recent conversation) to a
//! [`Decision`]: answer directly, or invoke exactly one tool with a
//! schema-valid argument set.
//!
//! ```text
//! utterance → lexical rules ─┬─ unique, args valid ────────────→ Invoke (lexical)
//!                            └─ none / tie / args invalid → model picks tool
//!                                                            ├─ valid call → Invoke (semantic)
//!                                                            └─ otherwise  → NoTool
//! ```

pub mod lexical;
pub mod semantic;

use std::sync::Arc;

use tracing::{debug, info};

use crate::llm::{ChatError, ChatMessage, CompletionBackend};
use crate::metrics::CLASSIFIER_DECISIONS;
use crate::tools::{ToolInvocation, ToolRegistry};

use lexical::{LexicalRule, LexicalVerdict, RULES};

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    NoTool,
    Invoke(ToolInvocation),
}

/// Which stage produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lexical,
    Semantic,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Lexical => "lexical",
            Stage::Semantic => "semantic",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub decision: Decision,
    pub stage: Stage,
}

impl Classification {
    fn record(decision: Decision, stage: Stage) -> Self {
        let label = match &decision {
            Decision::NoTool => "none",
            Decision::Invoke(invocation) => invocation.tool_id.as_str(),
        };
        CLASSIFIER_DECISIONS
            .with_label_values(&[stage.as_str(), label])
            .inc();
        info!(stage = stage.as_str(), decision = label, "Classified utterance");
        Self { decision, stage }
    }
}

pub struct IntentClassifier {
    registry: Arc<ToolRegistry>,
    backend: Option<Arc<dyn CompletionBackend>>,
    semantic_fallback: bool,
}

impl IntentClassifier {
    pub fn new(
        registry: Arc<ToolRegistry>,
        backend: Option<Arc<dyn CompletionBackend>>,
        semantic_fallback: bool,
    ) -> Self {
        Self {
            registry,
            backend,
            semantic_fallback,
        }
    }

    /// Rules whose tool is actually registered
    fn active_rules(&self) -> impl Iterator<Item = &'static LexicalRule> + '_ {
        RULES
            .iter()
            .filter(|rule| self.registry.lookup(rule.tool).is_some())
    }

    /// Lexical stage alone: a validated invocation when exactly one tool wins
    pub fn classify_lexical(&self, utterance: &str) -> Option<ToolInvocation> {
        let matches = lexical::find_matches(self.active_rules(), utterance);
        match lexical::resolve(matches) {
            LexicalVerdict::Unique(m) => {
                let spec = self.registry.lookup(&m.tool_id)?;
                match spec.validate(&m.arguments) {
                    Ok(arguments) => Some(ToolInvocation::new(m.tool_id, arguments)),
                    Err(e) => {
                        debug!(tool = %m.tool_id, error = %e, "lexical arguments incomplete");
                        None
                    }
                }
            }
            LexicalVerdict::Ambiguous(tied) => {
                let tools: Vec<&str> = tied.iter().map(|m| m.tool_id.as_str()).collect();
                debug!(?tools, "lexical stage ambiguous");
                None
            }
            LexicalVerdict::NoMatch => None,
        }
    }

    /// Decide for one utterance
    ///
    /// Fails only with an unavailable backend during the semantic stage.
    pub async fn classify(
        &self,
        utterance: &str,
        context: &[ChatMessage],
    ) -> Result<Classification, ChatError> {
        if let Some(invocation) = self.classify_lexical(utterance) {
            return Ok(Classification::record(
                Decision::Invoke(invocation),
                Stage::Lexical,
            ));
        }

        let backend = match (&self.backend, self.semantic_fallback) {
            (Some(backend), true) => backend,
            _ => return Ok(Classification::record(Decision::NoTool, Stage::Lexical)),
        };

        let decision =
            match semantic::select_tool(backend.as_ref(), &self.registry, utterance, context)
                .await?
            {
                Some(invocation) => Decision::Invoke(invocation),
                None => Decision::NoTool,
            };
        Ok(Classification::record(decision, Stage::Semantic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, Tool, ToolCall};
    use crate::tools::builtin_registry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies with a fixed completion and counts calls
    struct Scripted {
        reply: Result<Completion, ChatError>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl CompletionBackend for Scripted {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            tools: &[Tool],
        ) -> Result<Completion, ChatError> {
            assert!(!tools.is_empty());
            *self.calls.lock().unwrap() += 1;
            self.reply.clone()
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn scripted_classifier(
        reply: Result<Completion, ChatError>,
    ) -> (Arc<Scripted>, IntentClassifier) {
        let backend = Arc::new(Scripted {
            reply,
            calls: Mutex::new(0),
        });
        let shared: Arc<dyn CompletionBackend> = backend.clone();
        let registry = Arc::new(builtin_registry().unwrap());
        (backend, IntentClassifier::new(registry, Some(shared), true))
    }

    fn tool_call(name: &str, args: serde_json::Value) -> Completion {
        Completion {
            content: None,
            tool_calls: vec![ToolCall::new("call_0", name, args)],
        }
    }

    #[tokio::test]
    async fn test_lexical_match_skips_the_model() {
        let (backend, classifier) = scripted_classifier(Ok(Completion::text("NO_TOOL")));
        let result = classifier.classify("What is 2^10 + 5 * 3?", &[]).await.unwrap();

        assert_eq!(result.stage, Stage::Lexical);
        match result.decision {
            Decision::Invoke(inv) => {
                assert_eq!(inv.tool_id, "calculator");
                assert_eq!(inv.arguments["expression"], "2^10 + 5 * 3");
            }
            other => panic!("expected invoke, got {other:?}"),
        }
        assert_eq!(*backend.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_match_asks_the_model() {
        let (backend, classifier) = scripted_classifier(Ok(Completion::text("NO_TOOL")));
        let result = classifier.classify("hello", &[]).await.unwrap();
        assert_eq!(result.decision, Decision::NoTool);
        assert_eq!(result.stage, Stage::Semantic);
        assert_eq!(*backend.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_semantic_tool_call_is_validated() {
        let (_b, classifier) = scripted_classifier(Ok(tool_call(
            "translate",
            json!("{\"language\": \"French\", \"text\": \"thank you\"}"),
        )));
        let result = classifier.classify("how do the french say thank you", &[]).await.unwrap();
        match result.decision {
            Decision::Invoke(inv) => {
                assert_eq!(inv.tool_id, "translate");
                assert_eq!(inv.arguments["language"], "French");
            }
            other => panic!("expected invoke, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_semantic_arguments_mean_no_tool() {
        // missing the required "text"
        let (_b, classifier) =
            scripted_classifier(Ok(tool_call("translate", json!({"language": "French"}))));
        let result = classifier.classify("say it in french", &[]).await.unwrap();
        assert_eq!(result.decision, Decision::NoTool);

        let (_b, classifier) = scripted_classifier(Ok(tool_call("launch_rockets", json!({}))));
        let result = classifier.classify("launch", &[]).await.unwrap();
        assert_eq!(result.decision, Decision::NoTool);
    }

    #[tokio::test]
    async fn test_tool_call_in_text_is_accepted() {
        let (_b, classifier) = scripted_classifier(Ok(Completion::text(
            "<think>needs search</think>{\"name\": \"web_search\", \"arguments\": {\"query\": \"weather\"}}",
        )));
        let result = classifier.classify("weather tomorrow?", &[]).await.unwrap();
        assert!(matches!(result.decision, Decision::Invoke(ref inv) if inv.tool_id == "web_search"));
    }

    #[tokio::test]
    async fn test_unavailable_backend_propagates() {
        let (_b, classifier) =
            scripted_classifier(Err(ChatError::Unavailable("refused".into())));
        let err = classifier.classify("hello", &[]).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_other_backend_errors_mean_no_tool() {
        let (_b, classifier) = scripted_classifier(Err(ChatError::Api {
            status: 400,
            message: "tools unsupported".into(),
        }));
        let result = classifier.classify("hello", &[]).await.unwrap();
        assert_eq!(result.decision, Decision::NoTool);
    }

    #[tokio::test]
    async fn test_without_fallback_no_match_is_no_tool() {
        let registry = Arc::new(builtin_registry().unwrap());
        let classifier = IntentClassifier::new(registry, None, true);
        let result = classifier.classify("hello", &[]).await.unwrap();
        assert_eq!(result.decision, Decision::NoTool);
        assert_eq!(result.stage, Stage::Lexical);
    }

    #[test]
    fn test_unregistered_tools_are_ignored() {
        let registry = Arc::new(ToolRegistry::new());
        let classifier = IntentClassifier::new(registry, None, false);
        assert!(classifier.classify_lexical("What is 2 + 2?").is_none());
    }

    #[test]
    fn test_lexical_decisions_always_validate() {
        let registry = Arc::new(builtin_registry().unwrap());
        let classifier = IntentClassifier::new(registry.clone(), None, false);
        for utterance in [
            "What is 2^10 + 5 * 3?",
            "Search for recent developments in AI",
            "run this bash code: ls",
            "list the files in src",
            "how much disk space is left",
            "translate hello to German",
        ] {
            let inv = classifier.classify_lexical(utterance).unwrap();
            let spec = registry.lookup(&inv.tool_id).unwrap();
            assert_eq!(spec.validate(&inv.arguments).as_ref(), Ok(&inv.arguments));
        }
    }
}
