//! Model-backed tools
//!
//! These send a single focused prompt to the same inference backend the
//! conversation uses. A backend failure here becomes a tool failure.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use super::registry::{ArgSpec, Constraint, ToolSpec};
use super::{str_arg, Arguments, ToolContext, ToolError, ToolHandler};

const ANALYZE_MAX_CHARS: usize = 5000;

const TRANSLATE_SYSTEM: &str =
    "You are a translator. Reply with the translation only, without commentary.";
const SUMMARIZE_SYSTEM: &str =
    "You summarize text. Reply with a concise summary that keeps the key facts.";
const ANALYZE_SYSTEM: &str = "You review files. Describe what the file does, point out problems \
     and suggest concrete improvements.";
const GENERATE_SYSTEM: &str = "You write code. Reply with a single well-commented code block \
     followed by a short explanation.";

struct Translate;

#[async_trait]
impl ToolHandler for Translate {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError> {
        let language = str_arg(args, "language")?.trim();
        let text = str_arg(args, "text")?;
        ctx.ask_model(
            TRANSLATE_SYSTEM,
            format!("Translate this text to {language}:\n\n{text}"),
        )
        .await
    }
}

pub fn translate() -> ToolSpec {
    ToolSpec::new(
        "translate",
        "Translate text into another language. Use when the user asks to translate something.",
        vec![
            ArgSpec::string("language", "Target language, e.g. 'Spanish'").required(),
            ArgSpec::string("text", "Text to translate")
                .required()
                .constraint(Constraint::MaxLength(20_000)),
        ],
        Arc::new(Translate),
    )
}

struct Summarize;

#[async_trait]
impl ToolHandler for Summarize {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError> {
        let text = str_arg(args, "text")?;
        ctx.ask_model(SUMMARIZE_SYSTEM, format!("Summarize this text:\n\n{text}"))
            .await
    }
}

pub fn summarize() -> ToolSpec {
    ToolSpec::new(
        "summarize",
        "Summarize a piece of text. Use when the user asks for a summary or TL;DR of given text.",
        vec![ArgSpec::string("text", "Text to summarize")
            .required()
            .constraint(Constraint::MaxLength(50_000))],
        Arc::new(Summarize),
    )
}

struct AnalyzeFile;

#[async_trait]
impl ToolHandler for AnalyzeFile {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = ctx.policy.resolve_path(str_arg(args, "path")?)?;
        let cannot_read = |e: std::io::Error| {
            ToolError::Fault(format!("cannot read {}: {e}", path.display()))
        };
        let file = tokio::fs::File::open(&path).await.map_err(cannot_read)?;
        let mut bytes = Vec::new();
        file.take(ANALYZE_MAX_CHARS as u64 * 4 + 1)
            .read_to_end(&mut bytes)
            .await
            .map_err(cannot_read)?;
        let content = String::from_utf8_lossy(&bytes);

        let mut excerpt: String = content.chars().take(ANALYZE_MAX_CHARS).collect();
        if content.chars().count() > ANALYZE_MAX_CHARS {
            excerpt.push_str("\n... (truncated for analysis)");
        }
        ctx.ask_model(
            ANALYZE_SYSTEM,
            format!("Please analyze this file: {}\n\nContent:\n{excerpt}", path.display()),
        )
        .await
    }
}

pub fn analyze_file() -> ToolSpec {
    ToolSpec::new(
        "analyze_file",
        "Read a file and produce an analysis or review of it. Use when the user asks to \
         analyze, review or explain a file.",
        vec![ArgSpec::string("path", "Path of the file to analyze").required()],
        Arc::new(AnalyzeFile),
    )
}

struct GenerateCode;

#[async_trait]
impl ToolHandler for GenerateCode {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError> {
        let language = str_arg(args, "language")?.trim();
        let task = str_arg(args, "task")?;
        ctx.ask_model(
            GENERATE_SYSTEM,
            format!("Please generate {language} code for: {task}"),
        )
        .await
    }
}

pub fn generate_code() -> ToolSpec {
    ToolSpec::new(
        "generate_code",
        "Write new code in a given language for a described task. Use when the user asks \
         to write, generate or create a program, script or function.",
        vec![
            ArgSpec::string("language", "Programming language").required(),
            ArgSpec::string("task", "What the code should do").required(),
        ],
        Arc::new(GenerateCode),
    )
}
