//! Code execution tool: runs a snippet under a local interpreter

use std::sync::Arc;

use async_trait::async_trait;

use super::process::{is_available, run_command};
use super::registry::{ArgSpec, Constraint, ToolSpec};
use super::{str_arg, Arguments, ToolContext, ToolError, ToolHandler};

/// Interpreter command line for a language name
fn interpreter(language: &str) -> Option<(&'static str, &'static str)> {
    match language {
        "python" | "python3" => Some(("python3", "-c")),
        "bash" => Some(if is_available("bash") { ("bash", "-c") } else { ("sh", "-c") }),
        "sh" => Some(("sh", "-c")),
        "javascript" | "js" | "node" => Some(("node", "-e")),
        _ => None,
    }
}

struct RunCode;

#[async_trait]
impl ToolHandler for RunCode {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError> {
        let language = str_arg(args, "language")?;
        let code = str_arg(args, "code")?;

        let (program, flag) = interpreter(language).ok_or_else(|| {
            ToolError::InvalidArguments(format!("unsupported language '{language}'"))
        })?;
        if !is_available(program) {
            return Err(ToolError::Fault(format!("{program} is not installed")));
        }

        let output = run_command(
            program,
            &[flag, code],
            &ctx.policy.working_dir,
            ctx.policy.output_cap,
        )
        .await?;

        // A non-zero exit is still a completed run; the caller sees the code
        Ok(format!(
            "Exit code: {}\nStdout:\n{}\nStderr:\n{}",
            output.exit_code,
            output.stdout.trim_end(),
            output.stderr.trim_end()
        ))
    }
}

pub fn run_code() -> ToolSpec {
    ToolSpec::new(
        "run_code",
        "Execute a code snippet and return its exit code, stdout and stderr. Supported \
         languages: python, bash, javascript. Use when the user asks to run or execute code.",
        vec![
            ArgSpec::string("language", "Programming language")
                .required()
                .one_of(&["python", "python3", "bash", "sh", "javascript", "js", "node"]),
            ArgSpec::string("code", "The code to execute")
                .required()
                .sensitive()
                .constraint(Constraint::MaxLength(100_000)),
        ],
        Arc::new(RunCode),
    )
}
