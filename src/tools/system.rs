//! Host inspection tools backed by standard system commands

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::process::{is_available, run_command, CommandOutput};
use super::registry::{ArgSpec, ToolSpec};
use super::{str_arg, Arguments, ToolContext, ToolError, ToolHandler};

const TOP_PROCESSES: usize = 10;

async fn run_checked(
    program: &str,
    args: &[&str],
    ctx: &ToolContext,
) -> Result<CommandOutput, ToolError> {
    if !is_available(program) {
        return Err(ToolError::Fault(format!("{program} not found")));
    }
    let policy = &ctx.policy;
    let output = run_command(program, args, &policy.working_dir, policy.output_cap).await?;
    if !output.success() {
        return Err(ToolError::Fault(format!(
            "{program} exited with {}: {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }
    Ok(output)
}

fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && !host.starts_with('-')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
}

struct Ping;

#[async_trait]
impl ToolHandler for Ping {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError> {
        let host = str_arg(args, "host")?.trim();
        if !is_valid_host(host) {
            return Err(ToolError::InvalidArguments(format!("'{host}' is not a host name")));
        }
        ctx.policy.check_host(host)?;
        if !is_available("ping") {
            return Err(ToolError::Fault("ping not found".to_string()));
        }

        // ping exits non-zero when the host is unreachable; that is still an answer
        let output = run_command(
            "ping",
            &["-c", "4", host],
            &ctx.policy.working_dir,
            ctx.policy.output_cap,
        )
        .await?;
        Ok(format!("Ping results for {host}:\n{}", output.text()))
    }
}

pub fn ping() -> ToolSpec {
    ToolSpec::new(
        "ping",
        "Check whether a host is reachable by sending 4 ICMP echo requests. Use when the \
         user asks to ping a host or check connectivity.",
        vec![ArgSpec::string("host", "Host name or IP address").required()],
        Arc::new(Ping),
    )
    .with_timeout(Duration::from_secs(20))
}

/// Sort `ps aux` rows by the %CPU column, highest first
fn top_by_cpu(ps_output: &str, limit: usize) -> Vec<&str> {
    let cpu = |line: &str| {
        line.split_whitespace()
            .nth(2)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    let mut rows: Vec<&str> = ps_output.lines().skip(1).collect();
    rows.sort_by(|a, b| cpu(b).total_cmp(&cpu(a)));
    rows.truncate(limit);
    rows
}

struct SystemInfo;

#[async_trait]
impl ToolHandler for SystemInfo {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError> {
        match str_arg(args, "kind")? {
            "disk" => {
                let output = run_checked("df", &["-h", "/"], ctx).await?;
                Ok(format!("Disk usage:\n{}", output.stdout.trim_end()))
            }
            "gpu" => {
                let output = run_checked("nvidia-smi", &[], ctx).await?;
                Ok(format!("GPU information:\n{}", output.stdout.trim_end()))
            }
            "processes" => {
                let output = run_checked("ps", &["aux"], ctx).await?;
                let header = output.stdout.lines().next().unwrap_or_default();
                let rows = top_by_cpu(&output.stdout, TOP_PROCESSES);
                Ok(format!(
                    "Top {} processes by CPU:\n{header}\n{}",
                    rows.len(),
                    rows.join("\n")
                ))
            }
            "network" => {
                let output = run_checked("ss", &["-tlnp"], ctx).await?;
                let listening: Vec<&str> = output
                    .stdout
                    .lines()
                    .filter(|l| l.contains("LISTEN"))
                    .collect();
                Ok(format!("Listening sockets:\n{}", listening.join("\n")))
            }
            other => Err(ToolError::InvalidArguments(format!("unknown kind '{other}'"))),
        }
    }
}

pub fn system_info() -> ToolSpec {
    ToolSpec::new(
        "system_info",
        "Inspect the local machine: disk usage, GPU status, top processes by CPU or \
         listening network sockets.",
        vec![ArgSpec::string("kind", "What to inspect")
            .required()
            .one_of(&["disk", "gpu", "processes", "network"])],
        Arc::new(SystemInfo),
    )
    .with_timeout(Duration::from_secs(15))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::policy::{PolicyViolation, ResourcePolicy};
    use serde_json::json;

    fn args(value: serde_json::Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_top_by_cpu() {
        let ps = "USER PID %CPU %MEM\nroot 1 0.5 0.1\nroot 2 12.0 0.1\nroot 3 3.1 0.1\n";
        let rows = top_by_cpu(ps, 2);
        assert_eq!(rows, vec!["root 2 12.0 0.1", "root 3 3.1 0.1"]);
    }

    #[test]
    fn test_host_validation() {
        assert!(is_valid_host("example.com"));
        assert!(is_valid_host("10.0.0.1"));
        assert!(is_valid_host("::1"));
        assert!(!is_valid_host("-f"));
        assert!(!is_valid_host("a; rm -rf /"));
    }

    #[tokio::test]
    async fn test_ping_denied_without_network() {
        let ctx = ToolContext::new(ResourcePolicy::restricted("."), None);
        let err = Ping.call(&args(json!({"host": "example.com"})), &ctx).await.unwrap_err();
        assert_eq!(err, ToolError::Denied(PolicyViolation::NetworkDisabled));
    }

    #[tokio::test]
    async fn test_disk_usage() {
        let ctx = ToolContext::new(ResourcePolicy::restricted("."), None);
        let out = SystemInfo.call(&args(json!({"kind": "disk"})), &ctx).await.unwrap();
        assert!(out.starts_with("Disk usage:\nFilesystem"));
    }
}
