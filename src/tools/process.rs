//! Subprocess runner for tools that shell out
//!
//! Every child becomes the leader of a fresh process group. The group is
//! killed once the child exits, and also when the future driving it is
//! dropped (the executor aborted the task on timeout), so interpreters
//! cannot leave background jobs or grandchildren behind. Each output
//! stream is held in memory up to a byte limit; the rest is drained and
//! discarded so the child never blocks on a full pipe.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use super::ToolError;

/// Captured result of a finished subprocess
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// A stream produced more than the byte limit
    pub truncated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout if non-empty, else stderr
    pub fn text(&self) -> &str {
        if self.stdout.trim().is_empty() {
            self.stderr.trim_end()
        } else {
            self.stdout.trim_end()
        }
    }
}

/// Kills a process group on drop
struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            debug!(pgid, "killing process group");
            // SAFETY: killpg has no memory-safety preconditions; a stale id yields ESRCH
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

/// Keep at most `limit + 1` bytes of `reader`, discard the rest
async fn read_bounded<R>(reader: Option<R>, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut kept = Vec::new();
    (&mut reader)
        .take(limit as u64 + 1)
        .read_to_end(&mut kept)
        .await?;
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(kept)
}

/// Run `program args...` in `cwd` and wait for it
///
/// No timeout is applied here: the executor bounds the whole tool call and
/// cancellation of this future tears the process group down. At most
/// `limit + 1` bytes of each stream are kept, so a caller capping at
/// `limit` can still tell that output was cut.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: &Path,
    limit: usize,
) -> Result<CommandOutput, ToolError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| ToolError::Fault(format!("failed to start {program}: {e}")))?;

    let guard = ProcessGroupGuard {
        pgid: child.id().map(|pid| pid as i32),
    };
    debug!(program, pid = ?child.id(), "spawned tool process");

    let stdout = read_bounded(child.stdout.take(), limit);
    let stderr = read_bounded(child.stderr.take(), limit);
    let status = async move {
        let status = child.wait().await;
        // Background jobs still holding the pipes go with the leader
        drop(guard);
        status
    };
    let (status, stdout, stderr) = tokio::join!(status, stdout, stderr);

    let failed = |e: std::io::Error| ToolError::Fault(format!("{program} failed: {e}"));
    let status = status.map_err(failed)?;
    let stdout = stdout.map_err(failed)?;
    let stderr = stderr.map_err(failed)?;

    Ok(CommandOutput {
        truncated: stdout.len() > limit || stderr.len() > limit,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: status.code().unwrap_or(-1),
    })
}

/// Whether `program` can be found on `PATH`
pub fn is_available(program: &str) -> bool {
    which::which(program).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const LIMIT: usize = 64 * 1024;

    #[tokio::test]
    async fn test_run_command_captures_output() {
        let output = run_command(
            "sh",
            &["-c", "echo out; echo err >&2; exit 3"],
            Path::new("."),
            LIMIT,
        )
        .await
        .unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
        assert!(!output.truncated);
        assert_eq!(output.text(), "out");
    }

    #[tokio::test]
    async fn test_missing_program_is_a_fault() {
        let err = run_command("definitely-not-a-real-binary", &[], Path::new("."), LIMIT)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Fault(_)));
    }

    #[tokio::test]
    async fn test_output_beyond_limit_is_not_buffered() {
        let output = run_command("sh", &["-c", "yes | head -c 1000000"], Path::new("."), 100)
            .await
            .unwrap();
        assert_eq!(output.stdout.len(), 101);
        assert!(output.truncated);
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_background_jobs_die_with_the_command() {
        let temp = TempDir::new().unwrap();
        let marker = temp.path().join("marker");
        let script = format!("(sleep 1; touch '{}') & echo started", marker.display());

        let start = Instant::now();
        let output = run_command("sh", &["-c", &script], temp.path(), LIMIT)
            .await
            .unwrap();
        assert_eq!(output.stdout, "started\n");
        assert!(start.elapsed() < Duration::from_millis(900));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background job outlived the command");
    }

    #[test]
    fn test_is_available() {
        assert!(is_available("sh"));
        assert!(!is_available("definitely-not-a-real-binary"));
    }
}
