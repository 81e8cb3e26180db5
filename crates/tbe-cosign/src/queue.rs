//! Single-slot execution queue for the cosign tool.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::CosignError;
use crate::Result;

/// Program name looked up on `PATH` when none is configured.
pub const DEFAULT_PROGRAM: &str = "cosign";

/// How to start the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosignTool {
    /// Binary name or path
    pub program: PathBuf,
    /// `HOME` for the child process; inherited when unset
    pub home: Option<PathBuf>,
}

impl Default for CosignTool {
    fn default() -> Self {
        CosignTool {
            program: PathBuf::from(DEFAULT_PROGRAM),
            home: None,
        }
    }
}

impl CosignTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CosignTool {
            program: program.into(),
            home: None,
        }
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

/// Captured result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Exit status; `-1` when the process was terminated by a signal
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

struct Job {
    args: Vec<String>,
    reply: oneshot::Sender<Result<ToolOutput>>,
}

/// Handle to the single worker that runs cosign.
///
/// Clones share the same worker. Requests are executed in submission order,
/// one at a time; the worker exits once every handle is dropped.
#[derive(Clone)]
pub struct CosignQueue {
    tx: mpsc::UnboundedSender<Job>,
    tool: CosignTool,
}

impl std::fmt::Debug for CosignQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CosignQueue")
            .field("tool", &self.tool)
            .finish_non_exhaustive()
    }
}

impl CosignQueue {
    /// Start the worker task. Must be called inside a Tokio runtime.
    pub fn spawn(tool: CosignTool) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker_tool = tool.clone();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = invoke(&worker_tool, &job.args).await;
                // The caller may have stopped waiting; the invocation still ran.
                let _ = job.reply.send(result);
            }
            debug!("cosign queue drained, worker exiting");
        });

        CosignQueue { tx, tool }
    }

    pub fn tool(&self) -> &CosignTool {
        &self.tool
    }

    /// Enqueue one invocation and wait for its output.
    pub async fn run(&self, args: Vec<String>) -> Result<ToolOutput> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { args, reply })
            .map_err(|_| CosignError::QueueClosed)?;
        rx.await.map_err(|_| CosignError::QueueClosed)?
    }
}

async fn invoke(tool: &CosignTool, args: &[String]) -> Result<ToolOutput> {
    let start = Instant::now();
    debug!(program = %tool.program.display(), args = ?args, "Invoking cosign");

    let mut command = Command::new(&tool.program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(home) = &tool.home {
        command.env("HOME", home);
    }

    let output = command.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CosignError::NotFound(tool.program_name())
        } else {
            CosignError::Spawn {
                program: tool.program_name(),
                source: e,
            }
        }
    })?;

    let status = output.status.code().unwrap_or(-1);
    let result = ToolOutput {
        status,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    if !result.success() {
        warn!(status, subcommand = args.first().map(String::as_str), "cosign exited non-zero");
    }
    Ok(result)
}

/// Check if the tool can be started (`<program> version` exits 0).
pub async fn is_cosign_available(program: &Path) -> bool {
    Command::new(program)
        .arg("version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_output_success() {
        let output = ToolOutput {
            status: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 1,
        };
        assert!(output.success());
        assert!(!ToolOutput { status: -1, ..output }.success());
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_found_error() {
        let queue = CosignQueue::spawn(CosignTool::new("/nonexistent/tbe-cosign-binary"));
        let err = queue.run(vec!["version".to_string()]).await.unwrap_err();
        assert!(matches!(err, CosignError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_an_error() {
        let queue = CosignQueue::spawn(CosignTool::new("false"));
        let output = queue.run(Vec::new()).await.expect("spawn false");
        assert_eq!(output.status, 1);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_is_cosign_available_false_for_missing_binary() {
        assert!(!is_cosign_available(Path::new("/nonexistent/tbe-cosign-binary")).await);
    }
}
