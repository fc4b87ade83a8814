use std::io::ErrorKind;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, warn};

use super::response_validation::{validate_response, ResponseShape};
use crate::backend::common::constants::{
    FLOWCTL_JSON_FLAG, OUTPUT_DRAIN_GRACE, OUTPUT_READ_CHUNK_BYTES,
};
use crate::backend::common::errors::{BridgeError, CommandResult};
use crate::backend::common::settings::BridgeSettings;
use crate::backend::flow_binary_resolution::{BinaryResolution, BinaryResolver};

/// One flowctl invocation. Arguments always travel as a discrete vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowCommand {
    pub args: Vec<String>,
    pub category: String,
    pub timeout: Option<Duration>,
    pub stdin: Option<String>,
}

impl FlowCommand {
    pub fn new<I, S>(category: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            category: category.into(),
            timeout: None,
            stdin: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sends `payload` on the child's stdin instead of the argument vector.
    pub fn with_stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub snippet_limit_bytes: usize,
}

impl From<&BridgeSettings> for ExecutorLimits {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            timeout: settings.command_timeout(),
            output_limit_bytes: settings.output_limit_bytes,
            snippet_limit_bytes: settings.snippet_limit_bytes,
        }
    }
}

impl Default for ExecutorLimits {
    fn default() -> Self {
        Self::from(&BridgeSettings::default())
    }
}

#[derive(Debug, Default)]
struct CapturedOutput {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Spawns flowctl and folds every outcome into a [`CommandResult`].
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    resolver: Arc<BinaryResolver>,
    limits: ExecutorLimits,
}

impl CommandExecutor {
    pub fn new(resolver: Arc<BinaryResolver>, limits: ExecutorLimits) -> Self {
        Self { resolver, limits }
    }

    pub fn resolver(&self) -> &Arc<BinaryResolver> {
        &self.resolver
    }

    pub fn limits(&self) -> ExecutorLimits {
        self.limits
    }

    pub async fn execute(
        &self,
        workspace_root: &Path,
        command: &FlowCommand,
        shape: &ResponseShape,
    ) -> CommandResult {
        if !workspace_root.is_dir() {
            return Err(BridgeError::NonZeroExit {
                exit_code: None,
                stderr: format!(
                    "workspace root \"{}\" is not an accessible directory.",
                    workspace_root.display()
                ),
            });
        }

        let binary = self.resolver.resolve(workspace_root);
        let timeout = command.timeout.unwrap_or(self.limits.timeout);

        let mut process = Command::new(&binary.path);
        process
            .args(&command.args)
            .arg(FLOWCTL_JSON_FLAG)
            .current_dir(workspace_root)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = match process.spawn() {
            Ok(child) => child,
            Err(error) => return Err(self.spawn_failure(workspace_root, &binary, error)),
        };
        debug!(
            category = %command.category,
            args = ?command.args,
            pid = ?child.id(),
            "spawned flowctl"
        );

        let stdin = child.stdin.take();
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let limit = self.limits.output_limit_bytes;
        let mut stdout = CapturedOutput::default();
        let mut stderr = CapturedOutput::default();

        let settled = tokio::time::timeout(timeout, async {
            let streams = async {
                tokio::join!(
                    write_stdin(stdin, command.stdin.as_deref()),
                    read_capped(stdout_pipe.as_mut(), limit, &mut stdout),
                    read_capped(stderr_pipe.as_mut(), limit, &mut stderr),
                );
            };
            tokio::pin!(streams);

            let mut drained = false;
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    () = &mut streams, if !drained => drained = true,
                }
            };

            // A background child of flowctl can keep the pipes open after it exits.
            if !drained && tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut streams).await.is_err() {
                debug!(
                    category = %command.category,
                    "flowctl exited while its output was still open; using what was read"
                );
            }
            status
        })
        .await;

        let Ok(status) = settled else {
            if let Err(error) = child.start_kill() {
                debug!(%error, "flowctl exited before it could be killed");
            }
            if let Err(error) = child.wait().await {
                warn!(%error, "failed to reap timed-out flowctl process");
            }
            warn!(
                category = %command.category,
                timeout_ms = timeout.as_millis() as u64,
                "flowctl timed out and was terminated"
            );
            return Err(BridgeError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        };

        let status = match status {
            Ok(status) => status,
            Err(error) => {
                return Err(BridgeError::NonZeroExit {
                    exit_code: None,
                    stderr: format!("Failed while waiting for flowctl: {error}"),
                });
            }
        };

        debug!(
            category = %command.category,
            elapsed_ms = started.elapsed().as_millis() as u64,
            exit_code = ?status.code(),
            stdout_bytes = stdout.bytes.len(),
            "flowctl settled"
        );

        if !status.success() {
            return Err(BridgeError::NonZeroExit {
                exit_code: status.code(),
                stderr: failure_message(&stderr.bytes, command, status),
            });
        }

        if stdout.truncated {
            warn!(
                category = %command.category,
                limit_bytes = limit,
                "flowctl stdout exceeded the capture limit and was truncated"
            );
        }

        validate_response(&stdout.bytes, shape, self.limits.snippet_limit_bytes)
    }

    fn spawn_failure(
        &self,
        workspace_root: &Path,
        binary: &BinaryResolution,
        error: std::io::Error,
    ) -> BridgeError {
        match error.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                // The next call re-resolves instead of repeating a stale path.
                self.resolver.invalidate(workspace_root);
                warn!(
                    binary = %binary.path.display(),
                    source = ?binary.source,
                    %error,
                    "flowctl binary could not be started"
                );
                BridgeError::BinaryNotFound {
                    binary: binary.path.display().to_string(),
                    message: error.to_string(),
                }
            }
            _ => BridgeError::NonZeroExit {
                exit_code: None,
                stderr: format!("Failed to execute {}: {error}", binary.path.display()),
            },
        }
    }
}

fn failure_message(stderr: &[u8], command: &FlowCommand, status: ExitStatus) -> String {
    let text = String::from_utf8_lossy(stderr).trim().to_string();
    if !text.is_empty() {
        return text;
    }
    let subcommand = command.args.first().map(String::as_str).unwrap_or("<none>");
    format!("flowctl {subcommand} terminated with {status}")
}

async fn write_stdin(stdin: Option<ChildStdin>, payload: Option<&str>) {
    let Some(mut stdin) = stdin else {
        return;
    };
    if let Some(payload) = payload {
        if let Err(error) = stdin.write_all(payload.as_bytes()).await {
            debug!(%error, "flowctl closed stdin before the payload was written");
        }
        if let Err(error) = stdin.shutdown().await {
            debug!(%error, "failed to flush flowctl stdin");
        }
    }
    // Dropping the handle closes the stream so the child sees EOF.
    drop(stdin);
}

/// Appends to `captured` as it reads, so a cancelled read keeps what arrived.
async fn read_capped<R>(reader: Option<&mut R>, limit: usize, captured: &mut CapturedOutput)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };

    let mut chunk = vec![0u8; OUTPUT_READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => {
                // Keep draining past the cap so the child never blocks on a full pipe.
                let remaining = limit.saturating_sub(captured.bytes.len());
                if read > remaining {
                    captured.truncated = true;
                }
                captured
                    .bytes
                    .extend_from_slice(&chunk[..read.min(remaining)]);
            }
            Err(error) => {
                debug!(%error, "stopped reading flowctl output");
                break;
            }
        }
    }
}
