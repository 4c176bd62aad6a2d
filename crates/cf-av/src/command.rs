//! Builder for launching external tools, either to completion or as a
//! long-running process whose diagnostic output is streamed line by line.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Default timeout for [`ToolCommand::execute`]: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and launching external tool invocations.
///
/// # Example
///
/// ```no_run
/// use cf_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> cf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .args(["-v", "error", "-show_format"])
///     .arg("/path/to/video.mkv")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    capture_stdout: bool,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            capture_stdout: false,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time for [`execute`](Self::execute).
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Pipe stdout on [`spawn`](Self::spawn) instead of discarding it.
    pub fn capture_stdout(&mut self, capture: bool) -> &mut Self {
        self.capture_stdout = capture;
        self
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// The full command line, shell-quoted where needed, for diagnostics.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().to_string())
            .chain(self.args.iter().cloned())
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{}'", part.replace('\'', r"'\''"))
                } else {
                    part
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn spawn_error(&self, e: std::io::Error) -> cf_core::Error {
        if e.kind() == std::io::ErrorKind::NotFound {
            cf_core::Error::ToolNotFound {
                tool: self.tool_name(),
            }
        } else {
            cf_core::Error::tool(self.tool_name(), format!("failed to spawn: {e}"))
        }
    }

    /// Execute the command to completion, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`cf_core::Error::ToolNotFound`] if the program does not exist.
    /// - [`cf_core::Error::Timeout`] if the process outlives the timeout.
    /// - [`cf_core::Error::ProcessExit`] on a non-zero exit (carries stderr).
    pub async fn execute(&self) -> cf_core::Result<ToolOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| self.spawn_error(e))?;

        // On timeout the future is dropped and kill_on_drop reaps the child.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(cf_core::Error::ProcessExit {
                        code: output.status.code(),
                        stderr: tool_output.stderr.trim().to_string(),
                    });
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(cf_core::Error::tool(
                self.tool_name(),
                format!("I/O error waiting for process: {e}"),
            )),
            Err(_elapsed) => Err(cf_core::Error::Timeout {
                after: self.timeout,
            }),
        }
    }

    /// Launch the command and hand back the running process.
    ///
    /// Stderr is always piped so that diagnostics can be streamed; stdout is
    /// piped only when [`capture_stdout`](Self::capture_stdout) was set.
    pub fn spawn(&self) -> cf_core::Result<ToolProcess> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(if self.capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        let stderr = child.stderr.take().map(DiagnosticLines::new);
        let stdout = child.stdout.take();

        tracing::debug!(tool = %self.tool_name(), pid = ?child.id(), "Process spawned");

        Ok(ToolProcess {
            tool: self.tool_name(),
            child,
            stderr,
            stdout,
        })
    }
}

/// A running external process, exclusively owned by whoever spawned it.
#[derive(Debug)]
pub struct ToolProcess {
    tool: String,
    child: Child,
    stderr: Option<DiagnosticLines<ChildStderr>>,
    stdout: Option<ChildStdout>,
}

impl ToolProcess {
    /// Take the diagnostic line stream. Returns `None` on the second call.
    pub fn take_diagnostics(&mut self) -> Option<DiagnosticLines<ChildStderr>> {
        self.stderr.take()
    }

    /// Take the stdout pipe, if stdout was captured.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// OS process id while the process is alive.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit and return its exit code (`None` when it
    /// was terminated by a signal).
    pub async fn wait(&mut self) -> cf_core::Result<Option<i32>> {
        let status = self.child.wait().await.map_err(|e| {
            cf_core::Error::tool(self.tool.clone(), format!("I/O error waiting for process: {e}"))
        })?;
        Ok(status.code())
    }

    /// Forcibly terminate the process and reap it.
    pub async fn kill(&mut self) -> cf_core::Result<()> {
        self.child
            .kill()
            .await
            .map_err(|e| cf_core::Error::tool(self.tool.clone(), format!("failed to kill: {e}")))
    }
}

/// Splits a diagnostic stream into lines on either `\n` or `\r`.
///
/// ffmpeg rewrites its status line in place with carriage returns, so plain
/// `lines()` would only yield it once the process exits. Partial lines are
/// kept in `pending`, which makes [`next_line`](Self::next_line) safe to use
/// inside `tokio::select!`.
#[derive(Debug)]
pub struct DiagnosticLines<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> DiagnosticLines<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    /// Next non-empty line, or `None` at end of stream.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.flush_pending()));
            }

            match buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(pos) => {
                    self.pending.extend_from_slice(&buf[..pos]);
                    self.reader.consume(pos + 1);
                    if !self.pending.is_empty() {
                        return Ok(Some(self.flush_pending()));
                    }
                }
                None => {
                    let len = buf.len();
                    self.pending.extend_from_slice(buf);
                    self.reader.consume(len);
                }
            }
        }
    }

    fn flush_pending(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}
