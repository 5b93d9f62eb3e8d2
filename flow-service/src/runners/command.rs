// Command Runner
// Builds templated external-command invocations and captures their output

use crate::execution::environment::Environment;

use regex::Regex;
use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Exit code reported when the process never produced one (timeout, spawn
/// failure, killed by a signal)
pub const SENTINEL_EXIT_CODE: i32 = -1;

/// Captured outcome of one external command
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    /// Resolved command line, for diagnostics
    pub command: String,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    /// Whether the process was killed because it exceeded its timeout
    pub timed_out: bool,
    pub duration: Duration,
}

impl CommandResult {
    /// Exit code zero
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout matches the pattern
    pub fn matches(&self, pattern: &Regex) -> bool {
        pattern.is_match(&self.stdout_str())
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "command: {}", self.command)?;
        if self.timed_out {
            writeln!(f, "timed out after {:?}", self.duration)?;
        }
        writeln!(f, "exit code: {}", self.exit_code)?;
        writeln!(f, "stdout:\n{}", self.stdout_str())?;
        write!(f, "stderr:\n{}", self.stderr_str())
    }
}

/// An external command whose program, arguments, and stdin may contain
/// `{{.name}}` placeholders
#[derive(Debug, Clone)]
pub struct Command {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    input: Option<String>,
}

impl Command {
    /// Create a command with initial arguments
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: None,
            input: None,
        }
    }

    /// Return a copy with more arguments appended
    pub fn with_args<I, S>(&self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cmd = self.clone();
        cmd.args.extend(args.into_iter().map(Into::into));
        cmd
    }

    /// Kill the process if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Feed `input` (a template) to the process on stdin
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Resolve placeholders, run the process, and capture its output.
    ///
    /// Never fails: spawn errors and timeouts are reported through the
    /// result's exit code and stderr.
    pub async fn run(&self, env: &Environment) -> CommandResult {
        let program = env.resolve(&self.program);
        let args: Vec<String> = self.args.iter().map(|arg| env.resolve(arg)).collect();
        let input = self.input.as_ref().map(|input| env.resolve(input));
        let command_line = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        let start = Instant::now();
        let deadline = self.timeout.map(|timeout| tokio::time::Instant::now() + timeout);
        debug!(command = %command_line, timeout = ?self.timeout, "running command");

        let mut cmd = ProcessCommand::new(&program);
        cmd.args(&args);
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // Own process group, so a timeout also reaches helpers the command forks
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %command_line, error = %e, "failed to spawn command");
                return CommandResult {
                    command: command_line,
                    stderr: format!("Failed to spawn process '{}': {}", program, e).into_bytes(),
                    exit_code: SENTINEL_EXIT_CODE,
                    duration: start.elapsed(),
                    ..CommandResult::default()
                };
            }
        };

        let stdout = child.stdout.take().map(OutputReader::spawn);
        let stderr = child.stderr.take().map(OutputReader::spawn);

        // A child that exits without reading stdin closes the pipe; the
        // result still reflects what it did.
        let stdin_writer = match (input, child.stdin.take()) {
            (Some(input), Some(mut stdin)) => Some(tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(error = %e, "failed to write stdin");
                }
            })),
            _ => None,
        };

        let mut timed_out = false;
        let status = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(status) => status.ok(),
                Err(_) => {
                    warn!(
                        command = %command_line,
                        timeout = ?self.timeout,
                        "command timed out, killing"
                    );
                    timed_out = true;
                    kill_process_group(&child);
                    let _ = child.kill().await;
                    None
                }
            },
            None => child.wait().await.ok(),
        };

        if let Some(writer) = stdin_writer {
            writer.abort();
        }

        // Helpers that outlive the command may hold the pipes open
        let drain_until = deadline.map(|deadline| {
            std::cmp::max(deadline, tokio::time::Instant::now()) + OUTPUT_DRAIN_GRACE
        });
        let stdout = match stdout {
            Some(reader) => reader.finish(drain_until).await,
            None => Vec::new(),
        };
        let mut stderr = match stderr {
            Some(reader) => reader.finish(drain_until).await,
            None => Vec::new(),
        };

        let duration = start.elapsed();
        if timed_out {
            let note = format!("\nProcess timed out after {:?}", duration);
            stderr.extend_from_slice(note.as_bytes());
        }

        let exit_code = status
            .and_then(|s| s.code())
            .unwrap_or(SENTINEL_EXIT_CODE);

        debug!(command = %command_line, exit_code, timed_out, ?duration, "command finished");

        CommandResult {
            command: command_line,
            stdout,
            stderr,
            exit_code,
            timed_out,
            duration,
        }
    }
}

/// Time allowed for buffered output to be read once the deadline has passed
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(50);

/// Background reader for one output pipe; keeps what was read even when cut short
struct OutputReader {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl OutputReader {
    fn spawn<R>(mut pipe: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .extend_from_slice(&chunk[..n]),
                }
            }
        });
        Self { buf, handle }
    }

    async fn finish(mut self, until: Option<tokio::time::Instant>) -> Vec<u8> {
        match until {
            Some(until) => {
                if tokio::time::timeout_at(until, &mut self.handle).await.is_err() {
                    self.handle.abort();
                }
            }
            None => {
                let _ = (&mut self.handle).await;
            }
        }
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *buf)
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    if let Some(pid) = child.id() {
        // Negative pid targets the group created by `process_group(0)`
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_echo() {
        let env = Environment::new();
        let result = Command::new("echo", ["hello"]).run(&env).await;

        assert!(result.ok());
        assert_eq!(result.stdout_str().trim(), "hello");
        assert!(result.stderr.is_empty());
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_command_resolves_templates() {
        let env = Environment::new();
        env.set("team", ["integration-team"]);
        let result = Command::new("echo", ["team={{.team}}"]).run(&env).await;

        assert_eq!(result.stdout_str().trim(), "team=integration-team");
        assert_eq!(result.command, "echo team=integration-team");
    }

    #[test]
    fn test_command_with_args_keeps_base() {
        let base = Command::new("echo", ["a"]);
        let extended = base.with_args(["b", "c"]);

        assert_eq!(base.args(), ["a"]);
        assert_eq!(extended.args(), ["a", "b", "c"]);
        assert_eq!(extended.program(), "echo");
    }

    #[tokio::test]
    async fn test_command_exit_code() {
        let env = Environment::new();
        let result = Command::new("sh", ["-c", "exit 42"]).run(&env).await;

        assert_eq!(result.exit_code, 42);
        assert!(!result.ok());
    }

    #[tokio::test]
    async fn test_command_stderr() {
        let env = Environment::new();
        let result = Command::new("sh", ["-c", "echo error >&2"]).run(&env).await;

        assert!(result.ok());
        assert!(result.stderr_str().contains("error"));
    }

    #[tokio::test]
    async fn test_command_stdin() {
        let env = Environment::new();
        env.set("adminpassword", ["s3cret"]);
        let result = Command::new("cat", Vec::<String>::new())
            .with_input("{{.adminpassword}}")
            .run(&env)
            .await;

        assert!(result.ok());
        assert_eq!(result.stdout_str(), "s3cret");
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let env = Environment::new();
        let result = Command::new("sleep", ["5"])
            .with_timeout(Duration::from_millis(100))
            .run(&env)
            .await;

        assert!(result.timed_out);
        assert_eq!(result.exit_code, SENTINEL_EXIT_CODE);
        assert!(!result.ok());
        assert!(result.duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_command_timeout_kills_forked_children() {
        let env = Environment::new();
        let result = Command::new("sh", ["-c", "sleep 3; echo done"])
            .with_timeout(Duration::from_millis(100))
            .run(&env)
            .await;

        assert!(result.timed_out);
        assert_eq!(result.exit_code, SENTINEL_EXIT_CODE);
        assert!(result.duration < Duration::from_secs(1), "{:?}", result.duration);
        assert!(!result.stdout_str().contains("done"));
    }

    #[tokio::test]
    async fn test_command_timeout_keeps_early_output() {
        let env = Environment::new();
        let result = Command::new("sh", ["-c", "echo early; sleep 3"])
            .with_timeout(Duration::from_millis(300))
            .run(&env)
            .await;

        assert!(result.timed_out);
        assert_eq!(result.stdout_str().trim(), "early");
        assert!(result.duration < Duration::from_secs(1), "{:?}", result.duration);
    }

    #[tokio::test]
    async fn test_command_timeout_covers_unread_stdin() {
        let env = Environment::new();
        let result = Command::new("sleep", ["3"])
            .with_input("x".repeat(1 << 20))
            .with_timeout(Duration::from_millis(100))
            .run(&env)
            .await;

        assert!(result.timed_out);
        assert!(!result.ok());
        assert!(result.duration < Duration::from_secs(1), "{:?}", result.duration);
    }

    #[tokio::test]
    async fn test_command_spawn_failure() {
        let env = Environment::new();
        let result = Command::new("definitely-not-a-real-binary-xyz", ["x"])
            .run(&env)
            .await;

        assert_eq!(result.exit_code, SENTINEL_EXIT_CODE);
        assert!(result.stderr_str().contains("Failed to spawn"));
    }

    #[test]
    fn test_result_matches() {
        let result = CommandResult {
            stdout: b"  integration-target   http://10.0.0.1\n".to_vec(),
            ..CommandResult::default()
        };
        let pattern = Regex::new(r"\s+integration-target .*").unwrap();
        assert!(result.matches(&pattern));
        assert!(!result.matches(&Regex::new("other").unwrap()));
    }
}
