use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::metrics::Metrics;

/// How long output readers may keep draining after the process exited
const READER_GRACE_AFTER_EXIT: Duration = Duration::from_secs(2);

/// How long output readers may keep draining after a forced kill
const READER_GRACE_AFTER_KILL: Duration = Duration::from_millis(500);

/// Incremental output of a running tool.
///
/// A sink receives zero or more `Stdout`/`Stderr` lines followed by exactly
/// one terminal event (`Exited` or `TimedOut`) for every spawned process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Stdout(String),
    Stderr(String),
    /// Exit code, `None` when terminated by a signal
    Exited(Option<i32>),
    TimedOut(Duration),
}

impl OutputEvent {
    /// The output line carried by this event, if any
    pub fn line(&self) -> Option<&str> {
        match self {
            OutputEvent::Stdout(line) | OutputEvent::Stderr(line) => Some(line),
            _ => None,
        }
    }
}

pub type OutputSink = mpsc::Sender<OutputEvent>;

/// One external program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: Utf8PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<Utf8PathBuf>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Human-readable command line for logs
    pub fn command_line(&self) -> String {
        let mut line = format!("\"{}\"", self.program);
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') {
                line.push_str(&format!("\"{}\"", arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Result of a process that ran to completion.
///
/// A nonzero exit code is a normal outcome here, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last non-empty stderr line, falling back to stdout
    pub fn last_error_line(&self) -> Option<&str> {
        fn last_line(text: &str) -> Option<&str> {
            text.lines().rev().map(str::trim).find(|line| !line.is_empty())
        }
        last_line(&self.stderr).or_else(|| last_line(&self.stdout))
    }
}

/// Errors that keep a process from producing an outcome
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {after:?}")]
    Timeout {
        program: String,
        after: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("IO error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Seam between orchestration code and real subprocesses
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run to completion, streaming output into `sink` while buffering it
    async fn run(
        &self,
        invocation: Invocation,
        sink: Option<OutputSink>,
    ) -> Result<ProcessOutcome, ProcessError>;

    /// Launch without waiting; the caller decides whether to wait on the child
    fn spawn_detached(&self, invocation: Invocation) -> Result<Child, ProcessError>;
}

/// Runs external tools with tokio
///
/// No retries happen at this layer; retry policy belongs to the workflow.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    metrics: Option<Arc<Metrics>>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self { metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn command(invocation: &Invocation) -> Command {
        let mut cmd = Command::new(invocation.program.as_std_path());
        cmd.args(&invocation.args);
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir.as_std_path());
        }
        cmd
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(
        &self,
        invocation: Invocation,
        sink: Option<OutputSink>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let program = invocation.program.to_string();
        tracing::info!("Executing: {}", invocation.command_line());

        let mut cmd = Self::command(&invocation);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        if let Some(metrics) = &self.metrics {
            metrics.record_process_spawned();
        }

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_lines(
                stdout,
                stdout_buf.clone(),
                sink.clone(),
                OutputEvent::Stdout,
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_lines(
                stderr,
                stderr_buf.clone(),
                sink.clone(),
                OutputEvent::Stderr,
            )));
        }

        let waited = match invocation.timeout {
            Some(limit) => timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        let status = match waited {
            Some(Ok(status)) => status,
            Some(Err(source)) => {
                drain_readers(readers, READER_GRACE_AFTER_KILL).await;
                return Err(ProcessError::Io { program, source });
            }
            None => {
                let after = invocation.timeout.unwrap_or_default();
                tracing::warn!("{} timed out after {:?}, killing it", program, after);
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill timed out process {}: {}", program, e);
                }
                drain_readers(readers, READER_GRACE_AFTER_KILL).await;
                if let Some(metrics) = &self.metrics {
                    metrics.record_process_timeout();
                }
                if let Some(sink) = &sink {
                    let _ = sink.send(OutputEvent::TimedOut(after)).await;
                }
                return Err(ProcessError::Timeout {
                    program,
                    after,
                    stdout: take_buffer(&stdout_buf),
                    stderr: take_buffer(&stderr_buf),
                });
            }
        };

        drain_readers(readers, READER_GRACE_AFTER_EXIT).await;

        let exit_code = status.code();
        let duration = start.elapsed();
        tracing::info!(
            "{} completed in {:.2}s with exit code {:?}",
            program,
            duration.as_secs_f32(),
            exit_code
        );
        if let Some(sink) = &sink {
            let _ = sink.send(OutputEvent::Exited(exit_code)).await;
        }

        Ok(ProcessOutcome {
            exit_code,
            stdout: take_buffer(&stdout_buf),
            stderr: take_buffer(&stderr_buf),
            duration,
        })
    }

    fn spawn_detached(&self, invocation: Invocation) -> Result<Child, ProcessError> {
        tracing::info!("Launching: {}", invocation.command_line());
        let mut cmd = Self::command(&invocation);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: invocation.program.to_string(),
            source,
        })?;
        if let Some(metrics) = &self.metrics {
            metrics.record_process_spawned();
        }
        Ok(child)
    }
}

/// Read lines from one pipe into `buffer`, forwarding each to `sink`
async fn pump_lines<R>(
    reader: R,
    buffer: Arc<Mutex<String>>,
    sink: Option<OutputSink>,
    wrap: fn(String) -> OutputEvent,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Stopped reading tool output: {}", e);
                break;
            }
        }

        // Tools may print paths in the platform's codepage
        let line = decode_line(&raw);
        {
            let mut buffer = buffer.lock().unwrap();
            buffer.push_str(&line);
            buffer.push('\n');
        }
        if let Some(sink) = &sink {
            // Receiver gone just means nobody is watching live output
            let _ = sink.send(wrap(line)).await;
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Wait for readers to hit EOF, aborting any that outlive `grace`.
///
/// A grandchild holding the pipes open would otherwise keep us waiting.
async fn drain_readers(readers: Vec<JoinHandle<()>>, grace: Duration) {
    for reader in readers {
        let abort = reader.abort_handle();
        if timeout(grace, reader).await.is_err() {
            tracing::debug!("Output reader still busy after {:?}, aborting", grace);
            abort.abort();
        }
    }
}

fn take_buffer(buffer: &Arc<Mutex<String>>) -> String {
    std::mem::take(&mut *buffer.lock().unwrap())
}

/// Platform-specific executable file name
pub fn executable_name(stem: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", stem)
    } else {
        stem.to_string()
    }
}

/// Whether `path` points at an existing file
pub fn tool_exists(path: &Utf8Path) -> bool {
    path.is_file()
}
