//! Low-level ownership of one MCP server child process.
//!
//! A [`ProcessHandle`] owns the child's three standard streams and exposes a
//! request/response surface over line-delimited JSON-RPC. Four background
//! tasks run per child: a writer serializing all stdin traffic, a reader
//! demuxing stdout frames into the correlation table, a stderr drainer
//! feeding a bounded ring buffer, and an exit watcher that reaps the child
//! and fails outstanding calls when it dies.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError,
    },
    time::{Duration, Instant},
};

use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    sync::{mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
    time,
};
use tracing::{debug, warn};

use crate::{
    error::HubError,
    protocol::{self, Incoming, RequestId, RpcNotification, RpcResponse},
};

/// Bytes of trailing stderr lines retained per child for diagnostics.
const STDERR_BUFFER_BYTES: usize = 64 * 1024;

/// Interval at which the exit watcher polls for child termination.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

type PendingRequests = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, HubError>>>>>;

enum WriterMessage {
    Frame(String),
    Close,
}

/// Bounded ring of the child's most recent stderr lines.
#[derive(Clone, Default, Debug)]
pub struct StderrBuffer {
    inner: Arc<std::sync::Mutex<StderrRing>>,
}

#[derive(Default, Debug)]
struct StderrRing {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrBuffer {
    fn push(&self, line: String) {
        let mut ring = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        ring.bytes += line.len();
        ring.lines.push_back(line);
        while ring.bytes > STDERR_BUFFER_BYTES {
            match ring.lines.pop_front() {
                Some(dropped) => ring.bytes -= dropped.len(),
                None => break,
            }
        }
    }

    /// Returns the retained tail joined with newlines.
    pub fn tail(&self) -> String {
        let ring = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        ring.lines
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Launch parameters for one child process.
///
/// `env` is the fully merged effective environment; the child inherits
/// nothing beyond it.
#[derive(Clone, Debug)]
pub struct SpawnOptions {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// A running child process speaking line-delimited JSON-RPC over stdio.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    started_at: Instant,
    writer: mpsc::UnboundedSender<WriterMessage>,
    pending: PendingRequests,
    next_id: AtomicU64,
    stderr: StderrBuffer,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<RpcNotification>>>,
    exit: watch::Receiver<Option<ExitStatus>>,
    child: Arc<Mutex<Option<Child>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Spawns the child and starts its stream workers.
    ///
    /// Retries briefly when the executable is reported busy (text file busy
    /// during concurrent installs); every other spawn failure is surfaced
    /// as [`HubError::Spawn`].
    pub async fn spawn(options: SpawnOptions) -> Result<Self, HubError> {
        let mut command = Command::new(&options.command);
        command
            .args(&options.args)
            .env_clear()
            .envs(&options.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &options.cwd {
            command.current_dir(dir);
        }

        let mut child = spawn_with_retry(&mut command, &options.command).await?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| pipe_error(&options.command, "stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| pipe_error(&options.command, "stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| pipe_error(&options.command, "stderr"))?;

        let stderr_buffer = StderrBuffer::default();
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let writer_handle = tokio::spawn(writer_task(stdin, writer_rx));
        let reader_handle = tokio::spawn(reader_task(
            stdout,
            pending.clone(),
            notify_tx,
            stderr_buffer.clone(),
        ));
        let stderr_handle = tokio::spawn(stderr_task(stderr, stderr_buffer.clone()));

        let child = Arc::new(Mutex::new(Some(child)));
        let exit_handle = tokio::spawn(exit_watch_task(child.clone(), pending.clone(), exit_tx));

        Ok(Self {
            pid,
            started_at: Instant::now(),
            writer: writer_tx,
            pending,
            next_id: AtomicU64::new(1),
            stderr: stderr_buffer,
            notifications: Mutex::new(Some(notify_rx)),
            exit: exit_rx,
            child,
            tasks: vec![writer_handle, reader_handle, stderr_handle, exit_handle],
        })
    }

    /// OS process id, if the child was still alive when captured.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Time elapsed since the child was spawned.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Most recent stderr output, for diagnostics.
    pub fn stderr_tail(&self) -> String {
        self.stderr.tail()
    }

    /// Watch channel that resolves once the child has been reaped.
    pub fn exited(&self) -> watch::Receiver<Option<ExitStatus>> {
        self.exit.clone()
    }

    /// Takes the server-initiated notification stream. Single consumer.
    pub async fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<RpcNotification>> {
        self.notifications.lock().await.take()
    }

    /// Issues a request and waits for the correlated response.
    ///
    /// Responses are matched strictly by id; arrival order is irrelevant.
    /// On deadline expiry the pending slot is freed and a late response is
    /// discarded by the reader.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, HubError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = json!({
            "jsonrpc": protocol::JSONRPC_VERSION,
            "id": id,
            "method": method,
            "params": params,
        });
        let serialized = serde_json::to_string(&message)?;
        let (tx, rx) = oneshot::channel();

        // Register before writing so an immediate response cannot be lost.
        {
            let mut guard = self.pending.lock().await;
            guard.insert(id, tx);
        }

        if self.writer.send(WriterMessage::Frame(serialized)).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(HubError::ChildGone);
        }

        match time::timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HubError::ChildGone),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(HubError::Timeout(deadline))
            }
        }
    }

    /// Writes a notification. No id, no correlation.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), HubError> {
        let message = json!({
            "jsonrpc": protocol::JSONRPC_VERSION,
            "method": method,
            "params": params,
        });
        let serialized = serde_json::to_string(&message)?;
        self.writer
            .send(WriterMessage::Frame(serialized))
            .map_err(|_| HubError::ChildGone)
    }

    /// Stops the child: close stdin, wait up to `grace`, then kill.
    ///
    /// Every outstanding call is completed with [`HubError::ChildGone`].
    /// Returns the exit status when the child could be reaped.
    pub async fn shutdown(&self, grace: Duration) -> Option<ExitStatus> {
        let _ = self.writer.send(WriterMessage::Close);

        let mut exit = self.exit.clone();
        let status = match time::timeout(grace, wait_for_exit(&mut exit)).await {
            Ok(status) => status,
            Err(_) => {
                {
                    let mut guard = self.child.lock().await;
                    if let Some(child) = guard.as_mut() {
                        let _ = child.start_kill();
                    }
                }
                wait_for_exit(&mut exit).await
            }
        };

        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(HubError::ChildGone));
        }

        status
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        for handle in &self.tasks {
            handle.abort();
        }

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                let _ = child.start_kill();
            }
        }
    }
}

fn pipe_error(command: &str, stream: &str) -> HubError {
    HubError::Spawn {
        command: command.to_string(),
        source: io::Error::other(format!("child {stream} unavailable")),
    }
}

async fn spawn_with_retry(command: &mut Command, program: &str) -> Result<Child, HubError> {
    let mut backoff = Duration::from_millis(2);
    let mut attempt = 0;
    loop {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    attempt += 1;
                    time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(HubError::Spawn {
                    command: program.to_string(),
                    source,
                });
            }
        }
    }
}

async fn wait_for_exit(rx: &mut watch::Receiver<Option<ExitStatus>>) -> Option<ExitStatus> {
    loop {
        if let Some(status) = *rx.borrow() {
            return Some(status);
        }
        if rx.changed().await.is_err() {
            return None;
        }
    }
}

async fn writer_task(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<WriterMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            WriterMessage::Frame(frame) => {
                if stdin.write_all(frame.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                let _ = stdin.flush().await;
            }
            WriterMessage::Close => break,
        }
    }

    let _ = stdin.shutdown().await;
}

async fn reader_task(
    stdout: ChildStdout,
    pending: PendingRequests,
    notifications: mpsc::UnboundedSender<RpcNotification>,
    stderr: StderrBuffer,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(err) => {
                warn!("discarding non-JSON stdout line: {err}");
                stderr.push(line);
                continue;
            }
        };

        match protocol::decode_frame(value) {
            Some(Incoming::Response(response)) => {
                dispatch_response(response, &pending).await;
            }
            Some(Incoming::Notification(notification)) => {
                let _ = notifications.send(notification);
            }
            None => {
                warn!("discarding malformed JSON-RPC frame");
                stderr.push(line);
            }
        }
    }

    // Stdout closed: the child is gone or going. Fail every waiter.
    let mut guard = pending.lock().await;
    for (_, tx) in guard.drain() {
        let _ = tx.send(Err(HubError::ChildGone));
    }
}

async fn dispatch_response(response: RpcResponse, pending: &PendingRequests) {
    let Some(id) = protocol::parse_request_id(&response.id) else {
        warn!("discarding response without a numeric id");
        return;
    };

    let sender = { pending.lock().await.remove(&id) };
    let Some(tx) = sender else {
        // Deadline already expired or caller went away; drop the payload.
        debug!(id, "discarding response with no pending request");
        return;
    };

    if let Some(err) = response.error {
        let _ = tx.send(Err(HubError::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }));
    } else if let Some(result) = response.result {
        let _ = tx.send(Ok(result));
    } else {
        let _ = tx.send(Err(HubError::Rpc {
            code: -32603,
            message: "response carried neither result nor error".to_string(),
            data: None,
        }));
    }
}

async fn stderr_task(stderr: ChildStderr, buffer: StderrBuffer) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("child stderr: {line}");
        buffer.push(line);
    }
}

async fn exit_watch_task(
    child: Arc<Mutex<Option<Child>>>,
    pending: PendingRequests,
    exit: watch::Sender<Option<ExitStatus>>,
) {
    loop {
        let status = {
            let mut guard = child.lock().await;
            match guard.as_mut() {
                Some(child) => match child.try_wait() {
                    Ok(Some(status)) => {
                        guard.take();
                        Some(status)
                    }
                    Ok(None) => None,
                    Err(err) => {
                        warn!("failed to poll child: {err}");
                        None
                    }
                },
                // Already reaped elsewhere; nothing left to watch.
                None => return,
            }
        };

        if let Some(status) = status {
            debug!(?status, "child exited");
            let _ = exit.send(Some(status));
            let mut guard = pending.lock().await;
            for (_, tx) in guard.drain() {
                let _ = tx.send(Err(HubError::ChildGone));
            }
            return;
        }

        time::sleep(EXIT_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_buffer_drops_oldest_lines_past_the_cap() {
        let buffer = StderrBuffer::default();
        let line = "x".repeat(1024);
        for _ in 0..80 {
            buffer.push(line.clone());
        }
        let tail = buffer.tail();
        assert!(tail.len() <= STDERR_BUFFER_BYTES + 80);
        assert!(tail.ends_with(&line));
    }
}
