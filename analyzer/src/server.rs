//! Analyzer: owns the server child process and the connection lifecycle.
//!
//! One `Analyzer` value covers one process lifetime:
//! `NotStarted → Starting → Connected → Terminating → Terminated`.
//! A restart builds a new `Analyzer`; nothing here is ever reset.
//!
//! The reader task routes response frames to the correlator and everything
//! else to the broadcaster. When the stream closes, pending requests are
//! failed *before* `ProcessExited` is emitted.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tether_types::{AnalysisRootSet, Capability, ServerCapabilities, ServerProcessState};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter, Framing, Inbound};
use crate::correlator::{RequestCorrelator, Routed};
use crate::error::AnalyzerError;
use crate::events::{EventBroadcaster, EventKind, ServerEvent, Subscription};
use crate::protocol::{self, ConnectedParams, Incoming, Request, ServerErrorParams, StatusParams};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the reader waits for the child to report its exit status after EOF.
const EXIT_WAIT: Duration = Duration::from_secs(2);

const WRITER_CHANNEL_CAPACITY: usize = 64;

/// Reason given to every pending request when the process goes away.
pub const SERVER_TERMINATED: &str = "server terminated";

/// Reason given to requests cancelled through [`Analyzer::cancel_all_requests`].
pub const CANCELLED_BY_CLIENT: &str = "cancelled by client";

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

/// Executable, arguments and framing used to launch the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub framing: Framing,
}

impl ServerCommand {
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            framing: Framing::default(),
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }
}

/// Bare command names are looked up on `PATH`; anything with a directory is used as is.
fn resolve_executable(executable: &Path) -> PathBuf {
    if executable.components().count() > 1 {
        return executable.to_path_buf();
    }
    which::which(executable).unwrap_or_else(|_| executable.to_path_buf())
}

struct Shared {
    state: Mutex<ServerProcessState>,
    capabilities: Mutex<Option<Arc<ServerCapabilities>>>,
    correlator: RequestCorrelator,
    events: EventBroadcaster,
    writer_tx: Mutex<Option<mpsc::Sender<WriterCommand>>>,
    child: tokio::sync::Mutex<Option<Child>>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    finalized: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one analysis-server connection. Clones share the connection.
#[derive(Clone)]
pub struct Analyzer {
    shared: Arc<Shared>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    /// Create an analyzer in `NotStarted`. Register listeners before starting it.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ServerProcessState::NotStarted),
                capabilities: Mutex::new(None),
                correlator: RequestCorrelator::new(),
                events: EventBroadcaster::new(),
                writer_tx: Mutex::new(None),
                child: tokio::sync::Mutex::new(None),
                reader_handle: Mutex::new(None),
                finalized: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the server process and begin reading from it.
    pub async fn start(&self, command: &ServerCommand) -> Result<(), AnalyzerError> {
        self.begin_starting()?;

        let executable = resolve_executable(&command.executable);
        tracing::info!(
            executable = %executable.display(),
            args = ?command.args,
            "Starting analysis server"
        );

        let mut cmd = Command::new(&executable);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let spawned = cmd.spawn().and_then(|mut child| {
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| std::io::Error::other("no stdout from child"))?;
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| std::io::Error::other("no stdin from child"))?;
            Ok((child, stdout, stdin))
        });

        let (child, stdout, stdin) = match spawned {
            Ok(parts) => parts,
            Err(source) => {
                tracing::warn!(executable = %executable.display(), "Failed to spawn analysis server: {source}");
                self.shared.correlator.close(SERVER_TERMINATED);
                self.shared.set_state(ServerProcessState::Terminated);
                self.shared.finalized.store(true, Ordering::SeqCst);
                return Err(AnalyzerError::Spawn { executable, source });
            }
        };

        *self.shared.child.lock().await = Some(child);
        self.connect_streams(stdout, stdin, command.framing);
        Ok(())
    }

    /// Drive the protocol over already-open streams instead of a child process.
    ///
    /// Used for servers reached through something other than stdio of a
    /// spawned child (and by tests). EOF on `reader` is treated as process exit.
    pub fn attach<R, W>(&self, reader: R, writer: W, framing: Framing) -> Result<(), AnalyzerError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.begin_starting()?;
        self.connect_streams(reader, writer, framing);
        Ok(())
    }

    fn begin_starting(&self) -> Result<(), AnalyzerError> {
        let mut state = lock(&self.shared.state);
        if *state != ServerProcessState::NotStarted {
            return Err(AnalyzerError::AlreadyStarted { state: *state });
        }
        *state = ServerProcessState::Starting;
        Ok(())
    }

    fn connect_streams<R, W>(&self, reader: R, writer: W, framing: Framing)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer, framing);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        tracing::trace!(%frame, "analysis server <-");
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("Analysis server write error: {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });
        *lock(&self.shared.writer_tx) = Some(writer_tx);

        let shared = Arc::clone(&self.shared);
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader, framing);
            loop {
                match reader.read_frame().await {
                    Ok(Some(Inbound::Message(frame))) => shared.dispatch_frame(&frame),
                    Ok(Some(Inbound::Malformed { error })) => {
                        tracing::warn!("Dropping malformed frame from analysis server: {error}");
                        shared.events.emit(&ServerEvent::ParseError { error });
                    }
                    Ok(None) => {
                        tracing::info!("Analysis server closed stdout");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Analysis server reader error: {e:#}");
                        break;
                    }
                }
            }
            let (code, signal) = shared.reap_exit_status().await;
            shared.finalize(code, signal);
        });
        *lock(&self.shared.reader_handle) = Some(reader_handle);
    }

    #[must_use]
    pub fn state(&self) -> ServerProcessState {
        *lock(&self.shared.state)
    }

    /// Capabilities of the live connection, or `None` before the handshake and
    /// after termination.
    #[must_use]
    pub fn capabilities(&self) -> Option<Arc<ServerCapabilities>> {
        lock(&self.shared.capabilities).clone()
    }

    /// Capabilities of the live connection, or the empty set.
    #[must_use]
    pub fn current_capabilities(&self) -> Arc<ServerCapabilities> {
        self.capabilities()
            .unwrap_or_else(|| Arc::new(ServerCapabilities::empty()))
    }

    #[must_use]
    pub fn events(&self) -> &EventBroadcaster {
        &self.shared.events
    }

    pub fn on_server_connected<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.shared.events.on(EventKind::Connected, listener)
    }

    pub fn on_server_status_changed<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.shared.events.on(EventKind::StatusChanged, listener)
    }

    /// Resolve with the capabilities once the handshake arrives.
    ///
    /// Fails if the process exits first. Applies no timeout of its own.
    pub async fn wait_connected(&self) -> Result<Arc<ServerCapabilities>, AnalyzerError> {
        // Subscribe before checking state so a handshake in between is not missed.
        let next = self.shared.events.next_where(
            &[EventKind::Connected, EventKind::ProcessExited],
            |_| true,
        );
        if let Some(capabilities) = self.capabilities() {
            return Ok(capabilities);
        }
        if self.state() == ServerProcessState::Terminated {
            return Err(AnalyzerError::ConnectFailed {
                reason: String::from("server already terminated"),
            });
        }
        match next.await {
            Some(ServerEvent::Connected { capabilities, .. }) => Ok(capabilities),
            Some(ServerEvent::ProcessExited { code, signal, .. }) => {
                Err(AnalyzerError::ConnectFailed {
                    reason: describe_exit(code, signal),
                })
            }
            _ => Err(AnalyzerError::ConnectFailed {
                reason: String::from("event source closed"),
            }),
        }
    }

    /// Resolve with `true` when `subsystem` next reports that it is not busy,
    /// or `false` if the process exits first.
    ///
    /// The listener is registered before this returns.
    pub fn next_idle(&self, subsystem: &str) -> impl Future<Output = bool> + Send + 'static {
        let subsystem = subsystem.to_string();
        let next = self.shared.events.next_where(
            &[EventKind::StatusChanged, EventKind::ProcessExited],
            move |event| match event {
                ServerEvent::StatusChanged { subsystem: s, busy } => *s == subsystem && !busy,
                _ => true,
            },
        );
        async move { matches!(next.await, Some(ServerEvent::StatusChanged { .. })) }
    }

    /// Send a request and wait for its matching response.
    ///
    /// Responses may arrive in any order. There is no per-request
    /// cancellation; callers that lose interest simply drop the future.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, AnalyzerError> {
        if self.state() == ServerProcessState::NotStarted {
            return Err(AnalyzerError::NotRunning);
        }
        let (id, rx) = self.shared.correlator.begin(method)?;
        let frame = match serde_json::to_value(Request::new(id, method, params)) {
            Ok(frame) => frame,
            Err(e) => {
                self.shared.correlator.abandon(id);
                return Err(AnalyzerError::Serialize(e));
            }
        };

        if let Err(e) = self.shared.send(frame).await {
            // Never leave an entry behind for a frame that was not written.
            self.shared.correlator.abandon(id);
            return Err(e);
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(AnalyzerError::Cancelled {
                reason: String::from(SERVER_TERMINATED),
            }),
        }
    }

    /// Fail every pending request locally; also asks the server to drop its
    /// outstanding work when it advertises support for that.
    pub async fn cancel_all_requests(&self) -> usize {
        let cancelled = self.shared.correlator.cancel_all(CANCELLED_BY_CLIENT);
        tracing::debug!(cancelled, "Cancelled all pending analysis requests");

        if self
            .capabilities()
            .is_some_and(|caps| caps.supports(Capability::CancelAllRequests))
        {
            let analyzer = self.clone();
            tokio::spawn(async move {
                if let Err(e) = analyzer
                    .request(protocol::CANCEL_ALL_REQUESTS, None)
                    .await
                {
                    tracing::debug!("Server-side cancel-all failed: {e}");
                }
            });
        }
        cancelled
    }

    pub async fn set_analysis_roots(&self, roots: &AnalysisRootSet) -> Result<(), AnalyzerError> {
        let params = serde_json::json!({
            "included": roots.included,
            "excluded": roots.excluded,
        });
        self.request(protocol::SET_ANALYSIS_ROOTS, Some(params))
            .await
            .map(drop)
    }

    pub async fn reanalyze(&self) -> Result<(), AnalyzerError> {
        self.request(protocol::REANALYZE, None).await.map(drop)
    }

    pub async fn set_subscriptions(&self, subscriptions: &[&str]) -> Result<(), AnalyzerError> {
        let params = protocol::set_subscriptions_params(subscriptions);
        self.request(protocol::SET_SUBSCRIPTIONS, Some(params))
            .await
            .map(drop)
    }

    /// Number of requests still waiting for a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.correlator.pending_count()
    }

    /// Shut the server down. Always ends in `Terminated` with the process reaped.
    ///
    /// The graceful path (a `server.shutdown` request) is attempted only on a
    /// connected server that supports it; its failure never skips the
    /// forced-termination steps that follow.
    pub async fn stop(&self) {
        let previous = {
            let mut state = lock(&self.shared.state);
            let previous = *state;
            match previous {
                ServerProcessState::NotStarted => *state = ServerProcessState::Terminated,
                ServerProcessState::Starting | ServerProcessState::Connected => {
                    *state = ServerProcessState::Terminating;
                }
                ServerProcessState::Terminating | ServerProcessState::Terminated => {}
            }
            previous
        };

        if previous == ServerProcessState::NotStarted {
            self.shared.correlator.close(SERVER_TERMINATED);
            self.shared.finalized.store(true, Ordering::SeqCst);
            return;
        }

        if previous == ServerProcessState::Connected
            && self
                .capabilities()
                .is_some_and(|caps| caps.supports(Capability::Shutdown))
        {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.request(protocol::SHUTDOWN, None))
                .await
            {
                Ok(Ok(_)) => tracing::debug!("Analysis server acknowledged shutdown"),
                Ok(Err(e)) => tracing::debug!("Graceful shutdown failed: {e}"),
                Err(_) => tracing::debug!("Graceful shutdown timed out"),
            }
        }

        self.shared.close_writer().await;
        self.shared.join_reader().await;

        // Whatever happened above, nothing may outlive stop().
        if let Some(mut child) = self.shared.child.lock().await.take() {
            let _ = child.kill().await;
        }
        self.shared.finalize(None, None);
    }
}

impl Shared {
    fn set_state(&self, next: ServerProcessState) {
        let mut state = lock(&self.state);
        tracing::debug!(from = %*state, to = %next, "Analysis server state");
        *state = next;
    }

    async fn send(&self, frame: serde_json::Value) -> Result<(), AnalyzerError> {
        let tx = lock(&self.writer_tx)
            .clone()
            .ok_or(AnalyzerError::ChannelClosed)?;
        tx.send(WriterCommand::Send(frame))
            .await
            .map_err(|_| AnalyzerError::ChannelClosed)
    }

    async fn close_writer(&self) {
        let tx = lock(&self.writer_tx).take();
        if let Some(tx) = tx {
            let _ = tx.send(WriterCommand::Shutdown).await;
        }
    }

    /// Wait for the reader to observe EOF; kill the child if it lingers.
    async fn join_reader(&self) {
        let handle = lock(&self.reader_handle).take();
        let Some(mut handle) = handle else { return };

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle)
            .await
            .is_ok()
        {
            return;
        }

        tracing::debug!("Analysis server didn't exit in time, killing");
        if let Some(child) = self.child.lock().await.as_mut() {
            let _ = child.start_kill();
        }
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle)
            .await
            .is_err()
        {
            handle.abort();
        }
    }

    async fn reap_exit_status(&self) -> (Option<i32>, Option<i32>) {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return (None, None);
        };
        let status = match tokio::time::timeout(EXIT_WAIT, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::debug!("Waiting for analysis server exit failed: {e}");
                None
            }
            Err(_) => {
                tracing::debug!("Analysis server closed stdout but kept running, killing");
                let _ = child.kill().await;
                None
            }
        };
        guard.take();
        status.map_or((None, None), |status| (status.code(), exit_signal(status)))
    }

    /// Tear the connection down exactly once: fail pending requests, drop the
    /// capability snapshot, then tell listeners.
    fn finalize(&self, code: Option<i32>, signal: Option<i32>) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        let expected = *lock(&self.state) == ServerProcessState::Terminating;
        if !expected {
            self.set_state(ServerProcessState::Terminating);
            tracing::warn!("Analysis server terminated unexpectedly ({})", describe_exit(code, signal));
        }

        lock(&self.capabilities).take();
        lock(&self.writer_tx).take();
        let cancelled = self.correlator.close(SERVER_TERMINATED);
        if cancelled > 0 {
            tracing::debug!(cancelled, "Failed pending requests on termination");
        }
        self.set_state(ServerProcessState::Terminated);

        self.events.emit(&ServerEvent::ProcessExited {
            code,
            signal,
            expected,
        });
    }

    fn dispatch_frame(&self, frame: &serde_json::Value) {
        tracing::trace!(%frame, "analysis server ->");
        let Some(incoming) = protocol::parse_incoming(frame) else {
            tracing::trace!("Ignoring frame with no recognizable shape");
            return;
        };

        match incoming {
            Incoming::Response {
                id,
                raw_id,
                outcome,
            } => {
                let error = outcome.as_ref().err().cloned();
                let routed = match id {
                    Some(id) => self.correlator.complete(id, outcome),
                    None => Routed::Unknown,
                };
                match (routed, error) {
                    (Routed::Unknown, _) => {
                        tracing::warn!(id = %raw_id, "Discarding response for unknown request id");
                    }
                    (Routed::Delivered { method }, Some(error)) => {
                        tracing::debug!(%method, code = %error.code, "Request failed: {}", error.message);
                        self.events
                            .emit(&ServerEvent::RequestError { method, error });
                    }
                    (Routed::Delivered { .. }, None) => {}
                }
            }
            Incoming::Event { event, params } => self.handle_event(&event, params),
            Incoming::ServerRequest { method } => {
                tracing::debug!(%method, "Ignoring request from analysis server");
            }
        }
    }

    fn handle_event(&self, event: &str, params: serde_json::Value) {
        match event {
            protocol::EVENT_CONNECTED => {
                let connected = serde_json::from_value::<ConnectedParams>(params)
                    .unwrap_or_else(|e| {
                        tracing::debug!("Unreadable handshake params, assuming defaults: {e}");
                        ConnectedParams {
                            version: String::new(),
                            pid: None,
                            capabilities: None,
                        }
                    });
                let capabilities = Arc::new(ServerCapabilities::from_handshake(
                    connected.version.clone(),
                    connected.capabilities.as_ref(),
                ));
                {
                    let mut state = lock(&self.state);
                    match *state {
                        ServerProcessState::Starting => {}
                        ServerProcessState::Connected => {
                            tracing::warn!(
                                version = %connected.version,
                                "Ignoring repeated handshake; capabilities are fixed for this connection"
                            );
                            return;
                        }
                        other => {
                            tracing::debug!(state = %other, "Ignoring handshake on a closing connection");
                            return;
                        }
                    }
                    *lock(&self.capabilities) = Some(Arc::clone(&capabilities));
                    *state = ServerProcessState::Connected;
                }
                tracing::info!(version = %connected.version, pid = ?connected.pid, "Analysis server connected");
                self.events.emit(&ServerEvent::Connected {
                    version: connected.version,
                    pid: connected.pid,
                    capabilities,
                });
            }
            protocol::EVENT_STATUS => match serde_json::from_value::<StatusParams>(params) {
                Ok(status) => {
                    for (subsystem, busy) in status.subsystems() {
                        self.events.emit(&ServerEvent::StatusChanged {
                            subsystem: subsystem.to_string(),
                            busy,
                        });
                    }
                }
                Err(e) => tracing::debug!("Failed to parse server.status: {e}"),
            },
            protocol::EVENT_ERROR => match serde_json::from_value::<ServerErrorParams>(params) {
                Ok(error) => {
                    if error.is_fatal {
                        tracing::error!("Analysis server fatal error: {}", error.message);
                    } else {
                        tracing::warn!("Analysis server error: {}", error.message);
                    }
                    self.events.emit(&ServerEvent::ServerError {
                        fatal: error.is_fatal,
                        message: error.message,
                    });
                }
                Err(e) => tracing::debug!("Failed to parse server.error: {e}"),
            },
            other => {
                self.events.emit(&ServerEvent::Notification {
                    event: other.to_string(),
                    params,
                });
            }
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: std::process::ExitStatus) -> Option<i32> {
    None
}

fn describe_exit(code: Option<i32>, signal: Option<i32>) -> String {
    match (code, signal) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => String::from("stream closed"),
    }
}
