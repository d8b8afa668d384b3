//! UCI engine session: owns one engine process and drives it through
//! handshake, searches and shutdown.
//!
//! Every read from the engine is bounded. A read waits at most one poll slice
//! before checking whether the process has exited, and the surrounding loop
//! gives up at the phase deadline (handshake or compute). A session that fails
//! either phase is `Faulted` for good; callers start a new one.

use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chess_core::Position;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{EngineCommand, SessionSettings};
use crate::error::EngineError;
use crate::protocol::{
    self, Command as UciCommand, GoLimits, Response, Score, SearchCollector, SearchEnd,
};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no process yet
    Stopped,
    /// Process spawned, handshake not yet sent
    Starting,
    /// Waiting for `uciok` / `readyok`
    AwaitingHandshake,
    Ready,
    /// A search is on the wire
    Computing,
    /// Handshake or search failed; the process has been released
    Faulted,
    /// `close` has run
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Stopped => "stopped",
            SessionState::Starting => "starting",
            SessionState::AwaitingHandshake => "awaiting handshake",
            SessionState::Ready => "ready",
            SessionState::Computing => "computing",
            SessionState::Faulted => "faulted",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A request for the engine's best move.
#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub position: Position,
    pub depth: Option<u32>,
    pub movetime: Option<Duration>,
}

impl MoveRequest {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            depth: None,
            movetime: None,
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_movetime(mut self, movetime: Duration) -> Self {
        self.movetime = Some(movetime);
        self
    }
}

/// The engine's decision for a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveResult {
    /// Best move in UCI notation
    pub best_move: String,
    /// Expected reply, when the engine reports one
    pub ponder: Option<String>,
    /// SAN of the best move, filled in by callers that annotate results
    pub san: Option<String>,
    /// Last score reported before the best move; `None` if none was reported
    pub score: Option<Score>,
}

/// Result of a completed search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SearchOutcome {
    BestMove(MoveResult),
    /// The side to move has no legal move (checkmate or stalemate)
    NoMoveAvailable,
}

/// Which bounded wait a read belongs to.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Handshake,
    Compute,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    phase: Phase,
    budget: Duration,
    at: Instant,
}

impl Deadline {
    fn new(phase: Phase, budget: Duration) -> Self {
        Self {
            phase,
            budget,
            at: Instant::now() + budget,
        }
    }

    fn expired(&self) -> EngineError {
        match self.phase {
            Phase::Handshake => EngineError::HandshakeTimeout(self.budget),
            Phase::Compute => EngineError::ComputeTimeout(self.budget),
        }
    }
}

/// The spawned engine: child handle plus both pipes, owned as one value.
///
/// Spawned with `kill_on_drop`, so dropping it kills the process; `shutdown`
/// asks first.
struct EngineProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    label: String,
}

impl EngineProcess {
    fn spawn(command: &EngineCommand) -> Result<Self, EngineError> {
        let label = command.label();
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::from_spawn(&label, e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdout not captured".into()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            label,
        })
    }

    async fn send(&mut self, cmd: UciCommand<'_>) -> Result<(), EngineError> {
        let line = cmd.encode();
        debug!(engine = %self.label, cmd = line.trim_end(), "engine <");
        let written = match self.stdin.write_all(line.as_bytes()).await {
            Ok(()) => self.stdin.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| self.write_failure(e))
    }

    /// A closed pipe means the engine is gone, not that I/O misbehaved.
    fn write_failure(&mut self, e: std::io::Error) -> EngineError {
        if e.kind() == std::io::ErrorKind::BrokenPipe {
            let status = self.child.try_wait().ok().flatten();
            return EngineError::ProcessDied(describe_exit(status));
        }
        EngineError::Io(e)
    }

    /// Read the next line, giving up at `deadline` or when the process exits.
    async fn read_line(
        &mut self,
        deadline: &Deadline,
        poll_interval: Duration,
    ) -> Result<String, EngineError> {
        // Output written just before exit is still drained once the exit is seen
        let mut exited: Option<ExitStatus> = None;
        loop {
            let now = Instant::now();
            if now >= deadline.at {
                return Err(deadline.expired());
            }
            let slice = poll_interval.min(deadline.at - now);

            // `next_line` is cancel safe: a timed-out slice loses no data
            match tokio::time::timeout(slice, self.stdout.next_line()).await {
                Ok(Ok(Some(line))) => {
                    debug!(engine = %self.label, line = line.trim_end(), "engine >");
                    return Ok(line);
                }
                Ok(Ok(None)) => {
                    let status = self.reap(poll_interval).await;
                    return Err(EngineError::ProcessDied(describe_exit(status)));
                }
                Ok(Err(e)) => return Err(EngineError::Io(e)),
                Err(_) => {
                    if exited.is_some() {
                        return Err(EngineError::ProcessDied(describe_exit(exited)));
                    }
                    if let Ok(Some(status)) = self.child.try_wait() {
                        exited = Some(status);
                    }
                }
            }
        }
    }

    /// Exit status after stdout closed; the process may need a moment to exit.
    async fn reap(&mut self, wait: Duration) -> Option<ExitStatus> {
        match tokio::time::timeout(wait, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            _ => None,
        }
    }

    /// Quit, then terminate, then kill. Never fails; problems are logged.
    async fn shutdown(mut self, settings: &SessionSettings) {
        if let Err(e) = self.send(UciCommand::Quit).await {
            debug!(engine = %self.label, error = %e, "quit not delivered");
        }
        if self.wait_exit(settings.quit_grace, "quit").await {
            return;
        }

        if self.terminate() && self.wait_exit(settings.terminate_grace, "terminate").await {
            return;
        }

        self.kill(settings.kill_timeout).await;
    }

    /// Wait up to `grace` for the process to exit after `step`.
    async fn wait_exit(&mut self, grace: Duration, step: &str) -> bool {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(engine = %self.label, %status, step, "engine exited");
                true
            }
            Ok(Err(e)) => {
                warn!(engine = %self.label, error = %e, step, "waiting for engine exit failed");
                false
            }
            Err(_) => {
                debug!(engine = %self.label, step, "engine still running");
                false
            }
        }
    }

    /// Send SIGTERM. Returns whether the signal was delivered.
    #[cfg(unix)]
    fn terminate(&self) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id().and_then(|id| i32::try_from(id).ok()) else {
            return false;
        };
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => true,
            Err(e) => {
                warn!(engine = %self.label, error = %e, "failed to terminate engine");
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> bool {
        false
    }

    /// Kill without asking first, waiting up to `kill_timeout` for the exit.
    async fn kill(mut self, kill_timeout: Duration) {
        if let Err(e) = self.child.start_kill() {
            warn!(engine = %self.label, error = %e, "failed to kill engine");
        }
        match tokio::time::timeout(kill_timeout, self.child.wait()).await {
            Ok(Ok(status)) => debug!(engine = %self.label, %status, "engine killed"),
            Ok(Err(e)) => warn!(engine = %self.label, error = %e, "waiting for killed engine failed"),
            Err(_) => warn!(engine = %self.label, "engine still running after kill; releasing handle"),
        }
    }
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "exit status unknown".to_string(),
    }
}

/// One engine process and its protocol state.
pub struct EngineSession {
    command: EngineCommand,
    settings: SessionSettings,
    state: SessionState,
    process: Option<EngineProcess>,
    engine_name: Option<String>,
    last_position: Option<Position>,
}

impl EngineSession {
    /// Create a stopped session; nothing is spawned until [`start`](Self::start).
    pub fn new(command: EngineCommand, settings: SessionSettings) -> Self {
        Self {
            command,
            settings,
            state: SessionState::Stopped,
            process: None,
            engine_name: None,
            last_position: None,
        }
    }

    /// Create a session and complete the handshake.
    pub async fn launch(
        command: EngineCommand,
        settings: SessionSettings,
    ) -> Result<Self, EngineError> {
        let mut session = Self::new(command, settings);
        session.start().await?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Name from the engine's `id name` line.
    pub fn engine_name(&self) -> Option<&str> {
        self.engine_name.as_deref()
    }

    /// The position of the most recent search.
    pub fn last_position(&self) -> Option<&Position> {
        self.last_position.as_ref()
    }

    /// Spawn the engine and perform the handshake.
    ///
    /// A no-op on a session that is already ready. On failure the session is
    /// `Faulted` and the process has been released.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        match self.state {
            SessionState::Ready | SessionState::Computing => return Ok(()),
            SessionState::Stopped => {}
            other => return Err(EngineError::NotReady(other)),
        }

        info!(engine = %self.command.label(), "Starting engine");
        self.state = SessionState::Starting;
        match EngineProcess::spawn(&self.command) {
            Ok(process) => self.process = Some(process),
            Err(e) => {
                warn!(engine = %self.command.label(), error = %e, "Engine failed to spawn");
                self.state = SessionState::Faulted;
                return Err(e);
            }
        }

        match self.handshake().await {
            Ok(()) => {
                self.state = SessionState::Ready;
                info!(
                    engine = %self.command.label(),
                    name = self.engine_name.as_deref().unwrap_or("unknown"),
                    "Engine ready"
                );
                Ok(())
            }
            Err(e) => {
                self.fault(&e).await;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), EngineError> {
        let deadline = Deadline::new(Phase::Handshake, self.settings.handshake_timeout);
        let poll = self.settings.poll_interval;
        let process = self.process.as_mut().ok_or(EngineError::NotReady(self.state))?;

        process.send(UciCommand::Uci).await?;
        self.state = SessionState::AwaitingHandshake;

        loop {
            match protocol::decode(&process.read_line(&deadline, poll).await?) {
                Response::UciOk => break,
                Response::Id { name } => self.engine_name = Some(name),
                Response::Error(msg) => return Err(EngineError::Protocol(msg)),
                _ => {}
            }
        }

        for (name, value) in &self.settings.options {
            process
                .send(UciCommand::SetOption { name: name.as_str(), value: value.as_str() })
                .await?;
        }
        process.send(UciCommand::IsReady).await?;
        loop {
            match protocol::decode(&process.read_line(&deadline, poll).await?) {
                Response::ReadyOk => return Ok(()),
                Response::Error(msg) => return Err(EngineError::Protocol(msg)),
                _ => {}
            }
        }
    }

    /// Ask the engine for its best move.
    ///
    /// Requires a `Ready` session; there is no implicit start. Any failure
    /// after the position reaches the wire faults the session.
    pub async fn compute(&mut self, request: &MoveRequest) -> Result<SearchOutcome, EngineError> {
        if self.state != SessionState::Ready {
            return Err(EngineError::NotReady(self.state));
        }
        // Position is validated on construction; re-check before it reaches the wire
        let position = chess_core::validate(request.position.as_str())?;

        self.state = SessionState::Computing;
        let limits = self.limits_for(request);
        debug!(
            engine = %self.command.label(),
            side = ?position.side_to_move(),
            depth = ?limits.depth,
            movetime = ?limits.movetime,
            "Searching"
        );
        let deadline = Deadline::new(
            Phase::Compute,
            self.settings.compute_deadline(limits.movetime),
        );

        match self.search(&position, limits, &deadline).await {
            Ok(outcome) => {
                self.state = SessionState::Ready;
                self.last_position = Some(position);
                Ok(outcome)
            }
            Err(e) => {
                self.fault(&e).await;
                Err(e)
            }
        }
    }

    fn limits_for(&self, request: &MoveRequest) -> GoLimits {
        if request.depth.is_none() && request.movetime.is_none() {
            return GoLimits {
                depth: Some(self.settings.default_depth),
                movetime: self.settings.default_movetime,
            };
        }
        GoLimits {
            depth: request.depth,
            movetime: request.movetime,
        }
    }

    async fn search(
        &mut self,
        position: &Position,
        limits: GoLimits,
        deadline: &Deadline,
    ) -> Result<SearchOutcome, EngineError> {
        let poll = self.settings.poll_interval;
        let process = self.process.as_mut().ok_or(EngineError::NotReady(self.state))?;

        process.send(UciCommand::Position(position)).await?;
        process.send(UciCommand::Go(limits)).await?;

        let mut collector = SearchCollector::default();
        loop {
            let line = process.read_line(deadline, poll).await?;
            match collector.feed(protocol::decode(&line)) {
                None => continue,
                Some(SearchEnd::Move { uci, ponder, score }) => {
                    return Ok(SearchOutcome::BestMove(MoveResult {
                        best_move: uci,
                        ponder,
                        san: None,
                        score,
                    }))
                }
                Some(SearchEnd::NoMove) => return Ok(SearchOutcome::NoMoveAvailable),
                Some(SearchEnd::Error(msg)) => return Err(EngineError::Protocol(msg)),
            }
        }
    }

    /// A faulted engine is not trusted to honour `quit`; it is killed outright.
    async fn fault(&mut self, error: &EngineError) {
        warn!(
            engine = %self.command.label(),
            state = %self.state,
            error = %error,
            "Engine session faulted"
        );
        self.state = SessionState::Faulted;
        if let Some(process) = self.process.take() {
            process.kill(self.settings.kill_timeout).await;
        }
    }

    async fn release(&mut self) {
        if let Some(process) = self.process.take() {
            process.shutdown(&self.settings).await;
        }
    }

    /// Shut the engine down. Valid in any state, idempotent, never fails.
    pub async fn close(&mut self) {
        if self.state != SessionState::Closed {
            debug!(engine = %self.command.label(), state = %self.state, "Closing engine session");
        }
        self.release().await;
        self.state = SessionState::Closed;
    }
}

impl fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSession")
            .field("engine", &self.command.label())
            .field("state", &self.state)
            .field("engine_name", &self.engine_name)
            .finish()
    }
}
