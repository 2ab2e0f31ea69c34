//! Connection session controller.
//!
//! Owns the [`Run`] of one session activation and the socket it talks over.
//! The run id is minted once when the controller is created and reused for
//! every socket it opens, so reconnects continue the same run.
//!
//! Architecture:
//! - A [`SocketProvider`] opens sockets; the controller only sees channels
//! - Inbound text frames are applied to the run, effects become [`RunEvent`]s
//! - A heartbeat task writes pings to the outgoing channel while the socket is open
//! - [`SessionController::run_loop`] selects over user commands and inbound frames

use crate::run::{Run, RunEffect};
use crate::{EngineError, Result};
use chrono::Utc;
use runstream_types::{
    InboundFrame, InputRequest, Message, OutboundFrame, PlanStep, ReportedStatus, RunStatus,
    SessionId, TeamConfig,
};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Socket state as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Channels of one open socket.
#[derive(Debug)]
pub struct SocketConnection {
    /// Text frames to write
    pub outgoing: mpsc::UnboundedSender<String>,
    /// Text frames read; ends when the socket closes
    pub incoming: mpsc::UnboundedReceiver<String>,
    pub ready: watch::Receiver<ReadyState>,
}

/// Opens sockets for a session's run.
pub trait SocketProvider: Send {
    fn connect(
        &mut self,
        session_id: SessionId,
        run_id: &str,
    ) -> impl Future<Output = Result<SocketConnection>> + Send;
}

/// Mint a run id: `session_<session>_<unix-ms>_<9 base36 chars>`.
pub fn mint_run_id(session_id: SessionId) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut n = Uuid::new_v4().as_u128();
    let suffix: String = (0..9)
        .map(|_| {
            let c = ALPHABET[(n % 36) as usize] as char;
            n /= 36;
            c
        })
        .collect();
    format!(
        "session_{}_{}_{}",
        session_id,
        Utc::now().timestamp_millis(),
        suffix
    )
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Interval between heartbeat pings
    pub heartbeat: Duration,
    /// Ready-state poll interval while waiting for the socket to open
    pub open_poll: Duration,
    /// Give up waiting for the socket to open after this long
    pub open_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            open_poll: Duration::from_millis(100),
            open_timeout: Duration::from_secs(10),
        }
    }
}

/// Notifications for observers of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Appended { index: usize, message: Message },
    Merged { index: usize, message: Message },
    StatusChanged(ReportedStatus),
    InputRequested(InputRequest),
    VisibilityChanged { hidden: Vec<usize> },
    PanelChanged(crate::SidePanel),
    /// A transport failure; the run status is unchanged
    LocalError(String),
    SocketClosed,
}

/// User actions accepted by the controller loop.
#[derive(Debug, Clone)]
pub enum Command {
    Start {
        query: String,
        files: Vec<Value>,
        plan: Option<Vec<PlanStep>>,
    },
    /// Answer a pending request or start a new task, depending on status
    Submit {
        query: String,
        files: Vec<Value>,
        accepted: bool,
        plan: Option<Vec<PlanStep>>,
    },
    Respond {
        content: String,
        accepted: bool,
        plan: Option<Vec<PlanStep>>,
    },
    Approve,
    Deny,
    AcceptPlan(String),
    RegeneratePlan,
    SavePlanEdits(Vec<PlanStep>),
    ExecutePlan {
        task: String,
        steps: Vec<PlanStep>,
    },
    Cancel,
    Pause,
    ToggleVisibility {
        index: usize,
        expand: bool,
    },
    Reconnect,
    Close,
    /// Close the socket and stop the loop
    Shutdown,
}

struct ActiveSocket {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<String>,
    ready: watch::Receiver<ReadyState>,
    heartbeat: JoinHandle<()>,
}

impl ActiveSocket {
    fn state(&self) -> ReadyState {
        *self.ready.borrow()
    }
}

fn spawn_heartbeat(
    outgoing: mpsc::UnboundedSender<String>,
    ready: watch::Receiver<ReadyState>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let state = *ready.borrow();
            match state {
                ReadyState::Open => {}
                ReadyState::Connecting => continue,
                ReadyState::Closing | ReadyState::Closed => break,
            }
            let Ok(ping) = OutboundFrame::Ping.to_json() else {
                break;
            };
            if outgoing.send(ping).is_err() {
                break;
            }
            trace!(target: "runstream::ws::ping", "Sent ping");
        }
        debug!(target: "runstream::ws::ping", "Heartbeat stopped");
    })
}

async fn recv_incoming(socket: &mut Option<ActiveSocket>) -> Option<String> {
    match socket {
        Some(active) => active.incoming.recv().await,
        None => std::future::pending().await,
    }
}

pub struct SessionController<P: SocketProvider> {
    provider: P,
    config: ConnectionConfig,
    run: Run,
    settings: Value,
    socket: Option<ActiveSocket>,
    events: mpsc::UnboundedSender<RunEvent>,
    local_error: Option<String>,
}

impl<P: SocketProvider> SessionController<P> {
    /// Create a controller for one session activation, minting its run id.
    pub fn new(
        provider: P,
        config: ConnectionConfig,
        session_id: SessionId,
        team_config: TeamConfig,
        settings: Value,
    ) -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let run = Run::new(session_id, mint_run_id(session_id), team_config);
        Self::with_run(provider, config, run, settings)
    }

    /// Create a controller around an existing (e.g. restored) run.
    pub fn with_run(
        provider: P,
        config: ConnectionConfig,
        run: Run,
        settings: Value,
    ) -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        info!(target: "runstream::ws", run_id = %run.id(), "Session activated");
        (
            Self {
                provider,
                config,
                run,
                settings,
                socket: None,
                events,
                local_error: None,
            },
            rx,
        )
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn run_id(&self) -> &str {
        self.run.id()
    }

    pub fn local_error(&self) -> Option<&str> {
        self.local_error.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn emit(&self, event: RunEvent) {
        if self.events.send(event).is_err() {
            trace!(target: "runstream::ws", "No observer for run event");
        }
    }

    /// Record a transport failure and hand it back.
    fn fail<T>(&mut self, err: EngineError) -> Result<T> {
        warn!(target: "runstream::ws", run_id = %self.run.id(), "{}", err);
        self.local_error = Some(err.to_string());
        self.emit(RunEvent::LocalError(err.to_string()));
        Err(err)
    }

    fn flush_status(&mut self) {
        if let Some(status) = self.run.take_status_change() {
            self.emit(RunEvent::StatusChanged(status));
        }
    }

    // ==================== Socket lifecycle ====================

    /// Open a socket unless one is already active.
    pub async fn connect(&mut self) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        let session_id = self.run.session_id();
        let run_id = self.run.id().to_string();
        let conn = match self.provider.connect(session_id, &run_id).await {
            Ok(conn) => conn,
            Err(EngineError::ConnectFailed(msg)) => return self.fail(EngineError::ConnectFailed(msg)),
            Err(e) => return self.fail(EngineError::ConnectFailed(e.to_string())),
        };
        let heartbeat = spawn_heartbeat(
            conn.outgoing.clone(),
            conn.ready.clone(),
            self.config.heartbeat,
        );
        self.socket = Some(ActiveSocket {
            outgoing: conn.outgoing,
            incoming: conn.incoming,
            ready: conn.ready,
            heartbeat,
        });
        info!(target: "runstream::ws", run_id = %run_id, "WebSocket connection established");
        Ok(())
    }

    /// Drop the current socket and open a new one for the same run.
    pub async fn reconnect(&mut self) -> Result<()> {
        debug!(target: "runstream::ws", run_id = %self.run.id(), "Reconnecting");
        self.close();
        self.connect().await
    }

    /// Cancel the heartbeat and clear the active socket. Safe to call
    /// repeatedly.
    pub fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.heartbeat.abort();
            info!(target: "runstream::ws", run_id = %self.run.id(), "WebSocket connection closed");
            self.emit(RunEvent::SocketClosed);
        }
    }

    /// Poll the ready state until the socket is open.
    pub async fn wait_until_open(&mut self) -> Result<()> {
        let Some(socket) = self.socket.as_ref() else {
            return self.fail(EngineError::SocketUnavailable);
        };
        let poll = self.config.open_poll;
        let ready = socket.ready.clone();
        let waited = tokio::time::timeout(self.config.open_timeout, async move {
            loop {
                match *ready.borrow() {
                    ReadyState::Open => return Ok(()),
                    ReadyState::Closing | ReadyState::Closed => {
                        return Err(EngineError::SocketClosedBeforeOpen);
                    }
                    ReadyState::Connecting => {}
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await;

        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => self.fail(e),
            Err(_) => self.fail(EngineError::OpenTimeout),
        }
    }

    /// Connect if needed and wait for the socket to open.
    async fn ensure_open(&mut self) -> Result<()> {
        self.connect().await?;
        self.wait_until_open().await
    }

    /// Fail fast unless a socket is active and open.
    fn require_open(&mut self) -> Result<()> {
        match self.socket.as_ref().map(ActiveSocket::state) {
            None => self.fail(EngineError::SocketUnavailable),
            Some(ReadyState::Open) => Ok(()),
            Some(_) => self.fail(EngineError::SocketNotOpen),
        }
    }

    /// Check the socket before an answer changes run state. Outside
    /// `awaiting_input` answers are no-ops.
    fn require_open_to_answer(&mut self) -> Result<()> {
        if self.run.is_awaiting_input() {
            self.require_open()?;
        }
        Ok(())
    }

    /// Write a frame to the active socket.
    pub fn send(&mut self, frame: &OutboundFrame) -> Result<()> {
        self.require_open()?;
        let json = frame.to_json()?;
        let sent = self
            .socket
            .as_ref()
            .map(|socket| socket.outgoing.send(json).is_ok())
            .unwrap_or(false);
        if !sent {
            return self.fail(EngineError::ChannelSend);
        }
        debug!(target: "runstream::ws", kind = frame.kind(), "Sent frame");
        Ok(())
    }

    // ==================== Inbound ====================

    /// Apply one inbound text frame.
    pub fn handle_incoming(&mut self, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: "runstream::ws", "Dropping malformed frame: {}", e);
                return;
            }
        };
        if frame.is_pong() {
            trace!(target: "runstream::ws::ping", "Received pong");
            return;
        }
        let effects = self.run.handle_frame(frame);
        self.apply_effects(effects);
    }

    fn apply_effects(&mut self, effects: Vec<RunEffect>) {
        for effect in effects {
            match effect {
                RunEffect::Appended { index } => {
                    if let Some(message) = self.run.messages().get(index) {
                        self.emit(RunEvent::Appended {
                            index,
                            message: message.clone(),
                        });
                    }
                }
                RunEffect::Merged { index } => {
                    if let Some(message) = self.run.messages().get(index) {
                        self.emit(RunEvent::Merged {
                            index,
                            message: message.clone(),
                        });
                    }
                }
                RunEffect::StatusChanged(status) => self.emit(RunEvent::StatusChanged(status)),
                RunEffect::InputRequested(request) => self.emit(RunEvent::InputRequested(request)),
                RunEffect::VisibilityChanged => self.emit_visibility(),
                RunEffect::PanelChanged => self.emit(RunEvent::PanelChanged(self.run.panel().clone())),
                RunEffect::CloseSocket => self.close(),
            }
        }
    }

    fn emit_visibility(&self) {
        let hidden = self.run.visibility().hidden().iter().copied().collect();
        self.emit(RunEvent::VisibilityChanged { hidden });
    }

    fn emit_appended_since(&self, before: usize) {
        for (index, message) in self.run.messages().iter().enumerate().skip(before) {
            self.emit(RunEvent::Appended {
                index,
                message: message.clone(),
            });
        }
    }

    // ==================== Commands ====================

    pub async fn start(
        &mut self,
        query: &str,
        files: Vec<Value>,
        plan: Option<&[PlanStep]>,
    ) -> Result<()> {
        let before = self.run.messages().len();
        let frame = self
            .run
            .start_task(query, files, plan, self.settings.clone())?;
        self.emit_appended_since(before);
        self.ensure_open().await?;
        self.send(&frame)?;
        self.local_error = None;
        Ok(())
    }

    pub async fn handle_command(&mut self, command: Command) -> Result<()> {
        let result = self.dispatch(command).await;
        self.flush_status();
        result
    }

    async fn dispatch(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Start { query, files, plan } => {
                self.start(&query, files, plan.as_deref()).await
            }
            Command::Submit {
                query,
                files,
                accepted,
                plan,
            } => {
                let answering = matches!(
                    self.run.reported_status(),
                    ReportedStatus::Stored(RunStatus::AwaitingInput | RunStatus::Paused)
                        | ReportedStatus::FinalAnswerAwaitingInput
                );
                if answering {
                    self.require_open()?;
                    let frame = self.run.respond(&query, accepted, plan.as_deref())?;
                    self.send(&frame)
                } else {
                    self.start(&query, files, plan.as_deref()).await
                }
            }
            Command::Respond {
                content,
                accepted,
                plan,
            } => {
                self.require_open()?;
                let frame = self.run.respond(&content, accepted, plan.as_deref())?;
                self.send(&frame)
            }
            Command::Approve => {
                self.require_open_to_answer()?;
                let frame = self.run.approve()?;
                self.send_some(frame)
            }
            Command::Deny => {
                self.require_open_to_answer()?;
                let frame = self.run.deny()?;
                self.send_some(frame)
            }
            Command::AcceptPlan(text) => {
                self.require_open_to_answer()?;
                let frame = self.run.accept_plan(&text)?;
                self.send_some(frame)
            }
            Command::RegeneratePlan => {
                self.require_open()?;
                let frame = self.run.regenerate_plan()?;
                self.send(&frame)
            }
            Command::SavePlanEdits(steps) => {
                self.run.save_plan_edits(steps);
                Ok(())
            }
            Command::ExecutePlan { task, steps } => {
                let open = self
                    .socket
                    .as_ref()
                    .is_some_and(|s| s.state() == ReadyState::Open);
                if !open {
                    self.reconnect().await?;
                }
                self.wait_until_open().await?;
                let frame = self.run.execute_plan(&task, steps, self.settings.clone());
                self.send(&frame)
            }
            Command::Cancel => {
                if self.socket.is_none() || !self.run.accepts_control() {
                    return Ok(());
                }
                self.require_open()?;
                let frame = self.run.cancel();
                self.send_some(frame)
            }
            Command::Pause => {
                if self.socket.is_none() || !self.run.accepts_control() {
                    return Ok(());
                }
                self.require_open()?;
                let frame = self.run.pause();
                self.send_some(frame)
            }
            Command::ToggleVisibility { index, expand } => {
                if self.run.toggle_visibility(index, expand) {
                    self.emit_visibility();
                }
                Ok(())
            }
            Command::Reconnect => self.reconnect().await,
            Command::Close | Command::Shutdown => {
                self.close();
                Ok(())
            }
        }
    }

    fn send_some(&mut self, frame: Option<OutboundFrame>) -> Result<()> {
        match frame {
            Some(frame) => self.send(&frame),
            None => Ok(()),
        }
    }

    // ==================== Event loop ====================

    /// Drive the controller until shutdown or until every handle is dropped.
    pub async fn run_loop(mut self, mut commands: mpsc::Receiver<Envelope>) {
        loop {
            tokio::select! {
                envelope = commands.recv() => {
                    let Some(Envelope { command, reply }) = envelope else {
                        self.close();
                        break;
                    };
                    let shutdown = matches!(command, Command::Shutdown);
                    let result = self.handle_command(command).await;
                    // Caller may have stopped waiting
                    let _ = reply.send(result);
                    if shutdown {
                        break;
                    }
                }
                text = recv_incoming(&mut self.socket) => {
                    match text {
                        Some(text) => self.handle_incoming(&text),
                        None => {
                            debug!(target: "runstream::ws", "Socket stream ended");
                            self.close();
                        }
                    }
                    self.flush_status();
                }
            }
        }
        info!(target: "runstream::ws", run_id = %self.run.id(), "Controller stopped");
    }

    /// Spawn the event loop, returning a handle to drive it.
    pub fn spawn(self) -> (ControllerHandle, JoinHandle<()>)
    where
        P: 'static,
    {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(self.run_loop(rx));
        (ControllerHandle { tx }, task)
    }
}

/// A command with its reply channel.
pub struct Envelope {
    command: Command,
    reply: oneshot::Sender<Result<()>>,
}

/// Cloneable handle to a running controller loop.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Envelope>,
}

impl ControllerHandle {
    /// Send a command and wait for its outcome.
    pub async fn send(&self, command: Command) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { command, reply })
            .await
            .map_err(|_| EngineError::ChannelSend)?;
        rx.await.map_err(|_| EngineError::ChannelSend)?
    }

    pub async fn start(&self, query: impl Into<String>) -> Result<()> {
        self.send(Command::Start {
            query: query.into(),
            files: Vec::new(),
            plan: None,
        })
        .await
    }

    pub async fn submit(&self, query: impl Into<String>, accepted: bool) -> Result<()> {
        self.send(Command::Submit {
            query: query.into(),
            files: Vec::new(),
            accepted,
            plan: None,
        })
        .await
    }

    pub async fn approve(&self) -> Result<()> {
        self.send(Command::Approve).await
    }

    pub async fn deny(&self) -> Result<()> {
        self.send(Command::Deny).await
    }

    pub async fn cancel(&self) -> Result<()> {
        self.send(Command::Cancel).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Pause).await
    }

    pub async fn reconnect(&self) -> Result<()> {
        self.send(Command::Reconnect).await
    }

    pub async fn close(&self) -> Result<()> {
        self.send(Command::Close).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_format() {
        let id = mint_run_id(42);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "session");
        assert_eq!(parts[1], "42");
        assert!(parts[2].parse::<i64>().is_ok());
        assert_eq!(parts[3].len(), 9);
        assert!(parts[3].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_run_ids_differ() {
        assert_ne!(mint_run_id(1), mint_run_id(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_while_open() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Open);
        let heartbeat = spawn_heartbeat(tx, ready_rx, Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().unwrap(), r#"{"type":"ping"}"#);

        ready_tx.send(ReadyState::Closed).unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(rx.try_recv().is_err());
        assert!(heartbeat.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_waits_while_connecting() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Connecting);
        let _heartbeat = spawn_heartbeat(tx, ready_rx, Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(rx.try_recv().is_err());

        ready_tx.send(ReadyState::Open).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_ok());
    }
}
