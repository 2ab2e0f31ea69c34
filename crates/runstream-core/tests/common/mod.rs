//! Common test utilities for integration tests.

#![allow(dead_code)]

use runstream_core::{
    ConnectionConfig, EngineError, ReadyState, Result, RunEvent, SessionController,
    SocketConnection, SocketProvider,
};
use runstream_types::{SessionId, TeamConfig};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Load a frame sequence fixture, one text frame per array element.
pub fn load_frames(name: &str) -> Vec<String> {
    let fixture_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("frames")
        .join(format!("{}.json", name));

    let content = std::fs::read_to_string(&fixture_path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {}: {}", fixture_path.display(), e));

    let frames: Vec<Value> = serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Failed to parse fixture {}: {}", fixture_path.display(), e));

    frames.iter().map(Value::to_string).collect()
}

/// Backend end of an in-memory socket.
pub struct ServerSide {
    pub session_id: SessionId,
    pub run_id: String,
    /// Frames to deliver to the client
    pub to_client: mpsc::UnboundedSender<String>,
    /// Frames the client wrote
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub ready: watch::Sender<ReadyState>,
}

impl ServerSide {
    pub fn push(&self, frame: &str) {
        self.to_client
            .send(frame.to_string())
            .expect("client dropped incoming channel");
    }

    /// Everything the client wrote so far, parsed.
    pub fn sent(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            out.push(serde_json::from_str(&text).expect("client sent invalid JSON"));
        }
        out
    }
}

/// Socket provider backed by channels. Each connect hands the backend end
/// to the test through `servers`.
pub struct MemoryProvider {
    initial: ReadyState,
    refuse: bool,
    servers: mpsc::UnboundedSender<ServerSide>,
}

impl SocketProvider for MemoryProvider {
    async fn connect(&mut self, session_id: SessionId, run_id: &str) -> Result<SocketConnection> {
        if self.refuse {
            return Err(EngineError::ConnectFailed("connection refused".to_string()));
        }
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(self.initial);
        let server = ServerSide {
            session_id,
            run_id: run_id.to_string(),
            to_client: in_tx,
            from_client: out_rx,
            ready: ready_tx,
        };
        self.servers
            .send(server)
            .map_err(|_| EngineError::ConnectFailed("test dropped server end".to_string()))?;
        Ok(SocketConnection {
            outgoing: out_tx,
            incoming: in_rx,
            ready: ready_rx,
        })
    }
}

pub fn memory_provider(initial: ReadyState) -> (MemoryProvider, mpsc::UnboundedReceiver<ServerSide>) {
    let (servers, rx) = mpsc::unbounded_channel();
    (
        MemoryProvider {
            initial,
            refuse: false,
            servers,
        },
        rx,
    )
}

pub fn refusing_provider() -> MemoryProvider {
    let (servers, _rx) = mpsc::unbounded_channel();
    MemoryProvider {
        initial: ReadyState::Closed,
        refuse: true,
        servers,
    }
}

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        heartbeat: Duration::from_secs(30),
        open_poll: Duration::from_millis(100),
        open_timeout: Duration::from_secs(2),
    }
}

/// Controller for session 1 over an in-memory provider.
pub fn test_controller(
    initial: ReadyState,
) -> (
    SessionController<MemoryProvider>,
    mpsc::UnboundedReceiver<RunEvent>,
    mpsc::UnboundedReceiver<ServerSide>,
) {
    let (provider, servers) = memory_provider(initial);
    let (controller, events) = SessionController::new(
        provider,
        test_config(),
        1,
        TeamConfig::default(),
        serde_json::json!({}),
    );
    (controller, events, servers)
}

/// Collect every event emitted so far.
pub fn drain_events(events: &mut mpsc::UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
