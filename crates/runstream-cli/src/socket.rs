//! WebSocket transport for the session controller.
//!
//! Each connection gets a reader and a writer task bridging the socket to
//! the channels of a [`SocketConnection`]. Dropping the outgoing sender
//! closes the socket.

use futures::{SinkExt, StreamExt};
use runstream_core::{EngineError, ReadyState, Result, SocketConnection, SocketProvider};
use runstream_types::SessionId;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Opens `<base_url>/<run_id>` sockets.
#[derive(Debug, Clone)]
pub struct WsProvider {
    base_url: String,
}

impl WsProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn url_for(&self, run_id: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), run_id)
    }
}

impl SocketProvider for WsProvider {
    async fn connect(&mut self, session_id: SessionId, run_id: &str) -> Result<SocketConnection> {
        let url = self.url_for(run_id);
        debug!(target: "runstream::ws", session_id, url = %url, "Connecting");

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| EngineError::ConnectFailed(e.to_string()))?;
        info!(target: "runstream::ws", url = %url, "Socket open");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Open);
        let ready_tx = Arc::new(ready_tx);

        let writer_ready = ready_tx.clone();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(target: "runstream::ws", "Write failed: {}", e);
                    break;
                }
            }
            writer_ready.send_replace(ReadyState::Closing);
            if let Err(e) = sink.close().await {
                debug!(target: "runstream::ws", "Close handshake failed: {}", e);
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(reason)) => {
                        debug!(target: "runstream::ws", ?reason, "Close frame received");
                        break;
                    }
                    // Binary and control frames carry nothing for the run
                    Ok(_) => {}
                    Err(e) => {
                        warn!(target: "runstream::ws", "Read failed: {}", e);
                        break;
                    }
                }
            }
            ready_tx.send_replace(ReadyState::Closed);
        });

        Ok(SocketConnection {
            outgoing: out_tx,
            incoming: in_rx,
            ready: ready_rx,
        })
    }
}
