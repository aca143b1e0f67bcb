//! The single shared websocket connection.
//!
//! DESIGN
//! ======
//! Exactly one connection exists per client process. It is created once at
//! startup and handed out by cloning the [`ConnectionManager`] handle;
//! nothing else may open or close the underlying socket. A recurring defect
//! in earlier revisions of this app was a socket per UI region, which
//! caused duplicate event delivery and leaked connections.
//!
//! A background task owns the socket and drives a reconnect loop: bounded
//! exponential backoff (doubling from 1 s to a 10 s cap), a capped number
//! of consecutive failures, then a terminal `Failed` state until
//! [`ConnectionManager::reconnect`] is called. A connection that drops
//! after opening also waits the base delay before redialing. Anything queued for send
//! while the socket was dying is abandoned, never replayed — higher layers
//! re-emit what still matters (the membership tracker replays its join).
//!
//! LIFECYCLE
//! =========
//! Connecting → Open → Closed → (backoff) → Connecting → ... → Failed
//! `close()` is the only path that releases the socket for good.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use protocol::{ClientMessage, ServerMessage};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{info, warn};

const OUTBOUND_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 256;

pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection is not open")]
    NotConnected,
    #[error("connection task has shut down")]
    Terminated,
}

/// Liveness of the shared connection, observable by every module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
    /// Retry budget exhausted; stays here until `reconnect()` is called.
    Failed,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Websocket endpoint, e.g. `ws://127.0.0.1:3000/ws`.
    pub url: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive connect failures tolerated before giving up.
    pub max_attempts: u32,
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

enum Control {
    Reconnect,
    Shutdown,
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable capability handle to the one shared connection.
#[derive(Clone)]
pub struct ConnectionManager {
    outbound: mpsc::Sender<ClientMessage>,
    inbound: broadcast::Sender<ServerMessage>,
    status_rx: watch::Receiver<ConnectionStatus>,
    control: mpsc::Sender<Control>,
}

impl ConnectionManager {
    /// Open the connection and spawn its background task. Call once per
    /// process; share the returned handle by cloning.
    #[must_use]
    pub fn connect(config: ConnectionConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (inbound_tx, _) = broadcast::channel(INBOUND_BUFFER);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (control_tx, control_rx) = mpsc::channel(4);

        tokio::spawn(run_connection(config, outbound_rx, inbound_tx.clone(), status_tx, control_rx));

        Self { outbound: outbound_tx, inbound: inbound_tx, status_rx, control: control_tx }
    }

    /// Current liveness state.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Watch liveness transitions (reconnects, failures).
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Subscribe to every inbound server message.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.inbound.subscribe()
    }

    /// Send one message over the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] while the socket is down.
    /// Callers decide what is worth re-emitting after the reconnect, the
    /// connection never queues across a drop.
    pub async fn send(&self, message: ClientMessage) -> Result<(), ConnectionError> {
        if self.status() != ConnectionStatus::Open {
            return Err(ConnectionError::NotConnected);
        }
        self.outbound
            .send(message)
            .await
            .map_err(|_| ConnectionError::Terminated)
    }

    /// Leave the `Failed` state and try connecting again.
    pub async fn reconnect(&self) {
        let _ = self.control.send(Control::Reconnect).await;
    }

    /// Tear the connection down for good, releasing the socket.
    pub async fn close(&self) {
        let _ = self.control.send(Control::Shutdown).await;
    }
}

// =============================================================================
// BACKGROUND TASK
// =============================================================================

async fn run_connection(
    config: ConnectionConfig,
    mut outbound_rx: mpsc::Receiver<ClientMessage>,
    inbound: broadcast::Sender<ServerMessage>,
    status_tx: watch::Sender<ConnectionStatus>,
    mut control_rx: mpsc::Receiver<Control>,
) {
    let mut backoff = config.initial_backoff;
    let mut attempts: u32 = 0;

    loop {
        let _ = status_tx.send(ConnectionStatus::Connecting);

        match connect_async(config.url.as_str()).await {
            Ok((stream, _)) => {
                attempts = 0;
                backoff = config.initial_backoff;
                info!(url = %config.url, "ws: connected");
                let _ = status_tx.send(ConnectionStatus::Open);

                let shutdown =
                    drive_socket(stream, &mut outbound_rx, &inbound, &mut control_rx).await;

                let _ = status_tx.send(ConnectionStatus::Closed);

                // Anything still queued was in flight when the socket died;
                // abandon it rather than replaying into the next session.
                while outbound_rx.try_recv().is_ok() {}

                if shutdown {
                    return;
                }

                // Wait out the base delay before redialing so a server that
                // accepts and immediately drops cannot induce a tight loop.
                info!(delay = ?backoff, "ws: connection lost, reconnecting");
                tokio::select! {
                    () = tokio::time::sleep(backoff) => {}
                    cmd = control_rx.recv() => match cmd {
                        Some(Control::Reconnect) => {}
                        Some(Control::Shutdown) | None => return,
                    },
                }
            }
            Err(e) => {
                attempts += 1;
                warn!(error = %e, attempts, "ws: connect failed");

                if attempts >= config.max_attempts {
                    let _ = status_tx.send(ConnectionStatus::Failed);
                    match wait_for_reconnect(&mut control_rx).await {
                        WaitOutcome::Retry => {
                            attempts = 0;
                            backoff = config.initial_backoff;
                            continue;
                        }
                        WaitOutcome::Shutdown => return,
                    }
                }

                tokio::select! {
                    () = tokio::time::sleep(backoff) => {}
                    cmd = control_rx.recv() => match cmd {
                        Some(Control::Reconnect) => {}
                        Some(Control::Shutdown) | None => return,
                    },
                }
                backoff = (backoff * 2).min(config.max_backoff);
            }
        }
    }
}

enum WaitOutcome {
    Retry,
    Shutdown,
}

async fn wait_for_reconnect(control_rx: &mut mpsc::Receiver<Control>) -> WaitOutcome {
    loop {
        match control_rx.recv().await {
            Some(Control::Reconnect) => return WaitOutcome::Retry,
            Some(Control::Shutdown) | None => return WaitOutcome::Shutdown,
        }
    }
}

/// Pump one live socket until it drops. Returns true if shutdown was
/// requested (the socket is closed cleanly and the task must exit).
async fn drive_socket(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound_rx: &mut mpsc::Receiver<ClientMessage>,
    inbound: &broadcast::Sender<ServerMessage>,
    control_rx: &mut mpsc::Receiver<Control>,
) -> bool {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            msg = source.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match ServerMessage::decode(text.as_str()) {
                        Ok(message) => {
                            // Lagging or absent subscribers are their own problem.
                            let _ = inbound.send(message);
                        }
                        Err(e) => warn!(error = %e, "ws: undecodable inbound message"),
                    },
                    Some(Ok(Message::Close(_))) | None => return false,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "ws: read error");
                        return false;
                    }
                }
            }
            Some(message) = outbound_rx.recv() => {
                if sink.send(Message::Text(message.encode().into())).await.is_err() {
                    return false;
                }
            }
            cmd = control_rx.recv() => match cmd {
                Some(Control::Shutdown) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return true;
                }
                // Forced reconnect: drop this socket and dial fresh.
                Some(Control::Reconnect) => return false,
            },
        }
    }
}

// =============================================================================
// TEST SUPPORT
// =============================================================================


#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
