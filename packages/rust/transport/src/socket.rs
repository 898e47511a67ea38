//! Duplex socket seam.
//!
//! The session driver talks to a [`Socket`]: an outbound text channel and an
//! inbound event channel. [`Connector`] produces sockets; [`WsConnector`] is
//! the websocket implementation, other implementations back the tests.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use spacebook_shared::{Result, SpacebookError};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

/// Something the remote end did.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// One text frame.
    Frame(String),
    /// Connection closed or failed, with the reason.
    Closed(String),
}

/// One open duplex connection.
pub struct Socket {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<SocketEvent>,
    pump: Option<AbortHandle>,
}

impl Socket {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<SocketEvent>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            pump: None,
        }
    }

    /// Attach the task that moves frames; it is aborted on [`Socket::terminate`].
    pub fn with_pump(mut self, pump: AbortHandle) -> Self {
        self.pump = Some(pump);
        self
    }

    /// Queue a text frame. Returns `false` if the connection is gone.
    pub fn send(&self, text: String) -> bool {
        self.outbound.send(text).is_ok()
    }

    /// Next event; `None` means the remote side vanished without a reason.
    pub async fn recv(&mut self) -> Option<SocketEvent> {
        self.inbound.recv().await
    }

    /// Force the connection down.
    pub fn terminate(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.inbound.close();
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Opens duplex connections.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, uri: &str) -> impl Future<Output = Result<Socket>> + Send;
}

/// Websocket connector over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, uri: &str) -> Result<Socket> {
        let (ws, _response) = tokio_tungstenite::connect_async(uri)
            .await
            .map_err(|e| SpacebookError::transport(format!("connect {uri}: {e}")))?;
        debug!(uri, "websocket open");

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => match outgoing {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                let _ = in_tx.send(SocketEvent::Closed(format!("send failed: {e}")));
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    incoming = stream.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(SocketEvent::Frame(text)).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                                .unwrap_or_else(|| "closed by peer".into());
                            let _ = in_tx.send(SocketEvent::Closed(reason));
                            break;
                        }
                        Some(Ok(other)) => trace!(?other, "ignoring non-text message"),
                        Some(Err(e)) => {
                            let _ = in_tx.send(SocketEvent::Closed(format!("socket error: {e}")));
                            break;
                        }
                        None => {
                            let _ = in_tx.send(SocketEvent::Closed("stream ended".into()));
                            break;
                        }
                    }
                }
            }
        });

        Ok(Socket::new(out_tx, in_rx).with_pump(pump.abort_handle()))
    }
}
