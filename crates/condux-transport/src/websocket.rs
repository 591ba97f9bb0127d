use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{CloseReason, Socket, SocketDriver, Transport};

/// WebSocket transport.
///
/// Each `open` spawns a connection task on the current Tokio runtime. The
/// task reports `Open` once the handshake completes and pumps text frames
/// both ways until either side closes. Binary frames are ignored; ping/pong
/// is answered by tungstenite.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    /// Create a transport for `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WebSocketTransport {
    fn open(&self) -> Result<Socket> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| TransportError::Open {
            target: self.url.clone(),
            reason: err.to_string(),
        })?;

        let (socket, driver) = Socket::channel();
        runtime.spawn(run_connection(self.url.clone(), driver));
        Ok(socket)
    }

    fn transport_name(&self) -> &'static str {
        "websocket"
    }
}

async fn run_connection(url: String, mut driver: SocketDriver) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            warn!(%url, error = %err, "websocket connect failed");
            driver.emit_close(CloseReason::new(format!("connect failed: {err}")));
            return;
        }
    };

    info!(%url, "websocket connected");
    driver.emit_open();

    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            outbound = driver.recv_outbound() => match outbound {
                Some(text) => {
                    if let Err(err) = sink.send(Message::Text(text.into())).await {
                        driver.emit_close(CloseReason::new(format!("send failed: {err}")));
                        break;
                    }
                }
                None => {
                    debug!(%url, "socket released by client; closing websocket");
                    let _ = sink.close().await;
                    break;
                }
            },
            inbound = source.next() => match inbound {
                Some(Ok(Message::Text(text))) => driver.emit_message(text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(frame) => CloseReason::with_code(frame.reason.as_str(), u16::from(frame.code)),
                        None => CloseReason::new("server closed connection"),
                    };
                    driver.emit_close(reason);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    driver.emit_close(CloseReason::new(format!("websocket error: {err}")));
                    break;
                }
                None => {
                    driver.emit_close(CloseReason::new("websocket stream ended"));
                    break;
                }
            },
        }
    }
}
