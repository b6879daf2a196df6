//! Channel Transport
//!
//! The [`Connector`] seam opens a text-message connection; the production
//! implementation speaks WebSocket through tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, SyncError};

/// Path the push channel is served under.
pub const CHANNEL_PATH: &str = "/ws";

// == Connection ==
/// An open text-message connection.
///
/// Dropping `outbound` closes the connection; `inbound` yields `None` once the
/// peer is gone.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

// == Connector Trait ==
/// Opens connections to the push channel.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Connection>;
}

// == WebSocket Connector ==
/// Production connector over WebSocket.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Connection> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| SyncError::Channel(format!("connect to {url} failed: {e}")))?;
        let (mut sink, mut stream) = socket.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<String>();

        // Writer: forwards outbound text until the client drops its sender
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(err) = sink.send(Message::Text(text)).await {
                    warn!(error = %err, "WebSocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: forwards inbound text until the socket or the client goes away
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "WebSocket closed by peer");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "WebSocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(Connection { outbound, inbound })
    }
}

// == URL Derivation ==
/// Derives the channel URL from the page origin: `https` becomes `wss`,
/// `http` becomes `ws`, and the path is fixed to [`CHANNEL_PATH`].
pub fn channel_url(origin: &str) -> Result<String> {
    let mut url = Url::parse(origin)
        .map_err(|e| SyncError::InvalidRequest(format!("invalid origin {origin:?}: {e}")))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(SyncError::InvalidRequest(format!(
                "unsupported origin scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| SyncError::InvalidRequest(format!("cannot use scheme {scheme}")))?;
    url.set_path(CHANNEL_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}
