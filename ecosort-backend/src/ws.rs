//! WebSocket push channel to the backend's frontend stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};

use ecosort_core::{
    model::{Endpoint, PushMessage},
    ports::{PortError, PushConnection, PushPort},
    source::{DEFAULT_CONNECT_TIMEOUT, PUSH_PATH},
};

/// Opens the backend's `/ws/frontend` stream.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketPush {
    handshake_timeout: Duration,
}

impl WebSocketPush {
    /// Create a push port with the default handshake bound.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handshake_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the bound on TCP connect plus upgrade.
    #[must_use]
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }
}

impl Default for WebSocketPush {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushPort for WebSocketPush {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn PushConnection>, PortError> {
        let url = endpoint.ws_url(PUSH_PATH);
        let (stream, _response) = timeout(self.handshake_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_elapsed| PortError::Timeout(self.handshake_timeout.as_millis()))?
            .map_err(|err| PortError::Channel(err.to_string()))?;
        debug!(%url, "push handshake complete");

        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WebSocketConnection {
    async fn next_message(&mut self) -> Option<Result<PushMessage, PortError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(err) => {
                    // transport failures end the connection; the feed decides whether to reconnect
                    warn!(error = %err, "push channel read failed");
                    return None;
                }
            };

            match message {
                Message::Text(text) => {
                    return Some(serde_json::from_str(&text).map_err(PortError::from));
                }
                Message::Binary(bytes) => {
                    return Some(serde_json::from_slice(&bytes).map_err(PortError::from));
                }
                Message::Close(frame) => {
                    debug!(?frame, "push channel closed by backend");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("control frame on push channel");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::SinkExt;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::accept_async;

    use super::*;

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("local addr").port()
    }

    #[tokio::test]
    async fn yields_decoded_messages_until_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let server = tokio::spawn(async move {
            let (socket, _peer) = listener.accept().await.expect("accept");
            let mut ws = accept_async(socket).await.expect("handshake");
            for message in [
                Message::text(
                    r#"{"type":"update","frame":"AAAA","detections":[{"class":"plastic","confidence":0.77}]}"#,
                ),
                Message::text("not json"),
                Message::Ping(Vec::new()),
                Message::text(r#"{"type":"status"}"#),
            ] {
                ws.send(message).await.expect("send");
            }
            ws.close(None).await.expect("close");
        });

        let mut connection = WebSocketPush::new()
            .connect(&Endpoint::new("127.0.0.1", port))
            .await
            .expect("connected");

        let update = connection
            .next_message()
            .await
            .expect("first message")
            .expect("decodes");
        assert!(update.is_update(), "first message is an update");
        assert_eq!(update.frame.as_deref(), Some("AAAA"), "frame carried");
        assert_eq!(update.detections.len(), 1, "one detection");

        let garbled = connection.next_message().await.expect("second message");
        assert!(
            matches!(garbled, Err(PortError::Decode(_))),
            "non-JSON text is a decode error"
        );

        let status = connection
            .next_message()
            .await
            .expect("third message")
            .expect("decodes");
        assert!(!status.is_update(), "ping skipped, status message next");
        assert!(status.detections.is_empty(), "status carries no detections");

        assert!(
            connection.next_message().await.is_none(),
            "close frame ends the connection"
        );
        server.await.expect("server");
    }

    #[tokio::test]
    async fn refused_handshake_is_a_channel_error() {
        let port = unused_port().await;

        let result = WebSocketPush::new()
            .connect(&Endpoint::new("127.0.0.1", port))
            .await;
        assert!(
            matches!(result, Err(PortError::Channel(_))),
            "refused TCP connect is a channel error"
        );
    }

    #[tokio::test]
    async fn unanswered_upgrade_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let (release, held) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            // accept the socket but never answer the upgrade request
            let (_socket, _peer) = listener.accept().await.expect("accept");
            held.await.ok();
        });

        let result = WebSocketPush::new()
            .with_handshake_timeout(Duration::from_millis(200))
            .connect(&Endpoint::new("127.0.0.1", port))
            .await;
        assert!(
            matches!(result, Err(PortError::Timeout(200))),
            "a silent server ends the handshake at its bound"
        );

        drop(release);
        server.await.expect("server");
    }
}
