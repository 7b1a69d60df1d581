//! WebSocket implementation of [`Connector`].

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

use super::transport::{ChannelHandle, Connector, Credentials, TransportError, TransportFrame};

/// Opens JSON text channels over a websocket, authenticating with a bearer
/// token on the upgrade request.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    buffer: usize,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, buffer: usize) -> Self {
        Self {
            url: url.into(),
            buffer: buffer.max(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, credentials: &Credentials) -> Result<ChannelHandle, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|error| TransportError::network(error.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credentials.token()))
            .map_err(|_| TransportError::rejected("credential is not a valid header value"))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, response) = connect_async(request)
            .await
            .map_err(classify_handshake_error)?;
        debug!(url = %self.url, status = %response.status(), "websocket handshake complete");

        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(self.buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportFrame>(self.buffer);

        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(error) = write.send(Message::Text(text)).await {
                    warn!(%error, "websocket write failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let next = match frame {
                    Ok(Message::Text(text)) => TransportFrame::Text(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => TransportFrame::Text(text),
                        Err(_) => {
                            debug!("dropping non-utf8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(close)) => {
                        let reason = close
                            .map(|frame| frame.reason.to_string())
                            .filter(|reason| !reason.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        let _ = inbound_tx.send(TransportFrame::Closed { reason }).await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(error) => {
                        let _ = inbound_tx
                            .send(TransportFrame::Failed {
                                message: error.to_string(),
                            })
                            .await;
                        return;
                    }
                };
                if inbound_tx.send(next).await.is_err() {
                    return;
                }
            }
            let _ = inbound_tx
                .send(TransportFrame::Closed {
                    reason: "stream ended".to_string(),
                })
                .await;
        });

        Ok(ChannelHandle::new(
            outbound_tx,
            inbound_rx,
            vec![writer, reader],
        ))
    }
}

/// Map a failed upgrade to a transport error; 401/403 are credential
/// rejections.
fn classify_handshake_error(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            match status {
                401 | 403 => TransportError::rejected(format!("HTTP {status}")),
                _ => TransportError::network(format!("HTTP {status} during handshake")),
            }
        }
        other => TransportError::network(other.to_string()),
    }
}
