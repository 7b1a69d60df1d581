use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Opaque credential issued by the external session/auth collaborator.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Errors raised while opening a channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The backend refused the credential during the handshake.
    #[error("handshake rejected: {reason}")]
    Rejected { reason: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("handshake timed out")]
    Timeout,

    /// The outbound buffer is full or the writer has gone away.
    #[error("outbound channel unavailable")]
    Unavailable,
}

impl TransportError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, TransportError::Rejected { .. })
    }
}

/// One unit read from the physical channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    Closed { reason: String },
    Failed { message: String },
}

/// The live half of one physical channel.
///
/// Dropping the handle aborts its pump tasks, which closes the channel.
pub struct ChannelHandle {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<TransportFrame>,
    tasks: Vec<JoinHandle<()>>,
}

/// Far end of an in-memory channel created by [`ChannelHandle::in_memory`].
pub struct PeerEnd {
    pub outbound_rx: mpsc::Receiver<String>,
    pub inbound_tx: mpsc::Sender<TransportFrame>,
}

impl PeerEnd {
    /// Push a text frame towards the client. Returns `false` once the
    /// client side has been dropped.
    pub async fn push_text(&self, frame: impl Into<String>) -> bool {
        self.inbound_tx
            .send(TransportFrame::Text(frame.into()))
            .await
            .is_ok()
    }
}

impl ChannelHandle {
    pub fn new(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<TransportFrame>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            tasks,
        }
    }

    /// Loopback channel with no pump tasks.
    pub fn in_memory(buffer: usize) -> (Self, PeerEnd) {
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer.max(1));
        (
            Self::new(outbound_tx, inbound_rx, Vec::new()),
            PeerEnd {
                outbound_rx,
                inbound_tx,
            },
        )
    }

    /// Queue one text frame without waiting.
    pub fn try_send(&self, frame: String) -> Result<(), TransportError> {
        self.outbound
            .try_send(frame)
            .map_err(|_| TransportError::Unavailable)
    }

    /// Next frame from the channel. A channel whose reader went away reports
    /// `Closed`.
    pub async fn recv(&mut self) -> TransportFrame {
        match self.inbound.recv().await {
            Some(frame) => frame,
            None => TransportFrame::Closed {
                reason: "channel closed".to_string(),
            },
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Opens physical channels for the connection manager.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, credentials: &Credentials) -> Result<ChannelHandle, TransportError>;
}
