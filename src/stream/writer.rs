use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::CanonicalError;

/// Tracks whether the downstream HTTP client is still connected. Backed by
/// an mpsc sender to the axum response body: a failed send means the
/// receiver (and so the client's connection) is gone.
#[derive(Clone)]
pub struct ConnectionState {
    disconnected: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl ConnectionState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            disconnected: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn mark_disconnected(&self) {
        self.disconnected.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes framed bytes to the downstream chunked HTTP response.
#[async_trait::async_trait]
pub trait Writer: Send {
    async fn write(&mut self, bytes: Bytes) -> Result<(), CanonicalError>;
    async fn flush(&mut self) -> Result<(), CanonicalError>;
    async fn close(&mut self);
}

/// Writer over an axum streaming body channel. Emits a terminal
/// `data: [DONE]\n\n` on close iff `send_done` is set (OpenAI/Anthropic:
/// yes; Gemini: no, for SDK compatibility).
pub struct ChunkedWriter {
    sender: mpsc::Sender<Result<Bytes, std::io::Error>>,
    connection: ConnectionState,
    send_done: bool,
    closed: bool,
}

impl ChunkedWriter {
    #[must_use]
    pub fn new(sender: mpsc::Sender<Result<Bytes, std::io::Error>>, connection: ConnectionState, send_done: bool) -> Self {
        Self {
            sender,
            connection,
            send_done,
            closed: false,
        }
    }
}

#[async_trait::async_trait]
impl Writer for ChunkedWriter {
    async fn write(&mut self, bytes: Bytes) -> Result<(), CanonicalError> {
        if bytes.is_empty() {
            return Ok(());
        }
        match self.sender.send(Ok(bytes)).await {
            Ok(()) => Ok(()),
            Err(_) => {
                self.connection.mark_disconnected();
                Err(CanonicalError::Transport("client disconnected".to_string()))
            }
        }
    }

    async fn flush(&mut self) -> Result<(), CanonicalError> {
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed || self.connection.is_disconnected() {
            self.closed = true;
            return;
        }
        self.closed = true;
        if self.send_done {
            let _ = self.sender.send(Ok(Bytes::from_static(b"data: [DONE]\n\n"))).await;
        }
    }
}
