use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::CanonicalError;

/// Wraps an upstream byte stream. Pulls the first chunk synchronously at
/// construction: if the upstream errors or yields nothing before any bytes
/// arrive, construction fails and the pipeline is never connected to the
/// downstream client, letting the caller fall back to another candidate
/// instead of flushing a half-open response.
#[async_trait::async_trait]
pub trait Reader: Send {
    async fn read(&mut self) -> Result<Option<Bytes>, CanonicalError>;
    async fn close(&mut self);
}

type BoxedByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

pub struct UpstreamReader {
    first: Option<Bytes>,
    inner: BoxedByteStream,
}

impl UpstreamReader {
    /// Pulls the first chunk eagerly; fails if the upstream errors or ends
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError::Transport`] if the first read fails or the
    /// stream is empty.
    pub async fn new(mut inner: BoxedByteStream) -> Result<Self, CanonicalError> {
        match inner.next().await {
            Some(Ok(bytes)) => Ok(Self { first: Some(bytes), inner }),
            Some(Err(err)) => Err(CanonicalError::Transport(err.to_string())),
            None => Err(CanonicalError::Transport("upstream stream ended before any data".to_string())),
        }
    }
}

#[async_trait::async_trait]
impl Reader for UpstreamReader {
    async fn read(&mut self) -> Result<Option<Bytes>, CanonicalError> {
        if let Some(first) = self.first.take() {
            return Ok(Some(first));
        }
        match self.inner.next().await {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(err)) => Err(CanonicalError::Transport(err.to_string())),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {}
}
