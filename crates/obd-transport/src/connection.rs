//! Adapter Connection Contract
//!
//! Every transport variant implements [`AdapterConnection`]. Streams are only
//! usable between a successful `connect()` and the next `close()`; any other
//! use fails with [`TransportError::NotConnected`].

use crate::error::TransportError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Byte stream to an adapter (socket, RFCOMM tty or USB serial port)
pub trait AdapterStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AdapterStream for T {}

/// Owned, type-erased adapter stream
pub type BoxedStream = Box<dyn AdapterStream>;

/// Common contract for Bluetooth, Wi-Fi and USB-serial connections
#[async_trait]
pub trait AdapterConnection: Send {
    /// Human-readable target (device address, host:port or tty path)
    fn descriptor(&self) -> String;

    /// Whether the byte streams are currently usable
    fn is_connected(&self) -> bool;

    /// Handle that can interrupt in-flight I/O from another task
    fn close_handle(&self) -> CloseHandle;

    /// Delay between `close()` and `connect()` during `reconnect()`
    fn settle_delay(&self) -> Duration;

    /// Establish the channel
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Read bytes from the adapter. Framed transports return `Ok(0)` at the
    /// end of each frame.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write and flush bytes to the adapter
    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Release all held resources. Safe to call any number of times.
    fn close(&mut self);

    /// `close()`, wait for the settle delay, then `connect()`
    async fn reconnect(&mut self) -> Result<(), TransportError> {
        debug!("Reconnecting to {}", self.descriptor());
        self.close();
        let delay = self.settle_delay();
        let token = self.close_handle().arm();
        cancellable(&token, async {
            tokio::time::sleep(delay).await;
            Ok::<(), TransportError>(())
        })
        .await?;
        self.connect().await
    }
}

/// Cloneable handle that cancels a connection's pending connect/read/write.
///
/// Closing cancels the current token; the next `connect()` re-arms a fresh one.
#[derive(Debug, Clone, Default)]
pub struct CloseHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl CloseHandle {
    /// Create an armed handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt any in-flight operation with [`TransportError::Closed`]
    pub fn close(&self) {
        self.current().cancel();
    }

    /// Whether the current token has been cancelled
    pub fn is_closed(&self) -> bool {
        self.current().is_cancelled()
    }

    pub(crate) fn current(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace a cancelled token so a new connect attempt can proceed
    pub(crate) fn arm(&self) -> CancellationToken {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }
}

/// Run `fut` unless `token` is cancelled first
pub(crate) async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::select! {
        _ = token.cancelled() => Err(TransportError::Closed),
        result = fut => result,
    }
}

/// Stream holder shared by the unframed variants
#[derive(Default)]
pub(crate) struct StreamSlot {
    stream: Option<BoxedStream>,
    closer: CloseHandle,
}

impl StreamSlot {
    pub(crate) fn closer(&self) -> CloseHandle {
        self.closer.clone()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.stream.is_some() && !self.closer.is_closed()
    }

    pub(crate) fn install(&mut self, stream: BoxedStream) {
        self.stream = Some(stream);
    }

    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let token = self.closer.current();
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        cancellable(&token, async { Ok::<_, TransportError>(stream.read(buf).await?) }).await
    }

    pub(crate) async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let token = self.closer.current();
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        cancellable(&token, async {
            stream.write_all(data).await?;
            stream.flush().await?;
            Ok::<(), TransportError>(())
        })
        .await
    }

    pub(crate) fn release(&mut self) {
        self.closer.close();
        self.stream = None;
    }
}
