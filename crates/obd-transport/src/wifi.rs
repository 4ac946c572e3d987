//! TCP Transport for Wi-Fi Adapters

use crate::connection::{cancellable, AdapterConnection, CloseHandle, StreamSlot};
use crate::error::TransportError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Connection to a Wi-Fi (or STN) adapter exposing a TCP socket
pub struct WifiConnection {
    /// Adapter host name or IP
    host: String,
    /// Adapter TCP port
    port: u16,
    /// Socket connect timeout
    connect_timeout: Duration,
    /// Delay used by `reconnect()`
    settle_delay: Duration,
    slot: StreamSlot,
}

impl WifiConnection {
    /// Create an unconnected TCP transport
    pub fn new(host: &str, port: u16, connect_timeout: Duration, settle_delay: Duration) -> Self {
        info!("Creating Wi-Fi connection for {}:{}", host, port);
        Self {
            host: host.to_string(),
            port,
            connect_timeout,
            settle_delay,
            slot: StreamSlot::default(),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl AdapterConnection for WifiConnection {
    fn descriptor(&self) -> String {
        self.address()
    }

    fn is_connected(&self) -> bool {
        self.slot.is_open()
    }

    fn close_handle(&self) -> CloseHandle {
        self.slot.closer()
    }

    fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let address = self.address();
        let timeout = self.connect_timeout;
        let token = self.slot.closer().arm();
        debug!("Opening TCP socket to {} (timeout {:?})", address, timeout);

        let stream = cancellable(
            &token,
            connect_within(&address, timeout, TcpStream::connect(&address)),
        )
        .await
        .map_err(|e| {
            warn!("TCP connect to {} failed: {}", address, e);
            e
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to disable Nagle on {}: {}", address, e);
        }

        self.slot.install(Box::new(stream));
        info!("Connected to Wi-Fi adapter at {}", address);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.slot.read(buf).await
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.slot.write_all(data).await
    }

    fn close(&mut self) {
        if self.slot.is_open() {
            info!("Closing Wi-Fi connection to {}", self.address());
        }
        self.slot.release();
    }
}

/// Bound a socket connect by `timeout` and map its failure
async fn connect_within<F>(
    address: &str,
    timeout: Duration,
    connect: F,
) -> Result<TcpStream, TransportError>
where
    F: Future<Output = std::io::Result<TcpStream>>,
{
    match tokio::time::timeout(timeout, connect).await {
        Err(_) => Err(TransportError::Timeout(timeout.as_millis() as u64)),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            Err(TransportError::ConnectionRefused(address.to_string()))
        }
        Ok(Err(e)) => Err(TransportError::Io(e)),
        Ok(Ok(stream)) => Ok(stream),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ATZ\r\n");
            socket.write_all(b"ELM327 v1.5\r>").await.unwrap();
        });

        let mut conn = WifiConnection::new(
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            Duration::from_millis(10),
        );
        assert!(!conn.is_connected());
        conn.connect().await.unwrap();
        assert!(conn.is_connected());

        conn.write_all(b"ATZ\r\n").await.unwrap();
        let mut reply = Vec::new();
        let mut buf = [0u8; 32];
        while !reply.ends_with(b">") {
            let n = conn.read(&mut buf).await.unwrap();
            reply.extend_from_slice(&buf[..n]);
        }
        assert_eq!(reply, b"ELM327 v1.5\r>");

        conn.close();
        conn.close();
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_refused_connection_fails_fast() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut conn = WifiConnection::new(
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            Duration::from_millis(10),
        );
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionRefused(_)));
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_connect_times_out() {
        let err = connect_within(
            "192.0.2.1:35000",
            Duration::from_millis(2000),
            std::future::pending(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(2000)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_read_after_close_is_rejected() {
        let mut conn = WifiConnection::new(
            "127.0.0.1",
            9,
            Duration::from_millis(50),
            Duration::from_millis(10),
        );
        conn.close();
        let mut buf = [0u8; 1];
        assert!(matches!(
            conn.read(&mut buf).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_reconnect_reopens_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            for _ in 0..2 {
                let (socket, _) = listener.accept().await.unwrap();
                drop(socket);
            }
        });

        let mut conn = WifiConnection::new(
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            Duration::from_millis(5),
        );
        conn.connect().await.unwrap();
        conn.reconnect().await.unwrap();
        assert!(conn.is_connected());
    }
}
