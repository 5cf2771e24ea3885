//! Async client for the length-prefixed protocol.
//!
//! Used by the `infergate-probe` binary and the integration tests.  Requests
//! are strictly sequential: one frame out, one frame back.

use std::io;
use std::net::SocketAddr;

use infergate_core::{EncodingError, FrameCodec, FramingError};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Responses larger than this are refused unless configured otherwise.
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 64 * 1024 * 1024;

/// Client-side failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot encode request: {0}")]
    Encoding(#[from] EncodingError),
    #[error("invalid length prefix: {0}")]
    Framing(#[from] FramingError),
    #[error("server announced a {declared} byte response, limit is {max}")]
    ResponseTooLarge { declared: u64, max: usize },
}

/// One TCP connection speaking framed requests.
#[derive(Debug)]
pub struct FrameClient {
    stream: TcpStream,
    codec: FrameCodec,
    max_response_size: usize,
}

impl FrameClient {
    /// Connects to `addr` using a `width_bytes` length prefix.
    pub async fn connect(addr: SocketAddr, width_bytes: usize) -> Result<Self, ClientError> {
        let codec = FrameCodec::new(width_bytes)?;
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(%addr, width = width_bytes, "connected");
        Ok(Self {
            stream,
            codec,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        })
    }

    /// Caps the response size the client will allocate for.
    pub fn with_max_response_size(mut self, max: usize) -> Self {
        self.max_response_size = max;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    /// Writes one framed payload.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        let frame = self.codec.encode(payload)?;
        self.send_raw(&frame).await
    }

    /// Writes bytes as-is, bypassing the codec.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads one framed response.
    pub async fn receive(&mut self) -> Result<Vec<u8>, ClientError> {
        let mut prefix = vec![0u8; self.codec.prefix_len()];
        self.stream.read_exact(&mut prefix).await?;
        let declared = self.codec.decode_length(&prefix)?;
        if declared > self.max_response_size as u64 {
            return Err(ClientError::ResponseTooLarge {
                declared,
                max: self.max_response_size,
            });
        }
        let mut payload = vec![0u8; declared as usize];
        self.stream.read_exact(&mut payload).await?;
        Ok(payload)
    }

    /// Sends `payload` and waits for the matching response.
    pub async fn request(&mut self, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
        self.send(payload).await?;
        self.receive().await
    }

    /// Reads until the server closes the connection, returning any trailing
    /// bytes.  An error such as a reset also counts as closed.
    pub async fn wait_closed(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        if let Err(e) = self.stream.read_to_end(&mut rest).await {
            debug!("connection ended with error: {e}");
        }
        rest
    }

    /// Shuts down the write side and drops the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_request_round_trips_against_echo_peer() {
        // Arrange: a peer that echoes one frame back
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut prefix = [0u8; 2];
            socket.read_exact(&mut prefix).await.unwrap();
            let mut body = vec![0u8; u16::from_be_bytes(prefix) as usize];
            socket.read_exact(&mut body).await.unwrap();
            socket.write_all(&prefix).await.unwrap();
            socket.write_all(&body).await.unwrap();
        });
        let mut client = FrameClient::connect(addr, 2).await.unwrap();

        // Act
        let response = client.request(b"hello").await.unwrap();

        // Assert
        assert_eq!(response, b"hello");
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_response_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[0, 0, 1, 0]).await.unwrap();
        });
        let mut client = FrameClient::connect(addr, 4)
            .await
            .unwrap()
            .with_max_response_size(16);

        let err = client.receive().await.unwrap_err();

        assert!(matches!(
            err,
            ClientError::ResponseTooLarge {
                declared: 256,
                max: 16
            }
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_unsupported_width() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let err = FrameClient::connect(addr, 5).await.unwrap_err();
        assert!(matches!(err, ClientError::Framing(FramingError::UnsupportedWidth(5))));
    }
}
