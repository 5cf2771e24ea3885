//! Integration tests for graceful shutdown.
//!
//! Shutdown must close every active session, including ones blocked in a read
//! with a long timeout, and release the listening socket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use infergate_server::application::inference::FixedResponseEngine;
use infergate_server::application::{
    AggregatorConfig, InferenceEngine, InferenceError, MetricsAggregator,
};
use infergate_server::domain::ServerConfig;
use infergate_server::infrastructure::{FrameClient, Server, ServerHandle};
use tokio::net::TcpStream;

async fn start(
    engine: Arc<dyn InferenceEngine>,
    read_timeout: Duration,
) -> (ServerHandle, MetricsAggregator) {
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), 4, 4096, read_timeout, 10)
        .unwrap();
    let mut aggregator = MetricsAggregator::new(AggregatorConfig {
        flush_interval: Duration::from_millis(20),
        ..AggregatorConfig::default()
    });
    aggregator.start();
    let handle = Server::new(config, engine, aggregator.handle())
        .startup()
        .await
        .unwrap();
    (handle, aggregator)
}

fn fixed() -> Arc<dyn InferenceEngine> {
    Arc::new(FixedResponseEngine::new(b"XXXXX".to_vec()))
}

/// Answers after a fixed delay.
struct SlowEngine(Duration);

#[async_trait]
impl InferenceEngine for SlowEngine {
    async fn infer(&self, _payload: &[u8]) -> Result<Vec<u8>, InferenceError> {
        tokio::time::sleep(self.0).await;
        Ok(b"late".to_vec())
    }
}

#[tokio::test]
async fn test_shutdown_unblocks_in_flight_read() {
    // Arrange: a 30 s read timeout and a client stuck mid-payload
    let (handle, mut aggregator) = start(fixed(), Duration::from_secs(30)).await;
    let mut client = FrameClient::connect(handle.local_addr(), 4).await.unwrap();
    client.request(b"warm-up").await.unwrap();
    client.send_raw(&[0, 0, 0, 100, 1, 2, 3]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.active_session_count().await, 1);

    // Act
    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("shutdown must not hang on a pending read");

    // Assert: well before the read timeout, and the client sees the close
    assert!(started.elapsed() < Duration::from_secs(5));
    let leftover = tokio::time::timeout(Duration::from_secs(2), client.wait_closed())
        .await
        .expect("client must observe the closed socket");
    assert!(leftover.is_empty());

    // Shutdown is not an error.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let snap = aggregator.handle().snapshot();
    assert_eq!(snap.errors, 0);
    assert_eq!(snap.total_requests, 1);
    aggregator.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_every_idle_session() {
    // Arrange
    let (handle, mut aggregator) = start(fixed(), Duration::from_secs(30)).await;
    let mut clients = Vec::new();
    for _ in 0..5 {
        let mut client = FrameClient::connect(handle.local_addr(), 4).await.unwrap();
        client.request(b"hi").await.unwrap();
        clients.push(client);
    }
    assert_eq!(handle.active_session_count().await, 5);

    // Act
    handle.shutdown().await;

    // Assert
    for client in &mut clients {
        let leftover = tokio::time::timeout(Duration::from_secs(2), client.wait_closed())
            .await
            .expect("every session must be closed");
        assert!(leftover.is_empty());
    }
    aggregator.stop().await;
}

#[tokio::test]
async fn test_listening_socket_is_released() {
    let (handle, mut aggregator) = start(fixed(), Duration::from_secs(30)).await;
    let addr = handle.local_addr();

    handle.shutdown().await;

    assert!(TcpStream::connect(addr).await.is_err());
    aggregator.stop().await;
}

#[tokio::test]
async fn test_shutdown_lets_running_inference_finish() {
    // Arrange: inference takes 300 ms
    let (handle, mut aggregator) = start(
        Arc::new(SlowEngine(Duration::from_millis(300))),
        Duration::from_secs(30),
    )
    .await;
    let mut client = FrameClient::connect(handle.local_addr(), 4).await.unwrap();
    client.send(b"slow").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Act
    let started = Instant::now();
    handle.shutdown().await;

    // Assert: shutdown waited for the engine instead of aborting it, and the
    // connection was closed rather than left open
    assert!(started.elapsed() >= Duration::from_millis(200));
    tokio::time::timeout(Duration::from_secs(2), client.wait_closed())
        .await
        .expect("client must observe the closed socket");
    aggregator.stop().await;
}
