//! One accepted connection, end to end.
//!
//! A [`Session`] loops over request/response cycles:
//!
//! 1. read exactly `prefix_len` bytes (per-read timeout),
//! 2. decode and check the declared length against the payload limit,
//! 3. read exactly that many payload bytes (same timeout),
//! 4. hand the payload to the [`InferenceEngine`],
//! 5. frame the response and write it fully.
//!
//! The loop ends on timeout, protocol error, inference error, write failure,
//! peer disconnect or the close signal sent by the listener at shutdown.
//! Whatever the cause, the session then shuts its stream down (best effort)
//! and records exactly one `Disconnect` event.
//!
//! The stream type is generic so tests can drive a session over
//! `tokio::io::duplex` or a scripted mock instead of a real socket.

use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use infergate_core::{EncodingError, FramingError, MetricsEventKind};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

use crate::application::inference::{InferenceEngine, InferenceError};
use crate::application::metrics::MetricsHandle;
use crate::domain::{ServerConfig, SessionInfo, SessionState};

/// Everything a session needs from the server that spawned it.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<ServerConfig>,
    pub engine: Arc<dyn InferenceEngine>,
    pub metrics: MetricsHandle,
}

/// Session-fatal failures.  None of them affects other sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("no data within {timeout:?} while reading the {stage}")]
    Timeout {
        stage: SessionState,
        timeout: Duration,
    },
    #[error("declared payload of {declared} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { declared: u64, max: usize },
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("cannot frame response: {0}")]
    Encoding(#[from] EncodingError),
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

impl SessionError {
    /// The metrics event this failure is counted as.
    pub fn event_kind(&self) -> MetricsEventKind {
        match self {
            SessionError::Inference(_) => MetricsEventKind::InferenceError,
            _ => MetricsEventKind::Error,
        }
    }
}

/// Why a session stopped.
#[derive(Debug)]
pub enum SessionEnd {
    /// The peer closed the connection, possibly mid-frame.
    PeerDisconnected,
    /// The listener asked the session to close.
    Shutdown,
    /// A session-fatal error; counted as an error event.
    Failed(SessionError),
}

impl From<SessionError> for SessionEnd {
    fn from(e: SessionError) -> Self {
        SessionEnd::Failed(e)
    }
}

/// What a finished session reports back to its owner.
#[derive(Debug)]
pub struct SessionSummary {
    pub info: SessionInfo,
    pub end: SessionEnd,
    pub requests: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Per-connection state machine over any async byte stream.
pub struct Session<S> {
    info: SessionInfo,
    stream: S,
    state: SessionState,
    requests: u64,
    bytes_read: u64,
    bytes_written: u64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(info: SessionInfo, stream: S) -> Self {
        Self {
            info,
            stream,
            state: SessionState::Admitted,
            requests: 0,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the session until it closes.
    ///
    /// `close_rx` flipping to `true` aborts any pending read or write.  An
    /// in-progress inference is never interrupted; the signal is observed at
    /// the next read or write.
    pub async fn run(
        mut self,
        ctx: SessionContext,
        mut close_rx: watch::Receiver<bool>,
    ) -> SessionSummary {
        let id = self.info.id;
        let peer = self.info.peer_addr;
        ctx.metrics.record(MetricsEventKind::Connect);
        info!(session = %id, %peer, "session opened");

        let end = match self.serve(&ctx, &mut close_rx).await {
            Ok(never) => match never {},
            Err(end) => end,
        };

        match &end {
            SessionEnd::PeerDisconnected => {
                info!(session = %id, %peer, requests = self.requests, "peer disconnected");
            }
            SessionEnd::Shutdown => {
                info!(session = %id, %peer, stage = %self.state, "session closed by shutdown");
            }
            SessionEnd::Failed(e) => {
                warn!(session = %id, %peer, stage = %self.state, "session failed: {e}");
                ctx.metrics.record(e.event_kind());
            }
        }

        self.state = SessionState::Closed;
        if let Err(e) = self.stream.shutdown().await {
            debug!(session = %id, %peer, "socket shutdown failed: {e}");
        }
        ctx.metrics.record(MetricsEventKind::Disconnect);

        SessionSummary {
            info: self.info,
            end,
            requests: self.requests,
            bytes_read: self.bytes_read,
            bytes_written: self.bytes_written,
        }
    }

    /// The request/response loop.  Only ever returns by ending the session.
    async fn serve(
        &mut self,
        ctx: &SessionContext,
        close_rx: &mut watch::Receiver<bool>,
    ) -> Result<Infallible, SessionEnd> {
        let codec = ctx.config.codec();
        let read_timeout = ctx.config.read_timeout();
        let max = ctx.config.max_payload_size();
        let mut prefix = vec![0u8; codec.prefix_len()];

        loop {
            self.state = SessionState::ReadingLength;
            self.read_exact_timed(&mut prefix, read_timeout, close_rx)
                .await?;

            let declared = codec.decode_length(&prefix).map_err(SessionError::from)?;
            if declared > max as u64 {
                return Err(SessionError::PayloadTooLarge { declared, max }.into());
            }

            // `declared <= max`, so the allocation is bounded by the limit.
            self.state = SessionState::ReadingPayload;
            let mut payload = vec![0u8; declared as usize];
            self.read_exact_timed(&mut payload, read_timeout, close_rx)
                .await?;
            debug!(session = %self.info.id, len = payload.len(), "request received");

            self.state = SessionState::Inferring;
            let response = ctx
                .engine
                .infer(&payload)
                .await
                .map_err(SessionError::from)?;
            let frame = codec.encode(&response).map_err(SessionError::from)?;

            self.state = SessionState::Writing;
            self.write_frame(&frame, close_rx).await?;
            debug!(session = %self.info.id, len = response.len(), "response sent");

            self.requests += 1;
            ctx.metrics.record(MetricsEventKind::Request);
        }
    }

    /// Fills `buf` completely or ends the session.
    async fn read_exact_timed(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
        close_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), SessionEnd> {
        let read = tokio::select! {
            biased;
            _ = wait_closed(close_rx) => return Err(SessionEnd::Shutdown),
            read = time::timeout(timeout, self.stream.read_exact(buf)) => read,
        };

        match read {
            Ok(Ok(n)) => {
                self.bytes_read += n as u64;
                Ok(())
            }
            Ok(Err(e)) if is_disconnect(&e) => Err(SessionEnd::PeerDisconnected),
            Ok(Err(e)) => Err(SessionError::Read(e).into()),
            Err(_elapsed) => Err(SessionError::Timeout {
                stage: self.state,
                timeout,
            }
            .into()),
        }
    }

    /// Writes and flushes one whole frame.  Any failure is an error.
    async fn write_frame(
        &mut self,
        frame: &[u8],
        close_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), SessionEnd> {
        let stream = &mut self.stream;
        let written = tokio::select! {
            biased;
            _ = wait_closed(close_rx) => return Err(SessionEnd::Shutdown),
            written = async {
                stream.write_all(frame).await?;
                stream.flush().await
            } => written,
        };

        written.map_err(SessionError::Write)?;
        self.bytes_written += frame.len() as u64;
        Ok(())
    }
}

/// Resolves once the close signal is raised.  Never resolves if the sender is
/// gone without raising it.
async fn wait_closed(close_rx: &mut watch::Receiver<bool>) {
    let raised = close_rx.wait_for(|closed| *closed).await.is_ok();
    if !raised {
        std::future::pending::<()>().await;
    }
}

/// Errors that mean the peer went away rather than misbehaved.
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
