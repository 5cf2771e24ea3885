//! TCP listener: accept loop, admission control and the active-session set.
//!
//! [`Server::startup`] binds the socket and spawns the accept loop, returning a
//! [`ServerHandle`].  Every accepted connection is admitted (or rejected) while
//! holding the registry lock, so the connection cap can never be overshot by
//! two accepts racing each other, and a session can never remove itself before
//! it has been inserted.
//!
//! # Shutdown
//!
//! [`ServerHandle::shutdown`] runs in this order:
//!
//! 1. clear the `running` flag (connections accepted from now on are dropped),
//! 2. take every entry out of the registry and raise its close signal,
//! 3. await each session task,
//! 4. stop the accept loop, which drops the listening socket.
//!
//! A session that is mid-inference finishes the inference first; the close
//! signal is observed at its next read or write.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::inference::InferenceEngine;
use crate::application::metrics::MetricsHandle;
use crate::application::session::{Session, SessionContext};
use crate::domain::{ServerConfig, SessionId, SessionInfo};

/// Pause after a failed `accept()` so a persistent error (e.g. EMFILE) does
/// not turn the loop into a busy spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Listener-level failures.  Only startup can fail; everything after that is
/// logged.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("cannot read the bound address: {0}")]
    LocalAddr(#[source] io::Error),
}

/// One admitted session as the registry sees it.
struct SessionEntry {
    info: SessionInfo,
    close_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// State shared between the accept loop, session tasks and the handle.
struct Shared {
    running: AtomicBool,
    rejected: AtomicU64,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

/// A configured, not yet bound server.
pub struct Server {
    config: Arc<ServerConfig>,
    engine: Arc<dyn InferenceEngine>,
    metrics: MetricsHandle,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        engine: Arc<dyn InferenceEngine>,
        metrics: MetricsHandle,
    ) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            metrics,
        }
    }

    /// Binds the listening socket and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address is in use or not
    /// permitted.
    pub async fn startup(self) -> Result<ServerHandle, ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        info!(
            %local_addr,
            length_field = %self.config.length_width(),
            max_connections = self.config.max_connections(),
            max_payload = self.config.max_payload_size(),
            read_timeout_ms = self.config.read_timeout().as_millis() as u64,
            "listening"
        );

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            rejected: AtomicU64::new(0),
            sessions: Mutex::new(HashMap::new()),
        });
        let ctx = SessionContext {
            config: self.config,
            engine: self.engine,
            metrics: self.metrics,
        };
        let (stop_accept_tx, stop_accept_rx) = oneshot::channel();
        let (shutdown_tx, _) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            ctx,
            Arc::clone(&shared),
            stop_accept_rx,
        ));

        Ok(ServerHandle {
            local_addr,
            shared,
            shutdown_tx,
            stop_accept_tx,
            accept_task,
        })
    }
}

/// Control handle for a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    stop_accept_tx: oneshot::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Connections closed at accept time because the cap was reached.
    pub fn rejected_connections(&self) -> u64 {
        self.shared.rejected.load(Ordering::Relaxed)
    }

    /// The sessions currently registered.
    pub async fn active_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.shared.sessions.lock().await;
        sessions.values().map(|entry| entry.info.clone()).collect()
    }

    pub async fn active_session_count(&self) -> usize {
        self.shared.sessions.lock().await.len()
    }

    /// Flips to `true` when [`shutdown`](Self::shutdown) begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Drains every session, then closes the listening socket.
    pub async fn shutdown(self) {
        info!("shutdown requested");
        self.shared.running.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        let entries: Vec<SessionEntry> = {
            let mut sessions = self.shared.sessions.lock().await;
            sessions.drain().map(|(_, entry)| entry).collect()
        };
        info!(sessions = entries.len(), "closing active sessions");

        for entry in &entries {
            if entry.close_tx.send(true).is_err() {
                // The session already dropped its receiver on the way out.
                debug!(session = %entry.info.id, "session already closing");
            }
        }
        for entry in entries {
            if let Err(e) = entry.task.await {
                warn!(session = %entry.info.id, peer = %entry.info.peer_addr, "session task failed: {e}");
            }
        }

        let _ = self.stop_accept_tx.send(());
        if let Err(e) = self.accept_task.await {
            warn!("accept loop ended abnormally: {e}");
        }
        info!(local_addr = %self.local_addr, "listener closed");
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    ctx: SessionContext,
    shared: Arc<Shared>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            // Also fires if the handle was dropped without a shutdown.
            _ = &mut stop_rx => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => admit(stream, peer, &ctx, &shared).await,
            Err(e) => {
                error!("accept error: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!("accept loop stopped");
}

/// Registers and spawns a session, or drops the connection at once.
async fn admit(stream: TcpStream, peer: SocketAddr, ctx: &SessionContext, shared: &Arc<Shared>) {
    let mut sessions = shared.sessions.lock().await;

    if !shared.running.load(Ordering::SeqCst) {
        debug!(%peer, "shutting down; connection dropped");
        return;
    }
    if sessions.len() >= ctx.config.max_connections() {
        shared.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(%peer, active = sessions.len(), "connection cap reached; rejecting");
        return;
    }

    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, "could not set TCP_NODELAY: {e}");
    }

    let info = SessionInfo::new(peer);
    let id = info.id;
    let (close_tx, close_rx) = watch::channel(false);
    let task = tokio::spawn(run_session(
        stream,
        info.clone(),
        ctx.clone(),
        close_rx,
        Arc::clone(shared),
    ));
    sessions.insert(
        id,
        SessionEntry {
            info,
            close_tx,
            task,
        },
    );
    debug!(session = %id, %peer, active = sessions.len(), "session admitted");
}

/// Body of every session task.
async fn run_session(
    stream: TcpStream,
    info: SessionInfo,
    ctx: SessionContext,
    close_rx: watch::Receiver<bool>,
    shared: Arc<Shared>,
) {
    let id = info.id;
    let summary = Session::new(info, stream).run(ctx, close_rx).await;
    debug!(
        session = %id,
        requests = summary.requests,
        bytes_read = summary.bytes_read,
        bytes_written = summary.bytes_written,
        "session finished"
    );
    // Already gone if shutdown drained the registry.
    shared.sessions.lock().await.remove(&id);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
