//! Relay server listener
//!
//! Serves the WebSocket endpoint and spawns a client session per upgraded
//! connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::Result;
use crate::mux::{Fmp4MuxerFactory, MuxerFactory};
use crate::registry::{RegistryConfig, SourceId, SourceRegistry, StreamRegistry};
use crate::server::config::RelayConfig;
use crate::session::ClientSession;
use crate::stats::ServerStats;
use crate::transport::{split_socket, MessageSink};

/// Query parameter carrying the source identifier
pub const SOURCE_PARAM: &str = "suuid";

/// Shared state handed to every request
struct RelayState<R, F> {
    config: Arc<RelayConfig>,
    registry: Arc<R>,
    muxers: Arc<F>,
    stats: Arc<ServerStats>,
    next_session_id: Arc<AtomicU64>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<R, F> Clone for RelayState<R, F> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            muxers: Arc::clone(&self.muxers),
            stats: Arc::clone(&self.stats),
            next_session_id: Arc::clone(&self.next_session_id),
            connection_semaphore: self.connection_semaphore.clone(),
        }
    }
}

/// MSE relay server
pub struct RelayServer<R: SourceRegistry = StreamRegistry, F: MuxerFactory = Fmp4MuxerFactory> {
    state: RelayState<R, F>,
}

impl RelayServer<StreamRegistry, Fmp4MuxerFactory> {
    /// Create a server with its own registry and the fMP4 muxer
    pub fn new(config: RelayConfig) -> Self {
        Self::with_registry_config(config, RegistryConfig::default())
    }

    /// Create a server with custom registry configuration
    pub fn with_registry_config(config: RelayConfig, registry_config: RegistryConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(StreamRegistry::with_config(registry_config)),
            Fmp4MuxerFactory::default(),
        )
    }
}

impl<R: SourceRegistry, F: MuxerFactory> RelayServer<R, F> {
    /// Create a server over an existing registry and muxer factory
    pub fn with_parts(config: RelayConfig, registry: Arc<R>, muxers: F) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            state: RelayState {
                config: Arc::new(config),
                registry,
                muxers: Arc::new(muxers),
                stats: Arc::new(ServerStats::new()),
                next_session_id: Arc::new(AtomicU64::new(1)),
                connection_semaphore,
            },
        }
    }

    /// Get a reference to the source registry
    pub fn registry(&self) -> &Arc<R> {
        &self.state.registry
    }

    /// Server-wide statistics
    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.state.stats
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.state.config.bind_addr
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.state.config.ws_path, get(ws_handler::<R, F>))
            .with_state(self.state.clone())
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<S>(&self, shutdown: S) -> Result<()>
    where
        S: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<S>(&self, listener: TcpListener, shutdown: S) -> Result<()>
    where
        S: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::info!(
            addr = %listener.local_addr()?,
            path = %self.state.config.ws_path,
            "MSE relay listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        Ok(())
    }
}

async fn ws_handler<R: SourceRegistry, F: MuxerFactory>(
    State(state): State<RelayState<R, F>>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    // Check connection limit
    let permit = match state.connection_semaphore {
        Some(ref sem) => match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                state.stats.connection_rejected();
                tracing::warn!("Connection rejected: limit reached");
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        },
        None => None,
    };

    let suuid = params.get(SOURCE_PARAM).cloned().unwrap_or_default();
    ws.on_upgrade(move |socket| handle_socket(state, socket, suuid, permit))
}

async fn handle_socket<R: SourceRegistry, F: MuxerFactory>(
    state: RelayState<R, F>,
    socket: WebSocket,
    suuid: String,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let session_id = state.next_session_id.fetch_add(1, Ordering::Relaxed);
    let (mut sink, stream) = split_socket(socket);

    let source = match suuid.parse::<SourceId>() {
        Ok(source) => source,
        Err(e) => {
            tracing::debug!(session_id = session_id, error = %e, "Closing connection");
            let deadline = state.config.session.init_write_timeout;
            let _ = tokio::time::timeout(deadline, sink.close()).await;
            return;
        }
    };

    tracing::debug!(session_id = session_id, source = %source, "New connection");

    let _active = state.stats.track_session();
    let mut session = ClientSession::new(
        session_id,
        source,
        Arc::clone(&state.registry),
        Arc::clone(&state.muxers),
        state.config.session.clone(),
    );
    // The session logs its own outcome
    let _ = session.run(sink, stream).await;
}
