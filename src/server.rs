//! TCP listener for the account registry.
//!
//! Accepts connections and spawns one handler task per connection, all
//! sharing the same [`Registry`]. Shutdown stops the accept loop, signals
//! every handler and waits for them to finish.

use crate::config::Config;
use crate::handler::handle_connection;
use crate::registry::Registry;
use std::future::Future;
use std::io;
use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Pending connection queue length
const LISTEN_BACKLOG: i32 = 1024;

/// Server startup and runtime errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address '{addr}': {source}")]
    InvalidAddress {
        addr: String,
        source: AddrParseError,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Server instance
pub struct Server {
    config: Config,
    registry: Arc<Registry>,
}

impl Server {
    /// Create a new server instance with its registry seeded from config
    pub fn new(config: Config) -> Self {
        let registry = Registry::with_seeds(&config.accounts);
        Server { config, registry }
    }

    /// Shared registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Bind the listening socket. Must be called inside a Tokio runtime.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr: SocketAddr = self.config.listen.parse().map_err(|source| {
            ServerError::InvalidAddress {
                addr: self.config.listen.clone(),
                source,
            }
        })?;

        let listener =
            create_listener(addr).map_err(|source| ServerError::Bind { addr, source })?;
        Ok(TcpListener::from_std(listener)?)
    }

    /// Bind and serve until Ctrl-C
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        self.serve(listener, shutdown_signal()).await;
        Ok(())
    }

    /// Accept connections on `listener` until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        match listener.local_addr() {
            Ok(addr) => info!(address = %addr, accounts = self.registry.len(), "Server listening"),
            Err(e) => warn!(error = %e, "Listening on unknown address"),
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "New connection");

                        let registry = Arc::clone(&self.registry);
                        let shutdown = shutdown_rx.clone();

                        connections.spawn(
                            async move {
                                match handle_connection(stream, registry, shutdown).await {
                                    Ok(()) => debug!("Connection closed"),
                                    Err(e) => warn!(error = %e, "Connection dropped"),
                                }
                            }
                            .instrument(info_span!("connection", peer = %peer)),
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    reap(joined);
                }
            }
        }

        info!(open = connections.len(), "Shutting down");
        // Receivers live as long as their handlers; none left is fine
        let _ = shutdown_tx.send(true);

        while let Some(joined) = connections.join_next().await {
            reap(joined);
        }
        info!("Shutdown complete");
    }
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Connection task failed");
    }
}

/// Resolve on Ctrl-C. If the signal handler cannot be installed, never resolve.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
