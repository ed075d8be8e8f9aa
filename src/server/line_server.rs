//! The TCP line server: accepts connections and spawns one task per
//! connection, adapted from this codebase's gRPC server start loop
//! (bind, accept/serve until shutdown fires) to a raw line protocol.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::session::connection::{handle_connection, ConnectionDeps};

pub struct LineServer {
    addr: String,
    deps: ConnectionDeps,
}

impl LineServer {
    pub fn new(addr: impl Into<String>, deps: ConnectionDeps) -> Self {
        Self { addr: addr.into(), deps }
    }

    /// Bind and accept connections until `shutdown` fires. Each accepted
    /// socket is handed to its own task on `tracker`, so the caller can
    /// await `tracker.wait()` after this returns to drain in-flight
    /// connections.
    pub async fn serve(self, shutdown: CancellationToken, tracker: TaskTracker) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!(addr = %self.addr, "line server listening");
        let next_connection_id = AtomicU64::new(1);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("line server stopping accept loop");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let connection_id = next_connection_id.fetch_add(1, Ordering::Relaxed);
                    let deps = self.deps.clone();
                    let conn_shutdown = shutdown.clone();
                    info!(connection_id, %peer, "accepted connection");
                    tracker.spawn(async move {
                        handle_connection(connection_id, socket, deps, conn_shutdown).await;
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::domain::engine::Engine;
    use crate::domain::store::InMemoryEventStore;
    use crate::session::auth::DemoAuthenticator;
    use crate::session::registry::SessionRegistry;

    fn deps() -> ConnectionDeps {
        ConnectionDeps {
            engine: Arc::new(Engine::new(Arc::new(InMemoryEventStore::new()), Arc::new(Broadcaster::new(16)))),
            authenticator: Arc::new(DemoAuthenticator::new()),
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    #[tokio::test]
    async fn stops_accepting_once_shutdown_is_cancelled() {
        let server = LineServer::new("127.0.0.1:0", deps());
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let result = server.serve(shutdown, TaskTracker::new()).await;
        assert!(result.is_ok());
    }
}
