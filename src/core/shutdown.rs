//! Centralized shutdown coordination.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::constants::SHUTDOWN_TIMEOUT_SECS;
use crate::broadcast::Broadcaster;
use crate::plugin::{PluginHost, PluginSubscriber};

/// Coordinates graceful shutdown across the accept loop, in-flight
/// connections, plugin deliveries, the plugin host, and the
/// broadcaster.
#[derive(Clone)]
pub struct ShutdownService {
    token: CancellationToken,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    connections: TaskTracker,
    broadcaster: Arc<Broadcaster>,
    plugin_subscriber: Arc<PluginSubscriber>,
    plugin_host: Arc<PluginHost>,
}

impl ShutdownService {
    pub fn new(broadcaster: Arc<Broadcaster>, plugin_subscriber: Arc<PluginSubscriber>, plugin_host: Arc<PluginHost>) -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Arc::new(Mutex::new(Vec::new())),
            connections: TaskTracker::new(),
            broadcaster,
            plugin_subscriber,
            plugin_host,
        }
    }

    /// The token the accept loop and every connection task watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// The tracker new connection tasks are spawned on, so `shutdown`
    /// can wait for them to drain.
    pub fn connections(&self) -> &TaskTracker {
        &self.connections
    }

    /// Register a background task handle to be awaited during shutdown.
    pub async fn register(&self, handle: JoinHandle<()>) {
        self.handles.lock().await.push(handle);
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Trigger shutdown and wait for every dependent to drain.
    ///
    /// Shutdown order (to prevent dropping in-flight work):
    /// 1. Cancel the token so the accept loop and connections stop
    ///    taking new work.
    /// 2. Wait for in-flight connections to finish (bounded by a
    ///    timeout).
    /// 3. Wait for other registered background tasks.
    /// 4. Stop the plugin subscriber, draining in-flight deliveries.
    /// 5. Close the plugin host, releasing every loaded module.
    /// 6. Close the broadcaster.
    pub async fn shutdown(&self) {
        tracing::debug!("initiating graceful shutdown");
        self.trigger();

        let timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);

        self.connections.close();
        if tokio::time::timeout(timeout, self.connections.wait()).await.is_err() {
            tracing::warn!(timeout_secs = timeout.as_secs(), "timed out waiting for connections to drain");
        }

        let handles = std::mem::take(&mut *self.handles.lock().await);
        let task_count = handles.len();
        tracing::debug!(count = task_count, "waiting for background tasks to finish");
        if tokio::time::timeout(timeout, futures::future::join_all(handles)).await.is_err() {
            tracing::warn!(timeout_secs = timeout.as_secs(), "timed out waiting for background tasks");
        }

        tracing::debug!("stopping plugin subscriber");
        self.plugin_subscriber.stop().await;

        tracing::debug!("closing plugin host");
        self.plugin_host.close();

        tracing::debug!("closing broadcaster");
        self.broadcaster.shutdown();

        tracing::debug!("shutdown complete");
    }

    /// Wait for shutdown to be triggered, by any means.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Install OS signal handlers that trigger shutdown on Ctrl+C or
    /// SIGTERM.
    pub fn install_signal_handlers(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
            };

            #[cfg(unix)]
            let terminate = async {
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler")
                    .recv()
                    .await;
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::debug!("received Ctrl+C, shutting down"),
                _ = terminate => tracing::debug!("received SIGTERM, shutting down"),
            }

            service.trigger();
        });
    }
}
