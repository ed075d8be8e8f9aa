//! Application wiring: turns parsed configuration into a running server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::broadcast::Broadcaster;
use crate::core::banner;
use crate::core::cli::{self, LogFormat};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::domain::engine::Engine;
use crate::domain::store::InMemoryEventStore;
use crate::plugin::{PluginHost, PluginSubscriber};
use crate::session::auth::{Authenticator, DemoAuthenticator};
use crate::session::registry::SessionRegistry;
use crate::session::ConnectionDeps;

/// Stream pattern every loaded plugin is subscribed under. This binary
/// models a single shared location stream, so there is only one
/// pattern worth routing on.
const PLUGIN_STREAM_PATTERN: &str = "location:*";

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub engine: Arc<Engine>,
    pub broadcaster: Arc<Broadcaster>,
    pub plugin_host: Arc<PluginHost>,
    pub plugin_subscriber: Arc<PluginSubscriber>,
    pub authenticator: Arc<dyn Authenticator>,
    pub registry: Arc<SessionRegistry>,
}

impl CoreApp {
    /// Run the application: parse configuration, wire dependencies, and
    /// serve connections until shutdown is triggered.
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();

        let cli_config = cli::parse();
        Self::init_logging(cli_config.debug, cli_config.log_format.unwrap_or_default());

        tracing::debug!("application starting");

        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli_config: &cli::CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli_config)?;

        let broadcaster = Arc::new(Broadcaster::new(config.broadcast_queue_depth));
        let store: Arc<dyn crate::domain::store::EventStore> = Arc::new(InMemoryEventStore::new());

        let plugin_host = Arc::new(PluginHost::new().context("failed to initialize plugin host")?);
        for plugin in &config.plugins {
            let bytes = std::fs::read(&plugin.path).with_context(|| format!("failed to read plugin module: {}", plugin.path.display()))?;
            plugin_host.load(&plugin.name, &bytes).with_context(|| format!("failed to load plugin '{}'", plugin.name))?;
            tracing::debug!(plugin = %plugin.name, path = %plugin.path.display(), "plugin loaded");
        }

        // The engine is shared by both directions of the cycle: sessions
        // emit through it, and it is also the `Emitter` the plugin
        // subscriber re-injects emissions through (so a plugin's own
        // emission can itself trigger another plugin delivery). `Engine`
        // implements `Emitter`, so the subscriber depends on that trait
        // rather than on `Engine` directly. Since the subscriber needs an
        // `Arc` to the engine before the engine can hold the subscriber
        // as a sink, the engine is built first and `add_sink` wires the
        // subscriber in afterwards.
        let engine = Arc::new(Engine::new(store, broadcaster.clone()));
        let plugin_subscriber = Arc::new(PluginSubscriber::new(
            plugin_host.clone(),
            engine.clone(),
            Duration::from_millis(config.plugin_timeout_ms),
        ));
        for plugin in &config.plugins {
            plugin_subscriber.register(PLUGIN_STREAM_PATTERN, &plugin.name);
        }
        engine.add_sink(plugin_subscriber.clone());

        let authenticator: Arc<dyn Authenticator> = Arc::new(DemoAuthenticator::new());
        let registry = Arc::new(SessionRegistry::new());

        let shutdown = ShutdownService::new(broadcaster.clone(), plugin_subscriber.clone(), plugin_host.clone());

        Ok(Self {
            shutdown,
            config,
            engine,
            broadcaster,
            plugin_host,
            plugin_subscriber,
            authenticator,
            registry,
        })
    }

    fn init_logging(debug: bool, format: LogFormat) {
        let default_filter = if debug {
            format!("debug,{APP_NAME_LOWER}=debug")
        } else {
            format!("info,{APP_NAME_LOWER}=info")
        };

        let filter = std::env::var(ENV_LOG).or_else(|_| std::env::var("RUST_LOG")).unwrap_or(default_filter);

        let subscriber = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

        match format {
            LogFormat::Json => subscriber.json().init(),
            LogFormat::Text => subscriber.compact().init(),
        }
    }

    async fn start_server(app: Self) -> Result<()> {
        app.shutdown.install_signal_handlers();

        banner::print_banner(&app.config.listen, &app.plugin_host.names(), app.config.plugin_timeout_ms, app.config.broadcast_queue_depth);

        let deps = ConnectionDeps {
            engine: app.engine.clone(),
            authenticator: app.authenticator.clone(),
            registry: app.registry.clone(),
        };
        let server = crate::server::LineServer::new(app.config.listen.clone(), deps);
        let token = app.shutdown.token();
        let connections = app.shutdown.connections().clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = server.serve(token, connections).await {
                tracing::error!(error = %e, "line server error");
            }
        });

        app.shutdown.wait().await;
        let _ = handle.await;
        app.shutdown.shutdown().await;

        Ok(())
    }
}
