//! Application runtime: configuration, logging, router and broadcaster in one
//! place, with an orderly startup and shutdown.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use spire_runtime::SpireRuntime;
//!
//! let runtime = SpireRuntime::builder()
//!     .config_file("config/spire.toml")
//!     .routes(|channels| {
//!         Router::new().route(Route::websocket("/rooms/{name}", room(channels.clone()))?)
//!     })
//!     .build()
//!     .await?;
//!
//! runtime.run().await?;
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! build ──► logging ──► validate ──► Broadcaster::connect ──► routes(&broadcaster)
//!
//! run ──► lifespan.startup ──► user hooks.startup
//!           ... serving until Ctrl+C / SIGTERM / shutdown() ...
//!         lifespan.shutdown ─► user hooks.shutdown ──► broadcaster.shutdown
//! ```

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use spire_channels::Broadcaster;
use spire_core::{HandlerResult, LifespanHandler, Router, RoutingResult};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigLoader, SpireConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;

type RoutesFn = Box<dyn FnOnce(&Broadcaster) -> RoutingResult<Router> + Send>;

/// Owns the router, the broadcaster and the shutdown signal of an application.
pub struct SpireRuntime {
    config: SpireConfig,
    router: Arc<Router>,
    broadcaster: Broadcaster,
    shutdown: CancellationToken,
}

impl SpireRuntime {
    /// Creates a runtime builder.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration.
    ///
    /// `routes` receives the broadcaster so handlers can capture a clone of it.
    pub async fn from_config<F>(config: SpireConfig, routes: F) -> RuntimeResult<Self>
    where
        F: FnOnce(&Broadcaster) -> RoutingResult<Router>,
    {
        Self::assemble(config, routes, None).await
    }

    async fn assemble<F>(
        config: SpireConfig,
        routes: F,
        hooks: Option<Arc<dyn LifespanHandler>>,
    ) -> RuntimeResult<Self>
    where
        F: FnOnce(&Broadcaster) -> RoutingResult<Router>,
    {
        logging::init_from_config(&config.logging);
        validate_config(&config)?;

        let broadcaster = Broadcaster::connect(config.channels.clone()).await?;
        let mut router = routes(&broadcaster)?;
        router.set_lifespan(Arc::new(RuntimeLifespan {
            broadcaster: broadcaster.clone(),
            hooks,
        }));

        info!(
            log_level = %config.logging.level,
            address = %config.server.address(),
            routes = router.routes().len(),
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config,
            router: Arc::new(router),
            broadcaster,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &SpireConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Token cancelled when the runtime is asked to stop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Asks a running [`serve`](Self::serve) to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Serves until Ctrl+C, SIGTERM or [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> RuntimeResult<()> {
        let token = self.shutdown.clone();
        let signals = tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_signal() => token.cancel(),
                _ = token.cancelled() => {}
            }
        });

        info!("Spire runtime is now running. Press Ctrl+C to stop.");
        let result = self.serve().await;
        signals.abort();
        result
    }

    /// Serves until the shutdown token is cancelled.
    ///
    /// With a transport feature enabled this binds `server.host:server.port`.
    /// Without one only the lifespan runs, which is enough for applications
    /// that drive the router themselves.
    pub async fn serve(&self) -> RuntimeResult<()> {
        #[cfg(any(feature = "http-server", feature = "ws-server"))]
        {
            let address = self.config.server.address();
            debug!(%address, "Binding listener");
            let listener = spire_transport::bind(&address).await?;
            spire_transport::serve(listener, self.router.clone(), self.shutdown.clone()).await?;
        }

        #[cfg(not(any(feature = "http-server", feature = "ws-server")))]
        {
            let lifespan = spire_transport::Lifespan::startup(self.router.clone()).await?;
            debug!("No transport enabled, running lifespan only");
            self.shutdown.cancelled().await;
            lifespan.shutdown().await?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for SpireRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpireRuntime")
            .field("address", &self.config.server.address())
            .field("router", &self.router)
            .field("stopping", &self.shutdown.is_cancelled())
            .finish()
    }
}

/// Waits for Ctrl+C or SIGTERM. Never resolves if no handler can be installed.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = signal::ctrl_c() => match result {
                        Ok(()) => info!("Received Ctrl+C, shutting down"),
                        Err(e) => {
                            warn!(error = %e, "Failed to listen for Ctrl+C");
                            sigterm.recv().await;
                            info!("Received SIGTERM, shutting down");
                        }
                    },
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// Lifespan
// =============================================================================

/// Runs user hooks around the broadcaster's lifetime.
struct RuntimeLifespan {
    broadcaster: Broadcaster,
    hooks: Option<Arc<dyn LifespanHandler>>,
}

#[async_trait]
impl LifespanHandler for RuntimeLifespan {
    async fn startup(&self) -> HandlerResult {
        if let Some(hooks) = &self.hooks {
            hooks.startup().await?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> HandlerResult {
        let result = match &self.hooks {
            Some(hooks) => hooks.shutdown().await,
            None => Ok(()),
        };
        self.broadcaster.shutdown().await;
        let stats = self.broadcaster.stats();
        info!(
            published = stats.published,
            delivered = stats.delivered,
            dropped = stats.dropped,
            "Broadcaster shut down"
        );
        result
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`SpireRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    routes: RoutesFn,
    hooks: Option<Arc<dyn LifespanHandler>>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Creates a builder that searches the current directory for config files.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            routes: Box::new(|_| Ok(Router::new())),
            hooks: None,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration programmatically.
    pub fn merge(mut self, config: SpireConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Builds the route table once the broadcaster exists.
    pub fn routes<F>(mut self, routes: F) -> Self
    where
        F: FnOnce(&Broadcaster) -> RoutingResult<Router> + Send + 'static,
    {
        self.routes = Box::new(routes);
        self
    }

    /// Uses a prebuilt router.
    pub fn router(self, router: Router) -> Self {
        self.routes(move |_| Ok(router))
    }

    /// Startup and shutdown hooks; shutdown runs before the broadcaster closes.
    pub fn lifespan(mut self, hooks: Arc<dyn LifespanHandler>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Loads configuration and builds the runtime.
    pub async fn build(self) -> RuntimeResult<SpireRuntime> {
        let config = self.config_loader.load()?;
        SpireRuntime::assemble(config, self.routes, self.hooks).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use spire_channels::{BackendConfig, BackpressurePolicy};
    use spire_core::testing::mock_io;
    use spire_core::{
        Connection, HandlerResult, InboundEvent, Method, OutboundEvent, Request, Response, Route,
        Scope,
    };

    use super::*;
    use crate::config::ConfigError;
    use crate::error::RuntimeError;

    fn test_config() -> SpireConfig {
        let mut config = SpireConfig::default();
        config.server.port = 0;
        config
    }

    async fn ping(_req: Request) -> HandlerResult<Response> {
        Ok(Response::text("pong"))
    }

    #[derive(Default)]
    struct Hooks {
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    #[async_trait]
    impl LifespanHandler for Hooks {
        async fn startup(&self) -> HandlerResult {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self) -> HandlerResult {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_from_config_builds_routes() {
        let runtime = SpireRuntime::from_config(test_config(), |_| {
            Router::new().route(Route::get("/ping", ping)?)
        })
        .await
        .unwrap();

        assert_eq!(runtime.router().routes().len(), 1);
        assert_eq!(runtime.broadcaster().subscriber_count(), 0);

        let (io, mut peer) = mock_io();
        let conn = Connection::new(Scope::http(Method::Get, "/ping"), io);
        peer.send(InboundEvent::HttpRequest {
            body: Default::default(),
            more_body: false,
        });
        runtime.router().dispatch(conn).await;

        let events = peer.drain();
        assert!(matches!(
            events.first(),
            Some(OutboundEvent::HttpResponseStart { status: 200, .. })
        ));
        let body: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                OutboundEvent::HttpResponseBody { body, .. } => Some(body.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(body, b"pong");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.channels.backpressure_policy = BackpressurePolicy::Block;
        config.channels.block_timeout_ms = 0;

        let result = SpireRuntime::from_config(config, |_| Ok(Router::new())).await;
        assert!(matches!(
            result,
            Err(RuntimeError::Config(ConfigError::ValidationError { .. }))
        ));
    }

    #[tokio::test]
    async fn test_routing_error_is_reported() {
        let result = SpireRuntime::from_config(test_config(), |_| {
            Router::new()
                .route(Route::get("/a/{x}", ping)?)?
                .route(Route::get("/a/{y}", ping)?)
        })
        .await;
        assert!(matches!(result, Err(RuntimeError::Routing(_))));
    }

    #[tokio::test]
    async fn test_serve_runs_hooks_and_shuts_down_broadcaster() {
        let hooks = Arc::new(Hooks::default());
        let runtime = SpireRuntime::builder()
            .search_path(std::env::temp_dir().join("spire-no-such-dir"))
            .without_env()
            .merge(test_config())
            .lifespan(hooks.clone())
            .build()
            .await
            .unwrap();
        let runtime = Arc::new(runtime);

        let subscriber = runtime.broadcaster().subscribe(["news"]).await.unwrap();

        let serving = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.serve().await })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while hooks.started.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(!runtime.broadcaster().is_shut_down());

        runtime.shutdown();
        serving.await.unwrap().unwrap();

        assert_eq!(hooks.stopped.load(Ordering::SeqCst), 1);
        assert!(runtime.broadcaster().is_shut_down());
        assert!(subscriber.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_redis_backend_requires_url() {
        let mut config = test_config();
        config.channels.backend = BackendConfig::Redis {
            url: String::new(),
            key_prefix: "spire".to_string(),
        };
        let result = SpireRuntime::from_config(config, |_| Ok(Router::new())).await;
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }
}
