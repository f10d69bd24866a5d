//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit, metrics)
//! - Put every route behind its rate limit preset
//! - Run the sweeper and the config reload loop next to the listener

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    http::Request,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin;
use crate::config::GuardConfig;
use crate::database::{DbError, SupabaseClient};
use crate::http::handlers;
use crate::http::middleware::{rate_limit_middleware, track_metrics, RouteGuard};
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::lifecycle::Shutdown;
use crate::security::store::{build_store, StoreError};
use crate::security::sweeper::Sweeper;
use crate::security::{KeyStrategy, Preset, RateLimiter};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Database(#[from] DbError),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<GuardConfig>>,
    pub limiter: Arc<RateLimiter>,
    pub db: SupabaseClient,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: GuardConfig, limiter: Arc<RateLimiter>, db: SupabaseClient) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            limiter,
            db,
            started_at: Instant::now(),
        }
    }

    /// Put `preset` in front of every route of `router`, keyed by `strategy`.
    pub fn guard(&self, router: Router<AppState>, preset: Preset, strategy: KeyStrategy) -> Router<AppState> {
        let guard = RouteGuard {
            limiter: self.limiter.clone(),
            config: self.config.clone(),
            preset,
            strategy,
        };
        router.route_layer(middleware::from_fn_with_state(guard, rate_limit_middleware))
    }

    /// Accept a reloaded configuration. The listener address, store backend
    /// and admin switch keep their startup values.
    pub fn apply_config(&self, config: GuardConfig) {
        self.limiter.update_presets(config.rate_limit.presets.clone());
        self.config.store(Arc::new(config));
        tracing::info!("Configuration reloaded");
    }
}

/// HTTP server for campus-guard.
pub struct GuardServer {
    state: AppState,
}

impl GuardServer {
    /// Build the store, limiter and database client from `config`.
    pub async fn new(config: GuardConfig) -> Result<Self, ServerError> {
        let store = build_store(&config.rate_limit).await?;
        let limiter = Arc::new(RateLimiter::new(store, config.rate_limit.presets.clone()));
        let db = SupabaseClient::new(&config.supabase, &config.timeouts)?;
        Ok(Self::from_state(AppState::new(config, limiter, db)))
    }

    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The complete application router.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let state = &self.state;
        let config = state.config.load();

        let read = state.guard(
            Router::new()
                .route("/api/health", get(handlers::health))
                .route("/api/stats/{table}", get(handlers::table_stats)),
            Preset::Read,
            KeyStrategy::Prefixed(Preset::Read.as_str()),
        );
        let check = state.guard(
            Router::new().route("/api/rate-limit/check", post(handlers::check_rate_limit)),
            Preset::Api,
            KeyStrategy::Prefixed(Preset::Api.as_str()),
        );

        let mut router = Router::new().merge(read).merge(check);
        if config.admin.enabled {
            router = router.merge(admin::router(state));
        }

        router
            .layer(middleware::from_fn(track_metrics))
            .with_state(state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                        tracing::info_span!(
                            "request",
                            method = %req.method(),
                            uri = %req.uri(),
                            request_id = %request_id(req.headers()),
                        )
                    }))
                    .layer(propagate_request_id_layer())
                    .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// Serve on `listener` until `shutdown` fires. Applies configuration
    /// updates from `config_updates` while running.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: Option<mpsc::UnboundedReceiver<GuardConfig>>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let app = self.router();
        let state = self.state;
        let sweep_interval = Duration::from_secs(state.config.load().rate_limit.sweep_interval_secs);

        let sweeper = Sweeper::new(state.limiter.clone(), sweep_interval);
        let sweeper_task = tokio::spawn(sweeper.run(shutdown.subscribe()));

        let reload_task = config_updates.map(|mut updates| {
            let state = state.clone();
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        update = updates.recv() => match update {
                            Some(config) => state.apply_config(config),
                            None => break,
                        },
                        _ = stop.recv() => break,
                    }
                }
            })
        });

        tracing::info!(
            address = %addr,
            backend = state.limiter.backend(),
            "HTTP server starting"
        );

        let mut stop = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await?;

        // The server can also stop on its own; make sure background tasks follow.
        shutdown.trigger();
        let _ = sweeper_task.await;
        if let Some(task) = reload_task {
            let _ = task.await;
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
