use crate::auth::ApiKeyAuth;
use crate::routes;
use crate::services::ServiceRegistry;
use axum::routing::get;
use axum::{Extension, Router};
use mimic_core::config::MimicConfig;
use mimic_core::evaluation::{Differ, EvaluationEngine};
use mimic_core::{IsolationEngine, PlatformDb, SchemaReflector, Store, TokenService};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub platform: PlatformDb,
    pub reflector: SchemaReflector,
    pub isolation: IsolationEngine,
    pub evaluation: EvaluationEngine,
    pub tokens: TokenService,
    pub services: ServiceRegistry,
    pub auth: ApiKeyAuth,
    pub default_ttl: Duration,
    pub reaper_interval: Duration,
    pub started_at: Instant,
}

impl AppState {
    /// Wire every engine onto one shared pool.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn from_config(cfg: &MimicConfig, services: ServiceRegistry) -> anyhow::Result<Self> {
        let store = Store::connect(&cfg.postgres).await?;
        let platform = PlatformDb::new(store.pool().clone());
        let reflector = SchemaReflector::new(store.pool().clone());
        let isolation =
            IsolationEngine::new(store.clone(), platform.clone(), reflector.clone());
        let differ = Differ::new(store.pool().clone(), reflector.clone());
        let evaluation = EvaluationEngine::new(differ);
        let tokens = TokenService::new(&cfg.token);
        let auth = ApiKeyAuth::new(platform.clone());

        Ok(Self {
            store,
            platform,
            reflector,
            isolation,
            evaluation,
            tokens,
            services,
            auth,
            default_ttl: cfg.default_ttl,
            reaper_interval: cfg.reaper_interval,
            started_at: Instant::now(),
        })
    }
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::router())
        .route("/health", get(routes::health::get_health))
        .layer(Extension(state))
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[tracing::instrument(level = "info", skip(state))]
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let state = Arc::new(state);

    // Background reaper: expired environments are torn down on a cadence.
    // TTL enforcement for live requests does not depend on it.
    let cancel = CancellationToken::new();
    {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(state.reaper_interval);
            tracing::info!(
                interval_ms = state.reaper_interval.as_millis() as u64,
                "environment reaper started"
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match state.isolation.expire_pass().await {
                            Ok(reaped) if !reaped.is_empty() => {
                                tracing::info!(count = reaped.len(), "reaped expired environments");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "expire pass failed"),
                        }
                    }
                }
            }
        });
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "mimic listening");
    axum::serve(listener, app).await?;
    cancel.cancel();
    Ok(())
}
