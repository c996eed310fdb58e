use axum::Router;

pub mod envs;
pub mod health;
pub mod runs;
pub mod service_proxy;
pub mod suites;
pub mod templates;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new()
        .nest(
            "/api/platform",
            Router::new()
                .route("/health", axum::routing::get(health::get_health))
                .merge(envs::router())
                .merge(templates::router())
                .merge(suites::router())
                .merge(runs::router()),
        )
        .nest("/api/env", service_proxy::router())
}
