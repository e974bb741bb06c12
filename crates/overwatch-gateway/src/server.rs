use crate::middleware::{auth_middleware, rate_limit_middleware, MiddlewareState};
use crate::routes;
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use overwatch_runtime::ControlPlane;
use overwatch_security::{ApiKeys, RateLimiter};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// The HTTP surface of the control plane.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router. Keys and rate limits come from `server` config;
    /// `/health` is served without authentication.
    pub fn build(plane: Arc<ControlPlane>) -> Router {
        let (keys, rate_limiter) = {
            let config = plane.config().read();
            (
                ApiKeys::new(&config.server.operator_keys, &config.server.admin_keys),
                RateLimiter::new(config.server.max_burst, config.server.max_requests_per_second),
            )
        };
        if keys.is_open() {
            info!("No API keys configured; authentication disabled");
        }
        let mw_state = Arc::new(MiddlewareState { keys, rate_limiter });

        let api = Router::new()
            .route("/agents", post(routes::register_agent).get(routes::list_agents))
            .route("/agents/{id}", get(routes::get_agent))
            .route("/agents/{id}/heartbeat", post(routes::heartbeat))
            .route("/tasks", post(routes::submit_task))
            .route("/tasks/{id}", get(routes::get_task))
            .route("/tasks/{id}/start", post(routes::start_task))
            .route("/tasks/{id}/complete", post(routes::complete_task))
            .route("/capacity/forecast", get(routes::capacity_forecast))
            .route("/clusters", get(routes::clusters))
            .route("/audits", post(routes::launch_audit).get(routes::list_audits))
            .route("/audits/{id}", get(routes::get_audit))
            .route("/audits/{id}/cancel", post(routes::cancel_audit))
            .route(
                "/audits/{id}/findings/{finding_id}",
                post(routes::update_finding),
            )
            .route("/admin/agents/{id}/unsuspend", post(routes::unsuspend))
            .route(
                "/admin/agents/{id}/approve-deletion",
                post(routes::approve_deletion),
            )
            .route("/admin/thresholds", post(routes::override_threshold))
            .layer(axum_mw::from_fn_with_state(
                mw_state.clone(),
                rate_limit_middleware,
            ))
            .layer(axum_mw::from_fn_with_state(mw_state, auth_middleware));

        Router::new()
            .route("/health", get(routes::health))
            .merge(api)
            .with_state(plane)
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn serve<F>(plane: Arc<ControlPlane>, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = Self::build(plane);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %addr, "Overwatch gateway listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
