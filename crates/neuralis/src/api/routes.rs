//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.server.cors_origins);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let api_routes = Router::new()
        // Docker provisioning
        .route("/docker/check", get(handlers::docker_check))
        .route("/conda/check", get(handlers::conda_check))
        .route(
            "/containers",
            get(handlers::list_containers).post(handlers::create_container),
        )
        .route("/containers/{name}", delete(handlers::delete_container))
        .route(
            "/containers/{name}/restart",
            post(handlers::restart_container),
        )
        .route("/containers/{name}/logs", get(handlers::container_logs))
        // Kernels. POST on /kernels/{type} creates a kernel of that type.
        .route("/kernels", get(handlers::list_kernels))
        .route(
            "/kernels/{id}",
            get(handlers::get_kernel)
                .post(handlers::create_kernel)
                .patch(handlers::update_kernel)
                .delete(handlers::delete_kernel),
        )
        .route("/kernels/{id}/start", post(handlers::start_kernel))
        .route("/kernels/{id}/stop", post(handlers::stop_kernel))
        .route("/kernels/{id}/restart", post(handlers::restart_kernel))
        .route("/kernels/{id}/interrupt", post(handlers::interrupt_kernel))
        .route("/kernels/{id}/execute", post(handlers::execute_on_kernel))
        // Sessions
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{id}",
            get(handlers::get_session).delete(handlers::close_session),
        )
        .route("/sessions/{id}/kernel", put(handlers::bind_session_kernel))
        .route("/sessions/{id}/execute", post(handlers::execute_in_session))
        // Assistant
        .route("/amazon-q", post(handlers::ask_amazon_q))
        .route("/amazon-q/check", get(handlers::amazon_q_check));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api_routes)
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}

/// Allow any origin unless specific origins are configured.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("CORS: ignoring invalid origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
}
