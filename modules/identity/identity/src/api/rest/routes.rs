use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;

use crate::api::rest::handlers;
use crate::domain::service::IdentityService;

/// HTTP surface of the identity module.
pub fn router(service: Arc<IdentityService>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/v1/authorize", post(handlers::authorize))
        .route("/v1/u/{username}", get(handlers::get_user))
        .route(
            "/v1/u/{username}/groups",
            get(handlers::get_groups).post(handlers::modify_groups),
        )
        .route("/login", get(handlers::login_methods))
        .route(
            "/login/{provider}",
            get(handlers::login_get).post(handlers::login_post),
        )
        .route("/wait", get(handlers::wait))
        .route("/discharge", post(handlers::discharge))
        .layer(Extension(service))
        .layer(TraceLayer::new_for_http())
}
