use axum::{middleware, routing::get, routing::post, Router};
use tower_http::limit::RequestBodyLimitLayer;

use crate::{
    handlers,
    security::middleware::{admission_middleware, identity_middleware},
    state::AppState,
};

pub fn create_router(state: AppState) -> Router {
    let submissions = Router::new()
        .route("/submissions", post(handlers::post_submission))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ))
        .layer(RequestBodyLimitLayer::new(16 * 1024));

    Router::new()
        .nest("/api/v1", submissions)
        .route("/ws", get(handlers::websocket_handler))
        .route("/health", get(handlers::health_check))
        .layer(middleware::from_fn(identity_middleware))
        .with_state(state)
}
