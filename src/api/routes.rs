use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use super::auth::auth_middleware;
use super::handlers::*;
use super::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new().route("/health", get(health));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        // Tickets
        .route("/v1/tickets", get(list_tickets).post(create_ticket))
        .route("/v1/tickets/bulk-assign", post(bulk_assign))
        .route("/v1/tickets/:ticket_id", get(get_ticket).patch(update_ticket))
        .route("/v1/tickets/:ticket_id/assign", put(assign_ticket))
        .route("/v1/tickets/:ticket_id/status", put(set_status))
        .route("/v1/tickets/:ticket_id/priority", put(set_priority))
        .route("/v1/tickets/:ticket_id/comments", get(list_comments).post(create_comment))
        .route("/v1/tickets/:ticket_id/timeline", get(get_timeline))

        // Dashboard
        .route("/v1/dashboard/stats", get(dashboard_stats))

        // Apply auth middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    app.layer(cors)
}
