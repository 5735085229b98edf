//! HTTP route entry point for `/api/...`.
//!
//! Route groups:
//! - `/health` → liveness probe (public)
//! - `/courses/{course_id}/attendance` → attendance sessions, submissions,
//!   the selfie review queue and status overrides (role-guarded per route)

use crate::routes::attendance::attendance_routes;
use crate::routes::health::health_routes;
use axum::Router;
use util::state::AppState;

pub mod attendance;
pub mod health;

/// Builds the complete application router for all HTTP endpoints.
pub fn routes(app_state: AppState) -> Router {
    Router::new()
        .nest(
            "/courses/{course_id}/attendance",
            attendance_routes(app_state.clone()).with_state(app_state),
        )
        .nest("/health", health_routes())
}
