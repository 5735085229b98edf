use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};
use util::state::AppState;

mod common;
mod get;
mod post;
mod put;

pub use get::{list_session_records, list_sessions, list_verifications, get_session_token};
pub use post::{
    create_session, override_record, resolve_verification, rotate_session_token,
    submit_attendance,
};
pub use put::edit_session;

use crate::auth::guards::{allow_instructor, allow_student};

/// Routes under `/api/courses/{course_id}/attendance`.
///
/// Instructor-facing session management, the student submission endpoint,
/// the selfie review queue and the override ledger endpoint.
pub fn attendance_routes(app_state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/sessions",
            get(list_sessions)
                .route_layer(from_fn_with_state(app_state.clone(), allow_instructor)),
        )
        .route(
            "/sessions",
            post(create_session)
                .route_layer(from_fn_with_state(app_state.clone(), allow_instructor)),
        )
        .route(
            "/sessions/{session_id}",
            put(edit_session)
                .route_layer(from_fn_with_state(app_state.clone(), allow_instructor)),
        )
        .route(
            "/sessions/{session_id}/token",
            get(get_session_token)
                .route_layer(from_fn_with_state(app_state.clone(), allow_instructor)),
        )
        .route(
            "/sessions/{session_id}/token",
            post(rotate_session_token)
                .route_layer(from_fn_with_state(app_state.clone(), allow_instructor)),
        )
        .route(
            "/sessions/{session_id}/submissions",
            post(submit_attendance)
                .route_layer(from_fn_with_state(app_state.clone(), allow_student)),
        )
        .route(
            "/sessions/{session_id}/records",
            get(list_session_records)
                .route_layer(from_fn_with_state(app_state.clone(), allow_instructor)),
        )
        .route(
            "/verifications",
            get(list_verifications)
                .route_layer(from_fn_with_state(app_state.clone(), allow_instructor)),
        )
        .route(
            "/verifications/{request_id}/resolve",
            post(resolve_verification)
                .route_layer(from_fn_with_state(app_state.clone(), allow_instructor)),
        )
        .route(
            "/records/{record_id}/override",
            post(override_record)
                .route_layer(from_fn_with_state(app_state.clone(), allow_instructor)),
        )
}
