use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Duration;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::collections::HashSet;
use util::{config, state::AppState};

use super::common::{RecordResponse, SessionResponse, TokenResponse};
use crate::response::ApiResponse;
use db::models::attendance_record::Model as Record;
use db::models::attendance_session::{Column as SessionCol, Entity as SessionEntity, Model as Sess};
use db::models::verification_request::{self, Model as Verification};

/// GET /api/courses/{course_id}/attendance/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
) -> (StatusCode, Json<ApiResponse<Vec<SessionResponse>>>) {
    match Sess::find_by_course(state.db(), course_id).await {
        Ok(rows) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                rows.into_iter().map(SessionResponse::from).collect(),
                "Attendance sessions retrieved",
            )),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!(
                "Failed to list attendance sessions: {e}"
            ))),
        ),
    }
}

/// GET /api/courses/{course_id}/attendance/sessions/{session_id}/token
///
/// Returns the current check-in token for display by the instructor.
pub async fn get_session_token(
    State(state): State<AppState>,
    Path((course_id, session_id)): Path<(i64, i64)>,
) -> (StatusCode, Json<ApiResponse<Option<TokenResponse>>>) {
    let db = state.db();

    let session = match SessionEntity::find()
        .filter(SessionCol::Id.eq(session_id))
        .filter(SessionCol::CourseId.eq(course_id))
        .one(db)
        .await
    {
        Ok(Some(s)) => s,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("Attendance session not found")),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Failed to load session: {e}"))),
            );
        }
    };

    if !session.active {
        return (
            StatusCode::CONFLICT,
            Json(ApiResponse::error("Attendance session is closed")),
        );
    }

    let ttl = Duration::seconds(config::token_ttl_seconds() as i64);
    let response = TokenResponse {
        token: session.token.clone(),
        issued_at: session.token_issued_at.to_rfc3339(),
        expires_at: (session.token_issued_at + ttl).to_rfc3339(),
    };
    (
        StatusCode::OK,
        Json(ApiResponse::success(Some(response), "Current session token")),
    )
}

/// GET /api/courses/{course_id}/attendance/sessions/{session_id}/records
pub async fn list_session_records(
    State(state): State<AppState>,
    Path((course_id, session_id)): Path<(i64, i64)>,
) -> (StatusCode, Json<ApiResponse<Vec<RecordResponse>>>) {
    let db = state.db();

    let session_exists = SessionEntity::find()
        .filter(SessionCol::Id.eq(session_id))
        .filter(SessionCol::CourseId.eq(course_id))
        .one(db)
        .await;
    match session_exists {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("Attendance session not found")),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Failed to load session: {e}"))),
            );
        }
    }

    let records = match Record::find_by_session(db, session_id).await {
        Ok(rows) => rows,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Failed to list records: {e}"))),
            );
        }
    };

    // One query for all pending reviews instead of one per record.
    let record_ids: Vec<i64> = records.iter().map(|r| r.id).collect();
    let pending: HashSet<i64> = match verification_request::Entity::find()
        .filter(verification_request::Column::AttendanceRecordId.is_in(record_ids))
        .filter(verification_request::Column::Status.eq(verification_request::Status::Pending))
        .all(db)
        .await
    {
        Ok(rows) => rows.into_iter().map(|r| r.attendance_record_id).collect(),
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!(
                    "Failed to load verification state: {e}"
                ))),
            );
        }
    };

    let body = records
        .into_iter()
        .map(|r| {
            let verification_pending = pending.contains(&r.id);
            RecordResponse::new(r, verification_pending)
        })
        .collect();
    (
        StatusCode::OK,
        Json(ApiResponse::success(body, "Attendance records retrieved")),
    )
}

/// GET /api/courses/{course_id}/attendance/verifications
///
/// Pending selfie reviews for this course, oldest first.
pub async fn list_verifications(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
) -> (
    StatusCode,
    Json<ApiResponse<Vec<verification_request::Model>>>,
) {
    match Verification::list_pending(state.db(), Some(&[course_id])).await {
        Ok(rows) => (
            StatusCode::OK,
            Json(ApiResponse::success(rows, "Pending verifications retrieved")),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!(
                "Failed to list verifications: {e}"
            ))),
        ),
    }
}
