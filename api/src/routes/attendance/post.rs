use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{Duration, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use util::events::{StatusCause, StatusEvent};
use util::{config, state::AppState};
use validator::Validate;

use super::common::{
    CreateSessionReq, OverrideReq, RecordResponse, ResolveReq, SessionResponse, SubmitReq,
    TokenResponse,
};
use crate::auth::AuthUser;
use crate::response::ApiResponse;
use db::models::attendance_record::{
    Model as Record, Status, SubmissionError, SubmissionEvidence,
};
use db::models::attendance_session::{
    Column as SessionCol, Entity as SessionEntity, Model as Sess, NewSession,
};
use db::models::override_audit_entry::{Model as OverrideEntry, OverrideError};
use db::models::verification_request::{Model as Verification, ReviewError};
use db::policy::Policy;

fn status_event(
    record: &db::models::attendance_record::Model,
    old_status: Option<Status>,
    cause: StatusCause,
) -> StatusEvent {
    StatusEvent {
        record_id: record.id,
        session_id: record.session_id,
        student_id: record.student_id,
        old_status: old_status.map(|s| s.to_string()),
        new_status: record.status.to_string(),
        cause,
        occurred_at: Utc::now(),
    }
}

/// POST /api/courses/{course_id}/attendance/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Json(body): Json<CreateSessionReq>,
) -> (StatusCode, Json<ApiResponse<Option<SessionResponse>>>) {
    if let Err(e) = body.validate() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::error(format!("Invalid session: {e}"))),
        );
    }
    if body.end_at <= body.start_at {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::error("Session must end after it starts")),
        );
    }

    let late_threshold = body
        .late_threshold_minutes
        .unwrap_or(config::late_threshold_minutes() as i32);

    match Sess::create(
        state.db(),
        NewSession {
            course_id,
            created_by: claims.sub,
            title: body.title,
            start_at: body.start_at,
            end_at: body.end_at,
            late_threshold_minutes: late_threshold,
            fence_lat: body.fence_lat,
            fence_lng: body.fence_lng,
            fence_radius_m: body.fence_radius_m,
            selfie_required: body.selfie_required.unwrap_or(false),
        },
    )
    .await
    {
        Ok(row) => (
            StatusCode::CREATED,
            Json(ApiResponse::success(
                Some(SessionResponse::from(row)),
                "Attendance session created",
            )),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!(
                "Failed to create attendance session: {e}"
            ))),
        ),
    }
}

/// POST /api/courses/{course_id}/attendance/sessions/{session_id}/token
///
/// Rotates the check-in token; the previous token stops validating at once.
pub async fn rotate_session_token(
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

    match Sess::rotate_token(db, session.id).await {
        Ok(rotated) => {
            let ttl = Duration::seconds(config::token_ttl_seconds() as i64);
            (
                StatusCode::OK,
                Json(ApiResponse::success(
                    Some(TokenResponse {
                        token: rotated.token.clone(),
                        issued_at: rotated.token_issued_at.to_rfc3339(),
                        expires_at: (rotated.token_issued_at + ttl).to_rfc3339(),
                    }),
                    "Session token rotated",
                )),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Failed to rotate token: {e}"))),
        ),
    }
}

/// POST /api/courses/{course_id}/attendance/sessions/{session_id}/submissions
///
/// Student check-in. A rejected fence or window verdict is a business outcome
/// (200 with status `rejected`); token and evidence failures are errors and
/// leave no record.
pub async fn submit_attendance(
    State(state): State<AppState>,
    Path((course_id, session_id)): Path<(i64, i64)>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Json(body): Json<SubmitReq>,
) -> (StatusCode, Json<ApiResponse<Option<RecordResponse>>>) {
    let db = state.db();
    let now = Utc::now();

    // The session must belong to the course in the path.
    let in_course = SessionEntity::find()
        .filter(SessionCol::Id.eq(session_id))
        .filter(SessionCol::CourseId.eq(course_id))
        .one(db)
        .await;
    match in_course {
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

    let evidence = SubmissionEvidence {
        token: body.token,
        samples: body.samples,
        device_hash: db::device::fingerprint(&body.device),
        selfie_ref: body.selfie_ref,
        scanned_at: body.scanned_at.unwrap_or(now),
    };
    let policy = Policy::from_config();

    match Record::submit(db, session_id, claims.sub, evidence, &policy, now).await {
        Ok(outcome) => {
            state
                .events()
                .emit(status_event(&outcome.record, None, StatusCause::Submission));

            let message = match outcome.record.status {
                Status::Present => "Attendance recorded",
                Status::Late => "Attendance recorded as late",
                Status::Rejected => "Submission rejected",
            };
            let pending = outcome.verification.is_some();
            (
                StatusCode::OK,
                Json(ApiResponse::success(
                    Some(RecordResponse::new(outcome.record, pending)),
                    message,
                )),
            )
        }
        Err(e) => {
            let status = match &e {
                SubmissionError::SessionNotFound => StatusCode::NOT_FOUND,
                SubmissionError::TokenInvalid | SubmissionError::TokenExpired => {
                    StatusCode::BAD_REQUEST
                }
                SubmissionError::Duplicate => StatusCode::CONFLICT,
                SubmissionError::Evidence(_) | SubmissionError::SelfieRequired => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                SubmissionError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                tracing::error!(error = %e, session_id, student = claims.sub, "Submission failed");
                return (status, Json(ApiResponse::error("Failed to record attendance")));
            }
            (status, Json(ApiResponse::error_with_code(e.to_string(), e.code())))
        }
    }
}

/// POST /api/courses/{course_id}/attendance/verifications/{request_id}/resolve
pub async fn resolve_verification(
    State(state): State<AppState>,
    Path((course_id, request_id)): Path<(i64, i64)>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Json(body): Json<ResolveReq>,
) -> (
    StatusCode,
    Json<ApiResponse<Option<db::models::verification_request::Model>>>,
) {
    let db = state.db();

    // Scope the request to the course before touching it.
    let scoped = db::models::verification_request::Entity::find_by_id(request_id)
        .find_also_related(db::models::attendance_record::Entity)
        .one(db)
        .await;
    let session_id = match scoped {
        Ok(Some((_, Some(record)))) => record.session_id,
        Ok(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("Verification request not found")),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!(
                    "Failed to load verification: {e}"
                ))),
            );
        }
    };
    let in_course = SessionEntity::find()
        .filter(SessionCol::Id.eq(session_id))
        .filter(SessionCol::CourseId.eq(course_id))
        .one(db)
        .await;
    match in_course {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("Verification request not found")),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Failed to load session: {e}"))),
            );
        }
    }

    match Verification::resolve(
        db,
        request_id,
        body.decision,
        claims.sub,
        body.reason,
        Utc::now(),
    )
    .await
    {
        Ok(resolution) => {
            state.events().emit(status_event(
                &resolution.record,
                Some(resolution.old_status),
                StatusCause::Review,
            ));
            (
                StatusCode::OK,
                Json(ApiResponse::success(
                    Some(resolution.request),
                    "Verification resolved",
                )),
            )
        }
        Err(ReviewError::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Verification request not found")),
        ),
        Err(ReviewError::AlreadyResolved) => (
            StatusCode::CONFLICT,
            Json(ApiResponse::error("Verification request was already resolved")),
        ),
        Err(ReviewError::ReasonRequired) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::error("Rejecting a verification requires a reason")),
        ),
        Err(ReviewError::Db(e)) => {
            tracing::error!(error = %e, request_id, "Verification resolution failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to resolve verification")),
            )
        }
    }
}

/// POST /api/courses/{course_id}/attendance/records/{record_id}/override
///
/// Manual status override; every call appends to the audit ledger.
pub async fn override_record(
    State(state): State<AppState>,
    Path((course_id, record_id)): Path<(i64, i64)>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Json(body): Json<OverrideReq>,
) -> (StatusCode, Json<ApiResponse<Option<RecordResponse>>>) {
    if let Err(e) = body.validate() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::error(format!("Invalid override: {e}"))),
        );
    }

    let db = state.db();

    // The record must belong to a session of the course in the path.
    let record = match db::models::attendance_record::Entity::find_by_id(record_id)
        .find_also_related(SessionEntity)
        .one(db)
        .await
    {
        Ok(Some((record, Some(session)))) if session.course_id == course_id => record,
        Ok(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("Attendance record not found")),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(format!("Failed to load record: {e}"))),
            );
        }
    };

    match OverrideEntry::append(
        db,
        record.id,
        body.new_status,
        claims.sub,
        &body.reason,
        &Policy::from_config(),
        Utc::now(),
    )
    .await
    {
        Ok(result) => {
            state.events().emit(status_event(
                &result.record,
                Some(result.entry.old_status),
                StatusCause::Override,
            ));
            (
                StatusCode::OK,
                Json(ApiResponse::success(
                    Some(RecordResponse::new(result.record, false)),
                    "Attendance status overridden",
                )),
            )
        }
        Err(OverrideError::RecordNotFound) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Attendance record not found")),
        ),
        Err(OverrideError::ReasonTooShort { min }) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::error(format!(
                "Override reason must be at least {min} characters"
            ))),
        ),
        Err(OverrideError::Db(e)) => {
            tracing::error!(error = %e, record_id, "Override failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to override attendance status")),
            )
        }
    }
}
