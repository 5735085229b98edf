use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter};
use util::state::AppState;
use validator::Validate;

use super::common::{EditSessionReq, SessionResponse};
use crate::response::ApiResponse;
use db::models::attendance_session::{
    ActiveModel as SessionActive, Column as SessionCol, Entity as SessionEntity, Model as Sess,
};

/// PUT /api/courses/{course_id}/attendance/sessions/{session_id}
///
/// Edits the title and/or flips the active flag (activate / close).
pub async fn edit_session(
    State(state): State<AppState>,
    Path((course_id, session_id)): Path<(i64, i64)>,
    Json(body): Json<EditSessionReq>,
) -> (StatusCode, Json<ApiResponse<Option<SessionResponse>>>) {
    if let Err(e) = body.validate() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::error(format!("Invalid session edit: {e}"))),
        );
    }

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

    let mut session = session;
    if let Some(title) = body.title {
        let mut am: SessionActive = session.into();
        am.title = Set(title);
        am.updated_at = Set(Utc::now());
        session = match am.update(db).await {
            Ok(s) => s,
            Err(e) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error(format!("Failed to update session: {e}"))),
                );
            }
        };
    }

    if let Some(active) = body.active {
        session = match Sess::set_active(db, session.id, active).await {
            Ok(s) => s,
            Err(e) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error(format!("Failed to update session: {e}"))),
                );
            }
        };
    }

    (
        StatusCode::OK,
        Json(ApiResponse::success(
            Some(SessionResponse::from(session)),
            "Attendance session updated",
        )),
    )
}
