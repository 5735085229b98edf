use crate::auth::claims::AuthUser;
use crate::response::ApiResponse;
use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, Path, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use db::models::course_role::{Model as CourseRole, Role};
use sea_orm::DatabaseConnection;
use std::collections::HashMap;
use util::state::AppState;

#[derive(serde::Serialize, Default)]
pub struct Empty;

/// Extracts and validates the user from the request, then re-inserts the
/// claims into the request extensions for handlers downstream.
async fn extract_and_insert_authuser(
    req: Request<Body>,
) -> Result<(Request<Body>, AuthUser), (StatusCode, Json<ApiResponse<Empty>>)> {
    let (mut parts, body) = req.into_parts();
    let user = AuthUser::from_request_parts(&mut parts, &())
        .await
        .map_err(|_| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::error("Authentication required")),
            )
        })?;

    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(user.clone());
    Ok((req, user))
}

/// True when the user holds `role` in the course. Denies on database errors.
async fn has_course_role(
    db: &DatabaseConnection,
    user_id: i64,
    course_id: i64,
    role: Role,
) -> bool {
    match CourseRole::user_has_role(db, user_id, course_id, role.clone()).await {
        Ok(held) => held,
        Err(e) => {
            tracing::warn!(
                error = %e,
                user_id, course_id, role = %role,
                "DB error while checking role; denying access"
            );
            false
        }
    }
}

/// Course-scoped role guard. Admins pass unconditionally; everyone else must
/// hold the required role in the `course_id` taken from the route path.
async fn allow_role_base(
    state: AppState,
    params: HashMap<String, String>,
    req: Request<Body>,
    next: Next,
    required: Role,
) -> Result<Response, (StatusCode, Json<ApiResponse<Empty>>)> {
    let (req, user) = extract_and_insert_authuser(req).await?;

    let course_id = params
        .get("course_id")
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Missing or invalid course_id")),
        ))?;

    if user.0.admin {
        return Ok(next.run(req).await);
    }

    if has_course_role(state.db(), user.0.sub, course_id, required).await {
        Ok(next.run(req).await)
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Not permitted")),
        ))
    }
}

/// Guard for instructor-only routes within a course.
pub async fn allow_instructor(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<Empty>>)> {
    allow_role_base(state, params, req, next, Role::Instructor).await
}

/// Guard for student routes within a course (attendance submission).
pub async fn allow_student(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<Empty>>)> {
    allow_role_base(state, params, req, next, Role::Student).await
}
