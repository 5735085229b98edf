use chrono::{DateTime, Utc};
use db::device::DeviceSignals;
use db::geo::LocationSample;
use db::models::attendance_record::Status;
use db::models::verification_request::Decision;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: i64,
    pub course_id: i64,
    pub created_by: i64,
    pub title: String,
    pub start_at: String,
    pub end_at: String,
    pub active: bool,
    pub late_threshold_minutes: i32,
    pub fence_lat: f64,
    pub fence_lng: f64,
    pub fence_radius_m: f64,
    pub selfie_required: bool,
    pub created_at: String,
    pub updated_at: String,
}

// The live token is deliberately absent here; it is only exposed through the
// dedicated token endpoint.
impl From<db::models::attendance_session::Model> for SessionResponse {
    fn from(m: db::models::attendance_session::Model) -> Self {
        Self {
            id: m.id,
            course_id: m.course_id,
            created_by: m.created_by,
            title: m.title,
            start_at: m.start_at.to_rfc3339(),
            end_at: m.end_at.to_rfc3339(),
            active: m.active,
            late_threshold_minutes: m.late_threshold_minutes,
            fence_lat: m.fence_lat,
            fence_lng: m.fence_lng,
            fence_radius_m: m.fence_radius_m,
            selfie_required: m.selfie_required,
            created_at: m.created_at.to_rfc3339(),
            updated_at: m.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub issued_at: String,
    pub expires_at: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionReq {
    #[validate(length(min = 1, max = 120))]
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub late_threshold_minutes: Option<i32>,
    #[validate(range(min = -90.0, max = 90.0))]
    pub fence_lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub fence_lng: f64,
    #[validate(range(min = 1.0, max = 10_000.0))]
    pub fence_radius_m: f64,
    pub selfie_required: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EditSessionReq {
    #[validate(length(min = 1, max = 120))]
    pub title: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitReq {
    pub token: String,
    pub samples: Vec<LocationSample>,
    #[serde(default)]
    pub device: DeviceSignals,
    pub selfie_ref: Option<String>,
    pub scanned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub id: i64,
    pub session_id: i64,
    pub student_id: i64,
    pub status: Status,
    pub distance_m: f64,
    pub accuracy_m: f64,
    pub device_flagged: bool,
    pub selfie_ref: Option<String>,
    pub verification_pending: bool,
    pub scanned_at: String,
}

impl RecordResponse {
    pub fn new(m: db::models::attendance_record::Model, verification_pending: bool) -> Self {
        Self {
            id: m.id,
            session_id: m.session_id,
            student_id: m.student_id,
            status: m.status,
            distance_m: m.distance_m,
            accuracy_m: m.accuracy_m,
            device_flagged: m.device_flagged,
            selfie_ref: m.selfie_ref,
            verification_pending,
            scanned_at: m.scanned_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveReq {
    pub decision: Decision,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct OverrideReq {
    pub new_status: Status,
    #[validate(length(min = 5))]
    pub reason: String,
}
