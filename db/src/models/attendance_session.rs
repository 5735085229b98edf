use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, QueryFilter};
use serde::Serialize;

/// A scheduled attendance window for a course, with its geofence and the
/// currently live check-in token.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "attendance_sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub course_id: i64,
    pub created_by: i64,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub active: bool,
    pub late_threshold_minutes: i32,
    pub fence_lat: f64,
    pub fence_lng: f64,
    pub fence_radius_m: f64,
    pub selfie_required: bool,
    #[serde(skip_serializing)]
    pub token: String,
    pub token_issued_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of checking a presented token against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    Valid,
    /// Token text matches but its rotation window has lapsed.
    Expired,
    /// Token text does not match the current token.
    Mismatched,
    /// Session is closed; no token is accepted.
    Inactive,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::course::Entity",
        from = "Column::CourseId",
        to = "super::course::Column::Id"
    )]
    Course,
    #[sea_orm(has_many = "super::attendance_record::Entity")]
    Records,
}

impl Related<super::course::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Course.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl Related<super::attendance_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Records.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Random 20-character uppercase alphanumeric check-in token.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}

pub struct NewSession {
    pub course_id: i64,
    pub created_by: i64,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub late_threshold_minutes: i32,
    pub fence_lat: f64,
    pub fence_lng: f64,
    pub fence_radius_m: f64,
    pub selfie_required: bool,
}

impl Model {
    /// Creates a session with a freshly issued token. Sessions start active.
    pub async fn create(db: &DatabaseConnection, new: NewSession) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            id: NotSet,
            course_id: Set(new.course_id),
            created_by: Set(new.created_by),
            title: Set(new.title),
            start_at: Set(new.start_at),
            end_at: Set(new.end_at),
            active: Set(true),
            late_threshold_minutes: Set(new.late_threshold_minutes),
            fence_lat: Set(new.fence_lat),
            fence_lng: Set(new.fence_lng),
            fence_radius_m: Set(new.fence_radius_m),
            selfie_required: Set(new.selfie_required),
            token: Set(generate_token()),
            token_issued_at: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
    }

    /// Replaces the live token in a single UPDATE so two concurrent rotations
    /// cannot leave the token and its issue time out of step. Returns the
    /// refreshed row.
    pub async fn rotate_token(db: &DatabaseConnection, session_id: i64) -> Result<Self, DbErr> {
        let now = Utc::now();
        Entity::update_many()
            .col_expr(Column::Token, Expr::value(generate_token()))
            .col_expr(Column::TokenIssuedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(session_id))
            .exec(db)
            .await?;

        Entity::find_by_id(session_id)
            .one(db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("attendance session {session_id}")))
    }

    pub async fn set_active(
        db: &DatabaseConnection,
        session_id: i64,
        active: bool,
    ) -> Result<Self, DbErr> {
        let session = Entity::find_by_id(session_id)
            .one(db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("attendance session {session_id}")))?;

        let mut am: ActiveModel = session.into();
        am.active = Set(active);
        am.updated_at = Set(Utc::now());
        am.update(db).await
    }

    pub async fn find_by_course<C>(conn: &C, course_id: i64) -> Result<Vec<Self>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::CourseId.eq(course_id))
            .all(conn)
            .await
    }

    /// Checks a presented token against this row. Pure over the row state so
    /// the orchestrator can call it on a row re-read inside a transaction.
    pub fn check_token(&self, presented: &str, now: DateTime<Utc>, ttl: Duration) -> TokenCheck {
        if !self.active {
            return TokenCheck::Inactive;
        }
        if presented != self.token {
            return TokenCheck::Mismatched;
        }
        if now - self.token_issued_at > ttl {
            return TokenCheck::Expired;
        }
        TokenCheck::Valid
    }

    /// Classifies a scan time against the session window.
    ///
    /// On-time up to and including `start + late_threshold`, late up to and
    /// including the session end, rejected after that.
    pub fn classify_scan(&self, scanned_at: DateTime<Utc>) -> super::attendance_record::Status {
        use super::attendance_record::Status;

        let on_time_until = self.start_at + Duration::minutes(self.late_threshold_minutes as i64);
        if scanned_at <= on_time_until {
            Status::Present
        } else if scanned_at <= self.end_at {
            Status::Late
        } else {
            Status::Rejected
        }
    }
}
