use crate::models::attendance_record;
use crate::models::attendance_session;
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, JoinType, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pending identity review attached to a provisional attendance record.
/// One request per record; resolution is terminal.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "verification_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub attendance_record_id: i64,
    pub status: Status,
    pub reviewer_id: Option<i64>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::attendance_record::Entity",
        from = "Column::AttendanceRecordId",
        to = "super::attendance_record::Column::Id"
    )]
    Record,
}

impl Related<super::attendance_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Record.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Verification request not found")]
    NotFound,

    #[error("Verification request was already resolved")]
    AlreadyResolved,

    #[error("Rejecting a verification requires a reason")]
    ReasonRequired,

    #[error(transparent)]
    Db(#[from] DbErr),
}

/// What a resolution produced: the resolved request, the record it covers and
/// the status the record held before resolution.
#[derive(Debug)]
pub struct Resolution {
    pub request: Model,
    pub record: attendance_record::Model,
    pub old_status: attendance_record::Status,
}

impl Model {
    /// Inserts a pending request for a record. Called from inside the submit
    /// transaction so record and request commit together.
    pub async fn enqueue<C>(conn: &C, record_id: i64, now: DateTime<Utc>) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        ActiveModel {
            id: NotSet,
            attendance_record_id: Set(record_id),
            status: Set(Status::Pending),
            reviewer_id: Set(None),
            resolved_at: Set(None),
            reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await
    }

    /// Pending queue, oldest first. `course_ids = None` means unscoped
    /// (admin); otherwise only requests whose session belongs to one of the
    /// given courses are returned.
    pub async fn list_pending<C>(
        conn: &C,
        course_ids: Option<&[i64]>,
    ) -> Result<Vec<Self>, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut query = Entity::find().filter(Column::Status.eq(Status::Pending));

        if let Some(ids) = course_ids {
            query = query
                .join(JoinType::InnerJoin, Relation::Record.def())
                .join(
                    JoinType::InnerJoin,
                    attendance_record::Relation::Session.def(),
                )
                .filter(attendance_session::Column::CourseId.is_in(ids.iter().copied()));
        }

        query.order_by_asc(Column::CreatedAt).all(conn).await
    }

    /// Resolves a pending request.
    ///
    /// The status flip is a guarded UPDATE (`WHERE status = 'pending'`), so
    /// two reviewers racing on the same request see exactly one winner and
    /// one `AlreadyResolved`. Rejection flips the underlying record to
    /// `rejected` in the same transaction and requires a reason.
    pub async fn resolve(
        db: &DatabaseConnection,
        request_id: i64,
        decision: Decision,
        reviewer_id: i64,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Resolution, ReviewError> {
        let reason = reason.map(|r| r.trim().to_owned()).filter(|r| !r.is_empty());
        if decision == Decision::Reject && reason.is_none() {
            return Err(ReviewError::ReasonRequired);
        }

        let txn = db.begin().await?;

        let request = Entity::find_by_id(request_id)
            .one(&txn)
            .await?
            .ok_or(ReviewError::NotFound)?;

        let new_status = match decision {
            Decision::Approve => Status::Approved,
            Decision::Reject => Status::Rejected,
        };

        let update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(new_status))
            .col_expr(Column::ReviewerId, Expr::value(Some(reviewer_id)))
            .col_expr(Column::ResolvedAt, Expr::value(Some(now)))
            .col_expr(Column::Reason, Expr::value(reason))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(request_id))
            .filter(Column::Status.eq(Status::Pending))
            .exec(&txn)
            .await?;
        if update.rows_affected == 0 {
            return Err(ReviewError::AlreadyResolved);
        }

        let record = attendance_record::Entity::find_by_id(request.attendance_record_id)
            .one(&txn)
            .await?
            .ok_or(ReviewError::NotFound)?;
        let old_status = record.status;

        // Approval keeps the provisional status; rejection overturns it.
        let record = if decision == Decision::Reject {
            let mut am: attendance_record::ActiveModel = record.into();
            am.status = Set(attendance_record::Status::Rejected);
            am.updated_at = Set(now);
            am.update(&txn).await?
        } else {
            record
        };

        let request = Entity::find_by_id(request_id)
            .one(&txn)
            .await?
            .ok_or(ReviewError::NotFound)?;

        txn.commit().await?;
        Ok(Resolution {
            request,
            record,
            old_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attendance_record::{Status as RecordStatus, SubmissionEvidence};
    use crate::models::attendance_session::NewSession;
    use crate::models::{attendance_record, attendance_session, course, course_role, user};
    use crate::policy::Policy;
    use crate::test_utils::setup_test_db;
    use chrono::Duration;

    struct Fixture {
        reviewer: user::Model,
        course: course::Model,
        request: Model,
        record: attendance_record::Model,
    }

    async fn submit_with_selfie(db: &DatabaseConnection) -> Fixture {
        let reviewer = user::Model::create(db, "lect", "lect@test.com", false)
            .await
            .unwrap();
        let student = user::Model::create(db, "stud", "stud@test.com", false)
            .await
            .unwrap();
        let course = course::Model::create(db, "COS301", "Software Engineering")
            .await
            .unwrap();
        course_role::Model::assign(db, reviewer.id, course.id, course_role::Role::Instructor)
            .await
            .unwrap();

        let now = Utc::now();
        let session = attendance_session::Model::create(
            db,
            NewSession {
                course_id: course.id,
                created_by: reviewer.id,
                title: "Lecture".into(),
                start_at: now - Duration::minutes(2),
                end_at: now + Duration::hours(2),
                late_threshold_minutes: 10,
                fence_lat: -6.3460957,
                fence_lng: 106.6915144,
                fence_radius_m: 100.0,
                selfie_required: true,
            },
        )
        .await
        .unwrap();

        let samples = (0..3)
            .map(|i| crate::geo::LocationSample {
                lat: -6.3461000,
                lng: 106.6915200,
                accuracy_m: 10.0 + i as f64,
                captured_at: now - Duration::seconds(3 - i),
            })
            .collect();
        let outcome = attendance_record::Model::submit(
            db,
            session.id,
            student.id,
            SubmissionEvidence {
                token: session.token.clone(),
                samples,
                device_hash: "devhash".into(),
                selfie_ref: Some("selfies/abc.jpg".into()),
                scanned_at: now,
            },
            &Policy::default(),
            now,
        )
        .await
        .unwrap();

        Fixture {
            reviewer,
            course,
            request: outcome.verification.unwrap(),
            record: outcome.record,
        }
    }

    #[tokio::test]
    async fn approval_keeps_the_provisional_status() {
        let db = setup_test_db().await;
        let fx = submit_with_selfie(&db).await;

        let resolution = Model::resolve(
            &db,
            fx.request.id,
            Decision::Approve,
            fx.reviewer.id,
            None,
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(resolution.request.status, Status::Approved);
        assert_eq!(resolution.request.reviewer_id, Some(fx.reviewer.id));
        assert!(resolution.request.resolved_at.is_some());
        assert_eq!(resolution.record.status, RecordStatus::Present);
        assert_eq!(resolution.old_status, RecordStatus::Present);
    }

    #[tokio::test]
    async fn rejection_overturns_the_record() {
        let db = setup_test_db().await;
        let fx = submit_with_selfie(&db).await;

        let resolution = Model::resolve(
            &db,
            fx.request.id,
            Decision::Reject,
            fx.reviewer.id,
            Some("Photo does not match enrolled student".into()),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(resolution.request.status, Status::Rejected);
        assert_eq!(resolution.old_status, RecordStatus::Present);
        assert_eq!(resolution.record.status, RecordStatus::Rejected);

        let stored = attendance_record::Entity::find_by_id(fx.record.id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, RecordStatus::Rejected);
    }

    #[tokio::test]
    async fn rejection_without_reason_is_refused() {
        let db = setup_test_db().await;
        let fx = submit_with_selfie(&db).await;

        let err = Model::resolve(
            &db,
            fx.request.id,
            Decision::Reject,
            fx.reviewer.id,
            Some("   ".into()),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReviewError::ReasonRequired));
    }

    #[tokio::test]
    async fn second_resolution_sees_already_resolved() {
        let db = setup_test_db().await;
        let fx = submit_with_selfie(&db).await;

        Model::resolve(
            &db,
            fx.request.id,
            Decision::Approve,
            fx.reviewer.id,
            None,
            Utc::now(),
        )
        .await
        .unwrap();

        let err = Model::resolve(
            &db,
            fx.request.id,
            Decision::Reject,
            fx.reviewer.id,
            Some("changed my mind".into()),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReviewError::AlreadyResolved));
    }

    #[tokio::test]
    async fn pending_queue_is_scoped_to_courses() {
        let db = setup_test_db().await;
        let fx = submit_with_selfie(&db).await;

        let all = Model::list_pending(&db, None).await.unwrap();
        assert_eq!(all.len(), 1);

        let scoped = Model::list_pending(&db, Some(&[fx.course.id])).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, fx.request.id);

        let other = Model::list_pending(&db, Some(&[fx.course.id + 999]))
            .await
            .unwrap();
        assert!(other.is_empty());

        Model::resolve(
            &db,
            fx.request.id,
            Decision::Approve,
            fx.reviewer.id,
            None,
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(Model::list_pending(&db, None).await.unwrap().is_empty());
    }
}
