use crate::models::attendance_record::{self, Status};
use crate::policy::Policy;
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::entity::prelude::*;
use sea_orm::{ColumnTrait, ConnectionTrait, QueryFilter, QueryOrder, TransactionTrait};
use serde::Serialize;
use thiserror::Error;

/// One manual status override. Entries are append-only: corrections append a
/// new entry rather than editing an old one, so the ledger always replays to
/// the record's current status.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "override_audit_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub attendance_record_id: i64,
    pub old_status: Status,
    pub new_status: Status,
    pub reviewer_id: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::attendance_record::Entity",
        from = "Column::AttendanceRecordId",
        to = "super::attendance_record::Column::Id"
    )]
    Record,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::ReviewerId",
        to = "super::user::Column::Id"
    )]
    Reviewer,
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
pub enum OverrideError {
    #[error("Attendance record not found")]
    RecordNotFound,

    #[error("Override reason must be at least {min} characters")]
    ReasonTooShort { min: usize },

    #[error(transparent)]
    Db(#[from] DbErr),
}

/// What an override produced: the ledger entry and the updated record.
#[derive(Debug)]
pub struct Override {
    pub entry: Model,
    pub record: attendance_record::Model,
}

impl Model {
    /// Appends an override entry and moves the record to `new_status` in one
    /// transaction. The reason is mandatory and checked against the policy
    /// minimum before anything is written.
    pub async fn append(
        db: &DatabaseConnection,
        record_id: i64,
        new_status: Status,
        reviewer_id: i64,
        reason: &str,
        policy: &Policy,
        now: DateTime<Utc>,
    ) -> Result<Override, OverrideError> {
        let reason = reason.trim();
        if reason.len() < policy.min_reason_len {
            return Err(OverrideError::ReasonTooShort {
                min: policy.min_reason_len,
            });
        }

        let txn = db.begin().await?;

        let record = attendance_record::Entity::find_by_id(record_id)
            .one(&txn)
            .await?
            .ok_or(OverrideError::RecordNotFound)?;
        let old_status = record.status;

        let entry = ActiveModel {
            id: NotSet,
            attendance_record_id: Set(record_id),
            old_status: Set(old_status),
            new_status: Set(new_status),
            reviewer_id: Set(reviewer_id),
            reason: Set(reason.to_owned()),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut am: attendance_record::ActiveModel = record.into();
        am.status = Set(new_status);
        am.updated_at = Set(now);
        let record = am.update(&txn).await?;

        txn.commit().await?;
        Ok(Override { entry, record })
    }

    /// Full override history for a record, oldest first.
    pub async fn list_for_record<C>(conn: &C, record_id: i64) -> Result<Vec<Self>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::AttendanceRecordId.eq(record_id))
            .order_by_asc(Column::Id)
            .all(conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attendance_record::SubmissionEvidence;
    use crate::models::attendance_session::NewSession;
    use crate::models::{attendance_session, course, user};
    use crate::test_utils::setup_test_db;
    use chrono::Duration;

    async fn seed_record(db: &DatabaseConnection) -> (attendance_record::Model, user::Model) {
        let lecturer = user::Model::create(db, "lect", "lect@test.com", false)
            .await
            .unwrap();
        let student = user::Model::create(db, "stud", "stud@test.com", false)
            .await
            .unwrap();
        let course = course::Model::create(db, "COS301", "Software Engineering")
            .await
            .unwrap();
        let now = Utc::now();
        let session = attendance_session::Model::create(
            db,
            NewSession {
                course_id: course.id,
                created_by: lecturer.id,
                title: "Lecture".into(),
                start_at: now - Duration::minutes(2),
                end_at: now + Duration::hours(2),
                late_threshold_minutes: 10,
                fence_lat: -6.3460957,
                fence_lng: 106.6915144,
                fence_radius_m: 100.0,
                selfie_required: false,
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
                selfie_ref: None,
                scanned_at: now,
            },
            &Policy::default(),
            now,
        )
        .await
        .unwrap();
        (outcome.record, lecturer)
    }

    #[tokio::test]
    async fn override_appends_and_updates_the_record() {
        let db = setup_test_db().await;
        let (record, reviewer) = seed_record(&db).await;
        assert_eq!(record.status, Status::Present);

        let result = Model::append(
            &db,
            record.id,
            Status::Late,
            reviewer.id,
            "Student arrived after the scan closed",
            &Policy::default(),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(result.entry.old_status, Status::Present);
        assert_eq!(result.entry.new_status, Status::Late);
        assert_eq!(result.record.status, Status::Late);
    }

    #[tokio::test]
    async fn short_reason_is_refused_before_writing() {
        let db = setup_test_db().await;
        let (record, reviewer) = seed_record(&db).await;

        let err = Model::append(
            &db,
            record.id,
            Status::Rejected,
            reviewer.id,
            "  ok ",
            &Policy::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OverrideError::ReasonTooShort { min: 5 }));
        assert!(Model::list_for_record(&db, record.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_overrides_keep_every_entry_and_newest_wins() {
        let db = setup_test_db().await;
        let (record, reviewer) = seed_record(&db).await;
        let policy = Policy::default();

        Model::append(
            &db,
            record.id,
            Status::Rejected,
            reviewer.id,
            "Suspected proxy scan",
            &policy,
            Utc::now(),
        )
        .await
        .unwrap();
        Model::append(
            &db,
            record.id,
            Status::Present,
            reviewer.id,
            "Cleared after talking to the student",
            &policy,
            Utc::now(),
        )
        .await
        .unwrap();

        let entries = Model::list_for_record(&db, record.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].old_status, Status::Present);
        assert_eq!(entries[0].new_status, Status::Rejected);
        assert_eq!(entries[1].old_status, Status::Rejected);
        assert_eq!(entries[1].new_status, Status::Present);

        let stored = attendance_record::Entity::find_by_id(record.id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, Status::Present);
    }

    #[tokio::test]
    async fn missing_record_is_reported() {
        let db = setup_test_db().await;
        let (_, reviewer) = seed_record(&db).await;

        let err = Model::append(
            &db,
            9999,
            Status::Present,
            reviewer.id,
            "Does not exist",
            &Policy::default(),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OverrideError::RecordNotFound));
    }
}
