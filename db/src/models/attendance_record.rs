use crate::device::{self, DeviceCheck};
use crate::geo::{self, GeoError, LocationSample};
use crate::policy::Policy;
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::entity::prelude::*;
use sea_orm::{ColumnTrait, ConnectionTrait, QueryFilter, QueryOrder, SqlErr, TransactionTrait};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One student's attendance outcome for one session. At most one row per
/// (session, student) pair, enforced by a UNIQUE index.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "attendance_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_id: i64,
    pub student_id: i64,
    pub status: Status,
    pub distance_m: f64,
    pub accuracy_m: f64,
    pub device_hash: String,
    pub device_flagged: bool,
    pub selfie_ref: Option<String>,
    pub scanned_at: DateTime<Utc>,
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
    #[sea_orm(string_value = "present")]
    Present,
    #[sea_orm(string_value = "late")]
    Late,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::attendance_session::Entity",
        from = "Column::SessionId",
        to = "super::attendance_session::Column::Id"
    )]
    Session,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::StudentId",
        to = "super::user::Column::Id"
    )]
    Student,
    #[sea_orm(has_one = "super::verification_request::Entity")]
    VerificationRequest,
}

impl Related<super::attendance_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl Related<super::verification_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VerificationRequest.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Everything a submission carries besides the identifiers in the path.
#[derive(Debug, Clone)]
pub struct SubmissionEvidence {
    pub token: String,
    pub samples: Vec<LocationSample>,
    pub device_hash: String,
    pub selfie_ref: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

/// Request-level submission failures. None of these leave a record behind.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Attendance session not found")]
    SessionNotFound,

    #[error("Token does not match the session's current token")]
    TokenInvalid,

    #[error("Token has expired; ask for a fresh one")]
    TokenExpired,

    #[error("Attendance already recorded for this session")]
    Duplicate,

    #[error(transparent)]
    Evidence(#[from] GeoError),

    #[error("This session requires a selfie")]
    SelfieRequired,

    #[error(transparent)]
    Db(#[from] DbErr),
}

impl SubmissionError {
    pub fn code(&self) -> &'static str {
        match self {
            SubmissionError::SessionNotFound => "session_not_found",
            SubmissionError::TokenInvalid => "token_invalid",
            SubmissionError::TokenExpired => "token_expired",
            SubmissionError::Duplicate => "duplicate_submission",
            SubmissionError::Evidence(e) => e.code(),
            SubmissionError::SelfieRequired => "selfie_required_missing",
            SubmissionError::Db(_) => "internal",
        }
    }
}

/// What a successful submission produced.
#[derive(Debug)]
pub struct SubmissionOutcome {
    pub record: Model,
    pub verification: Option<super::verification_request::Model>,
}

impl Model {
    /// Runs the full submission pipeline in one transaction.
    ///
    /// The session row is re-read inside the transaction, so a rotation or
    /// deactivation that lands mid-flight is observed before anything is
    /// written. A rejected fence or window verdict still persists the record;
    /// only token, evidence and selfie failures roll back.
    pub async fn submit(
        db: &DatabaseConnection,
        session_id: i64,
        student_id: i64,
        evidence: SubmissionEvidence,
        policy: &Policy,
        now: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        use super::attendance_session::{self, TokenCheck};

        let txn = db.begin().await?;

        let session = attendance_session::Entity::find_by_id(session_id)
            .one(&txn)
            .await?
            .ok_or(SubmissionError::SessionNotFound)?;

        match session.check_token(&evidence.token, now, policy.token_ttl) {
            TokenCheck::Valid => {}
            TokenCheck::Expired => return Err(SubmissionError::TokenExpired),
            TokenCheck::Mismatched | TokenCheck::Inactive => {
                return Err(SubmissionError::TokenInvalid);
            }
        }

        // Pre-check for the common case; the unique index still backstops a
        // race between two in-flight submissions for the same pair.
        let existing = Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .filter(Column::StudentId.eq(student_id))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(SubmissionError::Duplicate);
        }

        let device_flagged = matches!(
            device::check_duplicate(&txn, session_id, &evidence.device_hash, student_id).await?,
            DeviceCheck::Duplicate
        );
        if device_flagged {
            tracing::warn!(session_id, student_id, "Device fingerprint already seen in session");
        }

        let best = geo::select_best_sample(&evidence.samples, policy.min_location_samples)?;
        let limits = policy.batch_limits(session.fence_radius_m);
        geo::check_consistency(&evidence.samples, best, &limits, now)?;
        if best.accuracy_m > limits.accuracy_limit_m {
            return Err(GeoError::AccuracyTooLow {
                accuracy_m: best.accuracy_m,
                limit_m: limits.accuracy_limit_m,
            }
            .into());
        }

        let verdict = geo::evaluate_fence(
            best.lat,
            best.lng,
            session.fence_lat,
            session.fence_lng,
            session.fence_radius_m,
        )?;

        let status = if verdict.inside {
            session.classify_scan(evidence.scanned_at)
        } else {
            Status::Rejected
        };

        let needs_selfie = session.selfie_required && status != Status::Rejected;
        if needs_selfie && evidence.selfie_ref.is_none() {
            return Err(SubmissionError::SelfieRequired);
        }

        let record = ActiveModel {
            id: NotSet,
            session_id: Set(session_id),
            student_id: Set(student_id),
            status: Set(status),
            distance_m: Set(verdict.distance_m),
            accuracy_m: Set(best.accuracy_m),
            device_hash: Set(evidence.device_hash.clone()),
            device_flagged: Set(device_flagged),
            selfie_ref: Set(evidence.selfie_ref.clone()),
            scanned_at: Set(evidence.scanned_at),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => SubmissionError::Duplicate,
            _ => SubmissionError::Db(e),
        })?;

        let verification = if needs_selfie {
            Some(super::verification_request::Model::enqueue(&txn, record.id, now).await?)
        } else {
            None
        };

        txn.commit().await?;
        Ok(SubmissionOutcome {
            record,
            verification,
        })
    }

    pub async fn find_one<C>(
        conn: &C,
        session_id: i64,
        student_id: i64,
    ) -> Result<Option<Self>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .filter(Column::StudentId.eq(student_id))
            .one(conn)
            .await
    }

    pub async fn find_by_session<C>(conn: &C, session_id: i64) -> Result<Vec<Self>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .order_by_asc(Column::ScannedAt)
            .all(conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attendance_session::{self, NewSession};
    use crate::models::{course, user};
    use crate::test_utils::setup_test_db;
    use chrono::Duration;

    async fn seed(
        db: &DatabaseConnection,
        selfie_required: bool,
    ) -> (attendance_session::Model, user::Model) {
        let lecturer = user::Model::create(db, "lect", "lect@test.com", false)
            .await
            .unwrap();
        let student = user::Model::create(db, "stud", "stud@test.com", false)
            .await
            .unwrap();
        let course = course::Model::create(db, "COS301", "Software Engineering")
            .await
            .unwrap();
        let start = Utc::now() - Duration::minutes(5);
        let session = attendance_session::Model::create(
            db,
            NewSession {
                course_id: course.id,
                created_by: lecturer.id,
                title: "Lecture".into(),
                start_at: start,
                end_at: start + Duration::hours(2),
                late_threshold_minutes: 10,
                fence_lat: -6.3460957,
                fence_lng: 106.6915144,
                fence_radius_m: 100.0,
                selfie_required,
            },
        )
        .await
        .unwrap();
        (session, student)
    }

    fn inside_samples(now: DateTime<Utc>) -> Vec<LocationSample> {
        vec![
            LocationSample {
                lat: -6.3461000,
                lng: 106.6915200,
                accuracy_m: 12.0,
                captured_at: now - Duration::seconds(4),
            },
            LocationSample {
                lat: -6.3461050,
                lng: 106.6915210,
                accuracy_m: 8.0,
                captured_at: now - Duration::seconds(2),
            },
            LocationSample {
                lat: -6.3460990,
                lng: 106.6915190,
                accuracy_m: 20.0,
                captured_at: now,
            },
        ]
    }

    fn evidence(token: &str, samples: Vec<LocationSample>, now: DateTime<Utc>) -> SubmissionEvidence {
        SubmissionEvidence {
            token: token.to_owned(),
            samples,
            device_hash: "abc123".into(),
            selfie_ref: None,
            scanned_at: now,
        }
    }

    #[tokio::test]
    async fn valid_submission_is_recorded_present() {
        let db = setup_test_db().await;
        let (session, student) = seed(&db, false).await;
        let now = Utc::now();

        let outcome = Model::submit(
            &db,
            session.id,
            student.id,
            evidence(&session.token, inside_samples(now), now),
            &Policy::default(),
            now,
        )
        .await
        .unwrap();

        assert_eq!(outcome.record.status, Status::Present);
        assert_eq!(outcome.record.accuracy_m, 8.0);
        assert!(outcome.record.distance_m < 100.0);
        assert!(!outcome.record.device_flagged);
        assert!(outcome.verification.is_none());
    }

    #[tokio::test]
    async fn wrong_token_leaves_no_record() {
        let db = setup_test_db().await;
        let (session, student) = seed(&db, false).await;
        let now = Utc::now();

        let err = Model::submit(
            &db,
            session.id,
            student.id,
            evidence("WRONGTOKEN1234567890", inside_samples(now), now),
            &Policy::default(),
            now,
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), "token_invalid");
        assert!(Model::find_one(&db, session.id, student.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn stale_token_reports_expired() {
        let db = setup_test_db().await;
        let (session, student) = seed(&db, false).await;
        let now = Utc::now() + Duration::seconds(181);

        let err = Model::submit(
            &db,
            session.id,
            student.id,
            evidence(&session.token, inside_samples(now), now),
            &Policy::default(),
            now,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "token_expired");
    }

    #[tokio::test]
    async fn second_submission_is_a_duplicate() {
        let db = setup_test_db().await;
        let (session, student) = seed(&db, false).await;
        let now = Utc::now();

        Model::submit(
            &db,
            session.id,
            student.id,
            evidence(&session.token, inside_samples(now), now),
            &Policy::default(),
            now,
        )
        .await
        .unwrap();

        let err = Model::submit(
            &db,
            session.id,
            student.id,
            evidence(&session.token, inside_samples(now), now),
            &Policy::default(),
            now,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "duplicate_submission");
    }

    #[tokio::test]
    async fn outside_fence_persists_a_rejected_record() {
        let db = setup_test_db().await;
        let (session, student) = seed(&db, false).await;
        let now = Utc::now();

        // ~300m north of the fence center.
        let samples = vec![
            LocationSample {
                lat: -6.3434,
                lng: 106.6915144,
                accuracy_m: 9.0,
                captured_at: now - Duration::seconds(3),
            },
            LocationSample {
                lat: -6.3434,
                lng: 106.6915150,
                accuracy_m: 11.0,
                captured_at: now - Duration::seconds(1),
            },
            LocationSample {
                lat: -6.3434,
                lng: 106.6915140,
                accuracy_m: 14.0,
                captured_at: now,
            },
        ];

        let outcome = Model::submit(
            &db,
            session.id,
            student.id,
            evidence(&session.token, samples, now),
            &Policy::default(),
            now,
        )
        .await
        .unwrap();

        assert_eq!(outcome.record.status, Status::Rejected);
        assert!(outcome.record.distance_m > 100.0);
        assert!(outcome.verification.is_none());
    }

    #[tokio::test]
    async fn poor_accuracy_is_an_evidence_error() {
        let db = setup_test_db().await;
        let (session, student) = seed(&db, false).await;
        let now = Utc::now();

        let samples: Vec<_> = inside_samples(now)
            .into_iter()
            .map(|mut s| {
                s.accuracy_m = 80.0;
                s
            })
            .collect();

        let err = Model::submit(
            &db,
            session.id,
            student.id,
            evidence(&session.token, samples, now),
            &Policy::default(),
            now,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "accuracy_too_low");
        assert!(Model::find_one(&db, session.id, student.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn teleporting_sample_batch_leaves_no_record() {
        let db = setup_test_db().await;
        let (session, student) = seed(&db, false).await;
        let now = Utc::now();

        // Second fix lands ~300m away two seconds after the first.
        let mut samples = inside_samples(now);
        samples[1].lat = -6.3434;

        let err = Model::submit(
            &db,
            session.id,
            student.id,
            evidence(&session.token, samples, now),
            &Policy::default(),
            now,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "location_jump");
        assert!(Model::find_one(&db, session.id, student.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn selfie_required_without_reference_fails_before_insert() {
        let db = setup_test_db().await;
        let (session, student) = seed(&db, true).await;
        let now = Utc::now();

        let err = Model::submit(
            &db,
            session.id,
            student.id,
            evidence(&session.token, inside_samples(now), now),
            &Policy::default(),
            now,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "selfie_required_missing");
        assert!(Model::find_one(&db, session.id, student.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn selfie_submission_enqueues_a_pending_request() {
        let db = setup_test_db().await;
        let (session, student) = seed(&db, true).await;
        let now = Utc::now();

        let mut ev = evidence(&session.token, inside_samples(now), now);
        ev.selfie_ref = Some("selfies/2026/abc.jpg".into());

        let outcome = Model::submit(&db, session.id, student.id, ev, &Policy::default(), now)
            .await
            .unwrap();

        let request = outcome.verification.expect("pending request");
        assert_eq!(request.attendance_record_id, outcome.record.id);
        assert_eq!(
            request.status,
            crate::models::verification_request::Status::Pending
        );
    }

    #[tokio::test]
    async fn shared_device_flags_the_second_student() {
        let db = setup_test_db().await;
        let (session, first) = seed(&db, false).await;
        let second = user::Model::create(&db, "stud2", "stud2@test.com", false)
            .await
            .unwrap();
        let now = Utc::now();

        let first_outcome = Model::submit(
            &db,
            session.id,
            first.id,
            evidence(&session.token, inside_samples(now), now),
            &Policy::default(),
            now,
        )
        .await
        .unwrap();
        assert!(!first_outcome.record.device_flagged);

        let second_outcome = Model::submit(
            &db,
            session.id,
            second.id,
            evidence(&session.token, inside_samples(now), now),
            &Policy::default(),
            now,
        )
        .await
        .unwrap();
        assert!(second_outcome.record.device_flagged);
        assert_eq!(second_outcome.record.status, Status::Present);
    }
}
