//! End-to-end flows across the attendance models: scan window
//! classification, the duplicate-submission race, token rotation mid-class
//! and the selfie review plus override journey.

use crate::geo::LocationSample;
use crate::models::attendance_record::{Model as Record, Status, SubmissionEvidence};
use crate::models::attendance_session::{Model as Session, NewSession};
use crate::models::override_audit_entry::Model as OverrideEntry;
use crate::models::verification_request::{Decision, Model as Verification};
use crate::models::{course, user};
use crate::policy::Policy;
use crate::test_utils::setup_test_db;
use chrono::{DateTime, Duration, Utc};
use sea_orm::DatabaseConnection;

async fn seed_session(
    db: &DatabaseConnection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    selfie_required: bool,
) -> (Session, user::Model) {
    let lecturer = user::Model::create(db, "lect", "lect@test.com", false)
        .await
        .unwrap();
    let course = course::Model::create(db, "COS301", "Software Engineering")
        .await
        .unwrap();
    let session = Session::create(
        db,
        NewSession {
            course_id: course.id,
            created_by: lecturer.id,
            title: "Lecture".into(),
            start_at: start,
            end_at: end,
            late_threshold_minutes: 10,
            fence_lat: -6.3460957,
            fence_lng: 106.6915144,
            fence_radius_m: 100.0,
            selfie_required,
        },
    )
    .await
    .unwrap();
    (session, lecturer)
}

fn samples_near_fence(at: DateTime<Utc>) -> Vec<LocationSample> {
    (0..3)
        .map(|i| LocationSample {
            lat: -6.3461000,
            lng: 106.6915200,
            accuracy_m: 8.0 + i as f64,
            captured_at: at - Duration::seconds(3 - i),
        })
        .collect()
}

fn evidence(token: &str, device: &str, at: DateTime<Utc>) -> SubmissionEvidence {
    SubmissionEvidence {
        token: token.to_owned(),
        samples: samples_near_fence(at),
        device_hash: device.to_owned(),
        selfie_ref: None,
        scanned_at: at,
    }
}

/// A two-hour lecture with a 10-minute grace period: scans at +9 min are on
/// time, +11 min is late, and a scan after the window still lands as a
/// rejected record rather than an error.
#[tokio::test]
async fn lecture_window_classifies_present_late_and_rejected() {
    let db = setup_test_db().await;
    let start = Utc::now();
    let (session, _) = seed_session(&db, start, start + Duration::hours(2), false).await;

    // The lecturer keeps the same token on screen for the whole class.
    let policy = Policy {
        token_ttl: Duration::hours(3),
        ..Policy::default()
    };

    let on_time = user::Model::create(&db, "s1", "s1@test.com", false).await.unwrap();
    let late = user::Model::create(&db, "s2", "s2@test.com", false).await.unwrap();
    let after = user::Model::create(&db, "s3", "s3@test.com", false).await.unwrap();

    let at = start + Duration::minutes(9);
    let outcome = Record::submit(&db, session.id, on_time.id, evidence(&session.token, "d1", at), &policy, at)
        .await
        .unwrap();
    assert_eq!(outcome.record.status, Status::Present);

    let at = start + Duration::minutes(11);
    let outcome = Record::submit(&db, session.id, late.id, evidence(&session.token, "d2", at), &policy, at)
        .await
        .unwrap();
    assert_eq!(outcome.record.status, Status::Late);

    let at = start + Duration::minutes(125);
    let outcome = Record::submit(&db, session.id, after.id, evidence(&session.token, "d3", at), &policy, at)
        .await
        .unwrap();
    assert_eq!(outcome.record.status, Status::Rejected);

    let records = Record::find_by_session(&db, session.id).await.unwrap();
    assert_eq!(records.len(), 3);
}

/// Concurrent identical submissions for the same (session, student) pair
/// must leave exactly one record; the rest surface the duplicate conflict.
#[tokio::test]
async fn concurrent_submissions_record_exactly_once() {
    let db = setup_test_db().await;
    let now = Utc::now();
    let (session, _) = seed_session(&db, now, now + Duration::hours(1), false).await;
    let student = user::Model::create(&db, "s1", "s1@test.com", false).await.unwrap();
    let policy = Policy::default();

    let attempts = (0..4).map(|_| {
        Record::submit(
            &db,
            session.id,
            student.id,
            evidence(&session.token, "d1", now),
            &policy,
            now,
        )
    });
    let results = futures::future::join_all(attempts).await;

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.code() == "duplicate_submission"))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 3);

    let records = Record::find_by_session(&db, session.id).await.unwrap();
    assert_eq!(records.len(), 1);
}

/// A batch of fixes cached an hour before the scan must be refused as stale
/// even when its internal capture span is tight, and nothing may be written.
#[tokio::test]
async fn cached_sample_batch_is_refused_as_stale() {
    let db = setup_test_db().await;
    let now = Utc::now();
    let (session, _) = seed_session(&db, now, now + Duration::hours(1), false).await;
    let student = user::Model::create(&db, "s1", "s1@test.com", false).await.unwrap();

    let mut ev = evidence(&session.token, "d1", now);
    ev.samples = samples_near_fence(now - Duration::hours(1));
    ev.scanned_at = now;

    let err = Record::submit(&db, session.id, student.id, ev, &Policy::default(), now)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "location_stale");
    assert!(Record::find_by_session(&db, session.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn rotated_token_never_validates_a_submission() {
    let db = setup_test_db().await;
    let now = Utc::now();
    let (session, _) = seed_session(&db, now, now + Duration::hours(1), false).await;
    let student = user::Model::create(&db, "s1", "s1@test.com", false).await.unwrap();

    let old_token = session.token.clone();
    let rotated = Session::rotate_token(&db, session.id).await.unwrap();

    let err = Record::submit(
        &db,
        session.id,
        student.id,
        evidence(&old_token, "d1", now),
        &Policy::default(),
        now,
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "token_invalid");

    Record::submit(
        &db,
        session.id,
        student.id,
        evidence(&rotated.token, "d1", now),
        &Policy::default(),
        now,
    )
    .await
    .unwrap();
}

/// Full journey: selfie submission lands provisional, a reviewer rejects it,
/// then an instructor overrides the record back after an appeal. The ledger
/// keeps every step.
#[tokio::test]
async fn selfie_rejection_then_override_appeal() {
    let db = setup_test_db().await;
    let now = Utc::now();
    let (session, lecturer) = seed_session(&db, now, now + Duration::hours(1), true).await;
    let student = user::Model::create(&db, "s1", "s1@test.com", false).await.unwrap();
    let policy = Policy::default();

    let mut ev = evidence(&session.token, "d1", now);
    ev.selfie_ref = Some("selfies/s1.jpg".into());
    let outcome = Record::submit(&db, session.id, student.id, ev, &policy, now)
        .await
        .unwrap();
    assert_eq!(outcome.record.status, Status::Present);
    let request = outcome.verification.unwrap();

    let resolution = Verification::resolve(
        &db,
        request.id,
        Decision::Reject,
        lecturer.id,
        Some("Face does not match the enrolled photo".into()),
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(resolution.record.status, Status::Rejected);

    let appeal = OverrideEntry::append(
        &db,
        resolution.record.id,
        Status::Present,
        lecturer.id,
        "Student verified in person after class",
        &policy,
        Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(appeal.record.status, Status::Present);

    let ledger = OverrideEntry::list_for_record(&db, appeal.record.id)
        .await
        .unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].old_status, Status::Rejected);
    assert_eq!(ledger[0].new_status, Status::Present);
}
