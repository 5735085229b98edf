//! Device fingerprint and replay guard.
//!
//! A fingerprint is a SHA-256 digest over normalized client environment
//! signals. The same fingerprint appearing under multiple students in one
//! session is a suspicion signal for reviewers, never an automatic rejection:
//! classrooms legitimately contain many similar devices on shared networks.

use crate::models::attendance_record::{Column, Entity};
use sea_orm::entity::prelude::*;
use sea_orm::{ColumnTrait, ConnectionTrait, PaginatorTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Client environment signals reported alongside a submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSignals {
    pub platform: Option<String>,
    pub model: Option<String>,
    pub user_agent: Option<String>,
    pub screen: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCheck {
    Fresh,
    Duplicate,
}

/// Computes a stable hex fingerprint over the reported signals.
///
/// Fields are lowercased and trimmed so that cosmetic differences between
/// reports from the same device do not change the hash.
pub fn fingerprint(signals: &DeviceSignals) -> String {
    let mut hasher = Sha256::new();
    for field in [
        &signals.platform,
        &signals.model,
        &signals.user_agent,
        &signals.screen,
        &signals.timezone,
    ] {
        let normalized = field
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_lowercase();
        hasher.update(normalized.as_bytes());
        hasher.update([0x1f]); // field separator
    }
    hex::encode(hasher.finalize())
}

/// Checks whether another student already submitted the same fingerprint in
/// this session.
pub async fn check_duplicate<C>(
    conn: &C,
    session_id: i64,
    device_hash: &str,
    student_id: i64,
) -> Result<DeviceCheck, DbErr>
where
    C: ConnectionTrait,
{
    let count = Entity::find()
        .filter(Column::SessionId.eq(session_id))
        .filter(Column::DeviceHash.eq(device_hash))
        .filter(Column::StudentId.ne(student_id))
        .count(conn)
        .await?;

    Ok(if count > 0 {
        DeviceCheck::Duplicate
    } else {
        DeviceCheck::Fresh
    })
}
