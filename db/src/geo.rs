//! Geospatial sampler and fence evaluator.
//!
//! Pure functions over client-reported location samples: no database access,
//! no hidden state. The orchestrator feeds these the sample batch carried by a
//! submission and the session's fence, and persists only the verdict plus the
//! selected sample's numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius in meters, as used by the haversine formula.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// One client-reported location observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: f64,
    pub captured_at: DateTime<Utc>,
}

/// Result of evaluating a sample against a circular fence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FenceVerdict {
    pub inside: bool,
    pub distance_m: f64,
}

/// Limits applied to a sample batch as a whole.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    /// Maximum distance any sample may sit from the selected best sample.
    pub max_spread_m: f64,
    /// Maximum oldest-to-newest span of the batch, in seconds.
    pub max_window_s: i64,
    /// Maximum age of the oldest sample relative to submission time.
    pub max_age_s: i64,
    /// Maximum implied speed between consecutive samples.
    pub max_speed_mps: f64,
    /// Maximum distance between consecutive samples.
    pub max_jump_m: f64,
    /// Accuracy ceiling; at least half the batch must sit within it.
    pub accuracy_limit_m: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("Expected at least {need} location samples, got {got}")]
    InsufficientSamples { got: usize, need: usize },

    #[error("Coordinates ({lat}, {lng}) are out of range")]
    MalformedCoordinates { lat: f64, lng: f64 },

    #[error("Location samples spread over {spread_m:.1}m exceeds the {max_m:.1}m limit")]
    InconsistentSamples { spread_m: f64, max_m: f64 },

    #[error("Location samples span {span_s}s, older than the {max_s}s window")]
    StaleSamples { span_s: i64, max_s: i64 },

    #[error("Best sample accuracy {accuracy_m:.1}m exceeds the {limit_m:.1}m limit")]
    AccuracyTooLow { accuracy_m: f64, limit_m: f64 },

    #[error("Oldest sample is {age_s}s old, past the {max_s}s freshness limit")]
    ExpiredSamples { age_s: i64, max_s: i64 },

    #[error("Location jumped {distance_m:.1}m at {speed_mps:.1}m/s between samples")]
    JumpViolation { distance_m: f64, speed_mps: f64 },

    #[error("Only {accurate} of {required} samples are within the {limit_m:.1}m accuracy limit")]
    InconsistentAccuracy {
        accurate: usize,
        required: usize,
        limit_m: f64,
    },
}

impl GeoError {
    /// Machine-readable error code surfaced to clients.
    pub fn code(&self) -> &'static str {
        match self {
            GeoError::InsufficientSamples { .. } => "insufficient_samples",
            GeoError::MalformedCoordinates { .. } => "malformed_coordinates",
            GeoError::InconsistentSamples { .. } => "samples_inconsistent",
            GeoError::StaleSamples { .. } => "samples_stale",
            GeoError::AccuracyTooLow { .. } => "accuracy_too_low",
            GeoError::ExpiredSamples { .. } => "location_stale",
            GeoError::JumpViolation { .. } => "location_jump",
            GeoError::InconsistentAccuracy { .. } => "accuracy_too_low",
        }
    }
}

fn check_coordinates(lat: f64, lng: f64) -> Result<(), GeoError> {
    if !lat.is_finite() || !lng.is_finite() || lat.abs() > 90.0 || lng.abs() > 180.0 {
        return Err(GeoError::MalformedCoordinates { lat, lng });
    }
    Ok(())
}

/// Great-circle distance between two points in meters.
pub fn haversine_distance_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat_from = lat1.to_radians();
    let lat_to = lat2.to_radians();
    let lat_delta = (lat2 - lat1).to_radians();
    let lng_delta = (lng2 - lng1).to_radians();

    let angle = 2.0
        * ((lat_delta / 2.0).sin().powi(2)
            + lat_from.cos() * lat_to.cos() * (lng_delta / 2.0).sin().powi(2))
        .sqrt()
        .asin();

    angle * EARTH_RADIUS_M
}

/// Picks the most trustworthy sample: smallest accuracy radius, ties broken by
/// the most recent capture timestamp.
///
/// Rejects the whole batch when it is smaller than `min_count` or when any
/// sample carries out-of-range coordinates; malformed evidence is never
/// silently clamped.
pub fn select_best_sample(
    samples: &[LocationSample],
    min_count: usize,
) -> Result<&LocationSample, GeoError> {
    if samples.len() < min_count {
        return Err(GeoError::InsufficientSamples {
            got: samples.len(),
            need: min_count,
        });
    }

    for s in samples {
        check_coordinates(s.lat, s.lng)?;
    }

    let best = samples
        .iter()
        .min_by(|a, b| {
            a.accuracy_m
                .partial_cmp(&b.accuracy_m)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.captured_at.cmp(&a.captured_at))
        })
        .expect("non-empty after count check");

    Ok(best)
}

/// Batch-consistency checks around the selected sample.
///
/// A batch is rejected when its capture window spans longer than the limit,
/// when its oldest fix is older than `max_age_s` relative to `now` (a batch
/// cached before the student walked in), when fewer than half the samples sit
/// within the accuracy limit, when consecutive fixes imply a teleport (too
/// far or too fast), or when any sample sits further than the spread limit
/// from the best one.
pub fn check_consistency(
    samples: &[LocationSample],
    best: &LocationSample,
    limits: &BatchLimits,
    now: DateTime<Utc>,
) -> Result<(), GeoError> {
    let oldest = samples.iter().map(|s| s.captured_at).min();
    let newest = samples.iter().map(|s| s.captured_at).max();
    if let (Some(oldest), Some(newest)) = (oldest, newest) {
        let span_s = (newest - oldest).num_seconds();
        if span_s > limits.max_window_s {
            return Err(GeoError::StaleSamples {
                span_s,
                max_s: limits.max_window_s,
            });
        }

        let age_s = (now - oldest).num_seconds();
        if age_s > limits.max_age_s {
            return Err(GeoError::ExpiredSamples {
                age_s,
                max_s: limits.max_age_s,
            });
        }
    }

    let required = samples.len().div_ceil(2);
    let accurate = samples
        .iter()
        .filter(|s| s.accuracy_m <= limits.accuracy_limit_m)
        .count();
    if accurate < required {
        return Err(GeoError::InconsistentAccuracy {
            accurate,
            required,
            limit_m: limits.accuracy_limit_m,
        });
    }

    let mut ordered: Vec<&LocationSample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.captured_at);
    for pair in ordered.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        let distance_m = haversine_distance_m(prev.lat, prev.lng, cur.lat, cur.lng);
        // Sub-200ms gaps are treated as 200ms so a burst of fixes from the
        // same spot does not divide by a near-zero interval.
        let gap_s = ((cur.captured_at - prev.captured_at).num_milliseconds() as f64 / 1000.0)
            .max(0.2);
        let speed_mps = distance_m / gap_s;
        if distance_m > limits.max_jump_m || speed_mps > limits.max_speed_mps {
            return Err(GeoError::JumpViolation {
                distance_m,
                speed_mps,
            });
        }
    }

    let spread_m = samples
        .iter()
        .map(|s| haversine_distance_m(s.lat, s.lng, best.lat, best.lng))
        .fold(0.0_f64, f64::max);
    if spread_m > limits.max_spread_m {
        return Err(GeoError::InconsistentSamples {
            spread_m,
            max_m: limits.max_spread_m,
        });
    }

    Ok(())
}

/// Evaluates a point against a circular fence.
///
/// The boundary is inclusive: `distance == radius` is inside.
pub fn evaluate_fence(
    lat: f64,
    lng: f64,
    center_lat: f64,
    center_lng: f64,
    radius_m: f64,
) -> Result<FenceVerdict, GeoError> {
    check_coordinates(lat, lng)?;
    check_coordinates(center_lat, center_lng)?;

    let distance_m = haversine_distance_m(lat, lng, center_lat, center_lng);
    Ok(FenceVerdict {
        inside: distance_m <= radius_m,
        distance_m,
    })
}
