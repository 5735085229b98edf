//! Submission policy, injected into the orchestrator per call.
//!
//! Handlers build a `Policy` from configuration (or construct one directly in
//! tests); the orchestrator never reads ambient global state, so every test
//! case can vary the policy independently.

use crate::geo::BatchLimits;
use chrono::Duration;

#[derive(Debug, Clone)]
pub struct Policy {
    /// Validity of a session token from issuance.
    pub token_ttl: Duration,
    /// Minimum number of location samples a submission must carry.
    pub min_location_samples: usize,
    /// Maximum distance any sample may sit from the selected best sample.
    pub max_sample_spread_m: f64,
    /// Maximum oldest-to-newest span of the sample batch, in seconds.
    pub sample_window_seconds: i64,
    /// Maximum age of the oldest sample relative to submission time.
    pub max_sample_age_seconds: i64,
    /// Maximum implied speed between consecutive samples.
    pub max_speed_mps: f64,
    /// Maximum distance between consecutive samples.
    pub max_jump_m: f64,
    /// Hard ceiling on the accepted accuracy radius; the effective limit is
    /// `min(cap, fence radius)`.
    pub accuracy_cap_m: f64,
    /// Minimum length of a reviewer-supplied reason.
    pub min_reason_len: usize,
}

impl Policy {
    /// Builds a policy from the global configuration.
    pub fn from_config() -> Self {
        Self {
            token_ttl: Duration::seconds(util::config::token_ttl_seconds() as i64),
            min_location_samples: util::config::min_location_samples(),
            max_sample_spread_m: util::config::max_sample_spread_m(),
            sample_window_seconds: util::config::sample_window_seconds(),
            max_sample_age_seconds: util::config::max_sample_age_seconds(),
            max_speed_mps: util::config::max_speed_mps(),
            max_jump_m: util::config::max_jump_m(),
            accuracy_cap_m: util::config::accuracy_cap_m(),
            min_reason_len: util::config::min_reason_len(),
        }
    }

    /// Effective accuracy limit for a given fence radius.
    pub fn accuracy_limit_m(&self, fence_radius_m: f64) -> f64 {
        self.accuracy_cap_m.min(fence_radius_m)
    }

    /// Batch-wide evidence limits for a given fence radius.
    pub fn batch_limits(&self, fence_radius_m: f64) -> BatchLimits {
        BatchLimits {
            max_spread_m: self.max_sample_spread_m,
            max_window_s: self.sample_window_seconds,
            max_age_s: self.max_sample_age_seconds,
            max_speed_mps: self.max_speed_mps,
            max_jump_m: self.max_jump_m,
            accuracy_limit_m: self.accuracy_limit_m(fence_radius_m),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            token_ttl: Duration::seconds(180),
            min_location_samples: 3,
            max_sample_spread_m: 100.0,
            sample_window_seconds: 20,
            max_sample_age_seconds: 60,
            max_speed_mps: 35.0,
            max_jump_m: 150.0,
            accuracy_cap_m: 50.0,
            min_reason_len: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use util::config::AppConfig;

    #[test]
    fn from_config_reads_every_knob() {
        AppConfig::reset();
        AppConfig::set_token_ttl_seconds(60);
        AppConfig::set_min_location_samples(5);
        AppConfig::set_max_sample_age_seconds(30);
        AppConfig::set_accuracy_cap_m(25.0);
        AppConfig::set_min_reason_len(10);

        let policy = Policy::from_config();
        assert_eq!(policy.token_ttl, Duration::seconds(60));
        assert_eq!(policy.min_location_samples, 5);
        assert_eq!(policy.max_sample_age_seconds, 30);
        assert_eq!(policy.accuracy_cap_m, 25.0);
        assert_eq!(policy.min_reason_len, 10);

        AppConfig::reset();
    }

    #[test]
    fn accuracy_limit_is_capped_by_the_fence_radius() {
        let policy = Policy::default();
        assert_eq!(policy.accuracy_limit_m(100.0), 50.0);
        assert_eq!(policy.accuracy_limit_m(30.0), 30.0);
        assert_eq!(policy.batch_limits(30.0).accuracy_limit_m, 30.0);
    }
}
