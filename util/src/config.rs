//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton containing
//! runtime configuration values loaded from environment variables. It provides
//! thread-safe access and mutation for overrides in tests.

use std::env;
use std::sync::{OnceLock, RwLock};

/// Represents the complete application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_to_stdout: bool,
    pub database_path: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_duration_minutes: u64,
    /// Validity of an attendance token from issuance, in seconds.
    pub token_ttl_seconds: u64,
    /// Grace period after session start during which a scan still counts as present.
    pub late_threshold_minutes: i64,
    /// Minimum number of location samples a submission must carry.
    pub min_location_samples: usize,
    /// Maximum distance any sample may sit from the selected best sample.
    pub max_sample_spread_m: f64,
    /// Maximum age of the oldest-to-newest sample span, in seconds.
    pub sample_window_seconds: i64,
    /// Maximum age of the oldest sample relative to submission time, in seconds.
    pub max_sample_age_seconds: i64,
    /// Maximum implied speed between consecutive samples, in m/s.
    pub max_speed_mps: f64,
    /// Maximum distance between consecutive samples, in meters.
    pub max_jump_m: f64,
    /// Hard ceiling on the accepted accuracy radius, in meters.
    pub accuracy_cap_m: f64,
    /// Minimum length of a reviewer-supplied reason.
    pub min_reason_len: usize,
}

/// Lazily-initialized, thread-safe singleton instance of `AppConfig`.
static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// Panics if required variables are missing or improperly formatted.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            env: env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            project_name: env::var("PROJECT_NAME").unwrap_or_else(|_| "rollcall".into()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "api=info".into()),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "api.log".into()),
            log_to_stdout: env::var("LOG_TO_STDOUT").unwrap_or_else(|_| "false".into()) == "true",
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "data/rollcall.db".into()),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".into())
                .parse()
                .unwrap(),
            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| "change-me".into()),
            jwt_duration_minutes: env::var("JWT_DURATION_MINUTES")
                .unwrap_or("60".into())
                .parse()
                .unwrap(),
            token_ttl_seconds: env::var("TOKEN_TTL_SECONDS")
                .unwrap_or("180".into())
                .parse()
                .unwrap(),
            late_threshold_minutes: env::var("LATE_THRESHOLD_MINUTES")
                .unwrap_or("10".into())
                .parse()
                .unwrap(),
            min_location_samples: env::var("MIN_LOCATION_SAMPLES")
                .unwrap_or("3".into())
                .parse()
                .unwrap(),
            max_sample_spread_m: env::var("MAX_SAMPLE_SPREAD_M")
                .unwrap_or("100".into())
                .parse()
                .unwrap(),
            sample_window_seconds: env::var("SAMPLE_WINDOW_SECONDS")
                .unwrap_or("20".into())
                .parse()
                .unwrap(),
            max_sample_age_seconds: env::var("MAX_SAMPLE_AGE_SECONDS")
                .unwrap_or("60".into())
                .parse()
                .unwrap(),
            max_speed_mps: env::var("MAX_SPEED_MPS")
                .unwrap_or("35".into())
                .parse()
                .unwrap(),
            max_jump_m: env::var("MAX_JUMP_M")
                .unwrap_or("150".into())
                .parse()
                .unwrap(),
            accuracy_cap_m: env::var("ACCURACY_CAP_M")
                .unwrap_or("50".into())
                .parse()
                .unwrap(),
            min_reason_len: env::var("MIN_REASON_LEN")
                .unwrap_or("5".into())
                .parse()
                .unwrap(),
        }
    }

    /// Returns a shared reference to the global configuration.
    ///
    /// # Panics
    /// Panics if the lock cannot be acquired.
    pub fn global() -> std::sync::RwLockReadGuard<'static, AppConfig> {
        CONFIG_INSTANCE
            .get_or_init(|| RwLock::new(AppConfig::from_env()))
            .read()
            .expect("Failed to acquire AppConfig read lock")
    }

    /// Resets the configuration by reloading from environment variables.
    ///
    /// Useful in tests to clear overrides.
    pub fn reset() {
        if let Some(lock) = CONFIG_INSTANCE.get() {
            let mut guard = lock.write().unwrap();
            *guard = AppConfig::from_env();
        }
    }

    /// Generic internal setter for any field in the config.
    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = lock
            .write()
            .expect("Failed to acquire AppConfig write lock");
        setter(&mut guard);
    }

    // --- Per-field setters below, for test overrides ---

    pub fn set_jwt_secret(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.jwt_secret = value.into());
    }

    pub fn set_token_ttl_seconds(value: u64) {
        AppConfig::set_field(|cfg| cfg.token_ttl_seconds = value);
    }

    pub fn set_min_location_samples(value: usize) {
        AppConfig::set_field(|cfg| cfg.min_location_samples = value);
    }

    pub fn set_max_sample_age_seconds(value: i64) {
        AppConfig::set_field(|cfg| cfg.max_sample_age_seconds = value);
    }

    pub fn set_accuracy_cap_m(value: f64) {
        AppConfig::set_field(|cfg| cfg.accuracy_cap_m = value);
    }

    pub fn set_min_reason_len(value: usize) {
        AppConfig::set_field(|cfg| cfg.min_reason_len = value);
    }
}

// --- Free accessors used throughout the workspace ---

pub fn env() -> String {
    AppConfig::global().env.clone()
}

pub fn project_name() -> String {
    AppConfig::global().project_name.clone()
}

pub fn log_level() -> String {
    AppConfig::global().log_level.clone()
}

pub fn log_file() -> String {
    AppConfig::global().log_file.clone()
}

pub fn log_to_stdout() -> bool {
    AppConfig::global().log_to_stdout
}

pub fn database_path() -> String {
    AppConfig::global().database_path.clone()
}

pub fn host() -> String {
    AppConfig::global().host.clone()
}

pub fn port() -> u16 {
    AppConfig::global().port
}

pub fn jwt_secret() -> String {
    AppConfig::global().jwt_secret.clone()
}

pub fn jwt_duration_minutes() -> u64 {
    AppConfig::global().jwt_duration_minutes
}

pub fn token_ttl_seconds() -> u64 {
    AppConfig::global().token_ttl_seconds
}

pub fn late_threshold_minutes() -> i64 {
    AppConfig::global().late_threshold_minutes
}

pub fn min_location_samples() -> usize {
    AppConfig::global().min_location_samples
}

pub fn max_sample_spread_m() -> f64 {
    AppConfig::global().max_sample_spread_m
}

pub fn sample_window_seconds() -> i64 {
    AppConfig::global().sample_window_seconds
}

pub fn max_sample_age_seconds() -> i64 {
    AppConfig::global().max_sample_age_seconds
}

pub fn max_speed_mps() -> f64 {
    AppConfig::global().max_speed_mps
}

pub fn max_jump_m() -> f64 {
    AppConfig::global().max_jump_m
}

pub fn accuracy_cap_m() -> f64 {
    AppConfig::global().accuracy_cap_m
}

pub fn min_reason_len() -> usize {
    AppConfig::global().min_reason_len
}
