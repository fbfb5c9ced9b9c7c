//! Backplane configuration loaded from the environment.
//!
//! One flat struct so the gateway, the hydration worker, and tests share the
//! same defaults. Change behavior without code edits.

use serde::{Deserialize, Serialize};

/// Core configuration loaded from environment.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | WARDEN_DATA_DIR | ./data/warden | Sled database directory. |
/// | GATEWAY_ADDR | 0.0.0.0:8600 | Gateway bind address. |
/// | HYDRATION_ENABLED | true | Run the scheduler + queue workers. |
/// | HYDRATION_TZ | UTC | IANA zone for the nightly schedule. |
/// | HYDRATION_POLL_SECONDS | 60 | Scheduler poll interval. |
/// | HYDRATION_HOUR / HYDRATION_MINUTE | 2 / 0 | Local wall-clock run time. |
/// | HYDRATION_MAX_FILES_PER_RUN | unset | Per-run item cap. |
/// | HYDRATION_FORCE_FULL_SCAN | false | Ignore source cursors. |
/// | HYDRATION_OCR_ENABLED | false | OCR fallback when text extraction is empty. |
/// | HYDRATION_SERVICE_USER_ID | 0 | Principal used for scheduled-run PDP checks. |
/// | WARDEN_LOCK_BACKEND | embedded | "embedded" \| "disabled" (degraded, no serialization). |
/// | ML_SCANNER_ENABLED | false | Optional ML content classifier. |
/// | ML_SCANNER_THRESHOLD | 0.8 | Score above which the ML classifier flags content. |
/// | EMBEDDING_PROVIDER | hash | "hash" \| "remote" \| "disabled". |
/// | WARDEN_EVENT_WEBHOOK_URL | unset | POST target for backplane events. |
/// | AUDIT_RETENTION_DAYS | 90 | Audit log retention. |
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub data_dir: String,
    pub gateway_addr: String,
    pub hydration_enabled: bool,
    pub hydration_tz: String,
    pub hydration_poll_seconds: u64,
    pub hydration_hour: u32,
    pub hydration_minute: u32,
    pub hydration_max_files_per_run: Option<usize>,
    pub hydration_force_full_scan: bool,
    pub hydration_ocr_enabled: bool,
    pub hydration_service_user_id: i64,
    pub lock_backend: LockBackend,
    pub ml_scanner_enabled: bool,
    pub ml_scanner_threshold: f64,
    pub embedding_provider: String,
    pub embedding_api_url: Option<String>,
    pub embedding_api_key: Option<String>,
    pub event_webhook_url: Option<String>,
    pub audit_retention_days: i64,
}

/// Lock backend selection. "disabled" degrades every acquire to a no-op token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBackend {
    Embedded,
    Disabled,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data/warden".to_string(),
            gateway_addr: "0.0.0.0:8600".to_string(),
            hydration_enabled: true,
            hydration_tz: "UTC".to_string(),
            hydration_poll_seconds: 60,
            hydration_hour: 2,
            hydration_minute: 0,
            hydration_max_files_per_run: None,
            hydration_force_full_scan: false,
            hydration_ocr_enabled: false,
            hydration_service_user_id: 0,
            lock_backend: LockBackend::Embedded,
            ml_scanner_enabled: false,
            ml_scanner_threshold: 0.8,
            embedding_provider: "hash".to_string(),
            embedding_api_url: None,
            embedding_api_key: None,
            event_webhook_url: None,
            audit_retention_days: 90,
        }
    }
}

impl CoreConfig {
    /// Load from a TOML file (missing file is fine) with defaults for absent
    /// keys. Environment variables still win: callers layer `from_env` on
    /// top when both are in play.
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()?
            .try_deserialize()
    }

    /// Load configuration from environment. Unset or invalid values fall back
    /// to the defaults documented on the struct.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: env_string("WARDEN_DATA_DIR", &defaults.data_dir),
            gateway_addr: env_string("GATEWAY_ADDR", &defaults.gateway_addr),
            hydration_enabled: env_bool("HYDRATION_ENABLED", true),
            hydration_tz: env_string("HYDRATION_TZ", &defaults.hydration_tz),
            hydration_poll_seconds: env_parse("HYDRATION_POLL_SECONDS", 60),
            hydration_hour: env_parse("HYDRATION_HOUR", 2),
            hydration_minute: env_parse("HYDRATION_MINUTE", 0),
            hydration_max_files_per_run: env_opt_parse("HYDRATION_MAX_FILES_PER_RUN"),
            hydration_force_full_scan: env_bool("HYDRATION_FORCE_FULL_SCAN", false),
            hydration_ocr_enabled: env_bool("HYDRATION_OCR_ENABLED", false),
            hydration_service_user_id: env_parse("HYDRATION_SERVICE_USER_ID", 0),
            lock_backend: match env_string("WARDEN_LOCK_BACKEND", "embedded").as_str() {
                "disabled" => LockBackend::Disabled,
                _ => LockBackend::Embedded,
            },
            ml_scanner_enabled: env_bool("ML_SCANNER_ENABLED", false),
            ml_scanner_threshold: env_parse("ML_SCANNER_THRESHOLD", 0.8),
            embedding_provider: env_string("EMBEDDING_PROVIDER", "hash"),
            embedding_api_url: env_opt_string("EMBEDDING_API_URL"),
            embedding_api_key: env_opt_string("EMBEDDING_API_KEY"),
            event_webhook_url: env_opt_string("WARDEN_EVENT_WEBHOOK_URL"),
            audit_retention_days: env_parse("AUDIT_RETENTION_DAYS", 90),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_overlays_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "hydration_hour = 5\nhydration_tz = \"Asia/Riyadh\"\n").unwrap();
        let cfg = CoreConfig::from_file(path.to_string_lossy().as_ref()).unwrap();
        assert_eq!(cfg.hydration_hour, 5);
        assert_eq!(cfg.hydration_tz, "Asia/Riyadh");
        // Untouched keys keep their defaults.
        assert_eq!(cfg.hydration_minute, 0);
        assert_eq!(cfg.audit_retention_days, 90);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = CoreConfig::from_file("/definitely/not/here/warden").unwrap();
        assert_eq!(cfg.hydration_hour, 2);
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = CoreConfig::default();
        assert!(cfg.hydration_enabled);
        assert_eq!(cfg.hydration_hour, 2);
        assert_eq!(cfg.hydration_tz, "UTC");
        assert_eq!(cfg.lock_backend, LockBackend::Embedded);
        assert_eq!(cfg.audit_retention_days, 90);
    }
}
