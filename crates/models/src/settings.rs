/// Pseudo-module selecting the release-wide aggregated dashboard view.
pub const ALL_MODULES_IDENTIFIER: &str = "__all__";

/// Keys of runtime-tunable settings stored in `app_settings`.
/// Values are JSON-encoded text.
pub mod keys {
    pub const AUTO_UPDATE_ENABLED: &str = "AUTO_UPDATE_ENABLED";
    pub const POLLING_INTERVAL_HOURS: &str = "POLLING_INTERVAL_HOURS";
    /// Deprecated; migrated to `POLLING_INTERVAL_HOURS` by dividing by 60.
    pub const POLLING_INTERVAL_MINUTES: &str = "POLLING_INTERVAL_MINUTES";
    pub const METADATA_SYNC_ENABLED: &str = "METADATA_SYNC_ENABLED";
    pub const METADATA_SYNC_INTERVAL_HOURS: &str = "METADATA_SYNC_INTERVAL_HOURS";
    pub const CLEANUP_ARTIFACTS_AFTER_IMPORT: &str = "CLEANUP_ARTIFACTS_AFTER_IMPORT";
    pub const SSE_DRAIN_TIMEOUT_SECONDS: &str = "SSE_DRAIN_TIMEOUT_SECONDS";
    pub const SSE_DRAIN_POLL_INTERVAL: &str = "SSE_DRAIN_POLL_INTERVAL";
    pub const FLAKY_DETECTION_JOB_WINDOW: &str = "FLAKY_DETECTION_JOB_WINDOW";
}

pub mod defaults {
    pub const AUTO_UPDATE_ENABLED: bool = true;
    pub const POLLING_INTERVAL_HOURS: f64 = 12.0;
    pub const METADATA_SYNC_ENABLED: bool = false;
    pub const METADATA_SYNC_INTERVAL_HOURS: f64 = 24.0;
    pub const CLEANUP_ARTIFACTS_AFTER_IMPORT: bool = true;
    pub const SSE_DRAIN_TIMEOUT_SECONDS: f64 = 1.0;
    pub const SSE_DRAIN_POLL_INTERVAL: f64 = 0.05;
    pub const FLAKY_DETECTION_JOB_WINDOW: i64 = 5;
}
