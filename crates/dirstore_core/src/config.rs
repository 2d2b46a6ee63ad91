//! Backend configuration.

use std::time::Duration;

/// Configuration for opening a backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Longest a user transaction may stay open before further operations
    /// inside it are refused (zero = no limit).
    pub max_user_txn_duration: Duration,

    /// Default soft cap on index scan results collected for a size-limited
    /// search (0 = unlimited). Contexts may override it per request.
    pub max_scan_for_size_limit: usize,

    /// Whether range scans stop at the lookup value and at the forward key
    /// namespace instead of walking to the end of the index.
    pub bounded_range_walk: bool,

    /// First entry identifier handed out by a fresh database.
    pub initial_entry_id: u64,

    /// First USN handed out by a fresh database.
    pub initial_usn: u64,

    /// Whether to flush the engine on every commit.
    pub sync_on_commit: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            max_user_txn_duration: Duration::from_secs(60),
            max_scan_for_size_limit: 0,
            bounded_range_walk: false,
            initial_entry_id: 100,
            initial_usn: 100,
            sync_on_commit: true,
        }
    }
}

impl BackendConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the user transaction duration ceiling.
    #[must_use]
    pub const fn max_user_txn_duration(mut self, value: Duration) -> Self {
        self.max_user_txn_duration = value;
        self
    }

    /// Sets the default size-limit scan cap.
    #[must_use]
    pub const fn max_scan_for_size_limit(mut self, value: usize) -> Self {
        self.max_scan_for_size_limit = value;
        self
    }

    /// Sets whether range scans are bounded.
    #[must_use]
    pub const fn bounded_range_walk(mut self, value: bool) -> Self {
        self.bounded_range_walk = value;
        self
    }

    /// Sets the first entry identifier of a fresh database.
    #[must_use]
    pub const fn initial_entry_id(mut self, value: u64) -> Self {
        self.initial_entry_id = value;
        self
    }

    /// Sets the first USN of a fresh database.
    #[must_use]
    pub const fn initial_usn(mut self, value: u64) -> Self {
        self.initial_usn = value;
        self
    }

    /// Sets whether to flush on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = BackendConfig::default();
        assert_eq!(config.max_user_txn_duration, Duration::from_secs(60));
        assert_eq!(config.max_scan_for_size_limit, 0);
        assert!(!config.bounded_range_walk);
        assert_eq!(config.initial_entry_id, 100);
        assert!(config.sync_on_commit);
    }

    #[test]
    fn builder_pattern() {
        let config = BackendConfig::new()
            .max_user_txn_duration(Duration::from_millis(5))
            .max_scan_for_size_limit(50)
            .bounded_range_walk(true)
            .sync_on_commit(false);

        assert_eq!(config.max_user_txn_duration, Duration::from_millis(5));
        assert_eq!(config.max_scan_for_size_limit, 50);
        assert!(config.bounded_range_walk);
        assert!(!config.sync_on_commit);
    }
}
