//! Engine configuration.

/// Configuration for a [`crate::Database`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Whether `save` also saves linked records that have changes.
    pub cascade_save: bool,

    /// Whether filters without an indexed equality clause may scan every record.
    pub allow_full_scan: bool,

    /// Candidate count above which a full scan is logged as a warning.
    pub scan_warning_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cascade_save: true,
            allow_full_scan: false,
            scan_warning_threshold: 1000,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default cascade behaviour of `save`.
    #[must_use]
    pub const fn cascade_save(mut self, value: bool) -> Self {
        self.cascade_save = value;
        self
    }

    /// Sets whether full scans are allowed by default.
    #[must_use]
    pub const fn allow_full_scan(mut self, value: bool) -> Self {
        self.allow_full_scan = value;
        self
    }

    /// Sets the full-scan warning threshold.
    #[must_use]
    pub const fn scan_warning_threshold(mut self, value: usize) -> Self {
        self.scan_warning_threshold = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.cascade_save);
        assert!(!config.allow_full_scan);
        assert_eq!(config.scan_warning_threshold, 1000);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new().cascade_save(false).allow_full_scan(true);
        assert!(!config.cascade_save);
        assert!(config.allow_full_scan);
    }
}
