//! Database configuration.

/// Default reclaimable-space threshold that triggers compaction (4 MiB).
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Configuration for opening a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Whether to create the database file if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the database file already exists.
    pub error_if_exists: bool,

    /// Whether to sync the file on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Format version to use for new databases.
    pub format_version: (u16, u16),

    /// Reclaimable bytes after which a commit compacts the file.
    /// Zero disables automatic compaction.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            sync_on_commit: true,
            format_version: (1, 0),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if database exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets whether to sync the file on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the format version written to new databases.
    #[must_use]
    pub const fn format_version(mut self, major: u16, minor: u16) -> Self {
        self.format_version = (major, minor);
        self
    }

    /// Sets the automatic compaction threshold in bytes (0 disables).
    #[must_use]
    pub const fn compact_threshold(mut self, bytes: u64) -> Self {
        self.compact_threshold = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(!config.error_if_exists);
        assert!(config.sync_on_commit);
        assert_eq!(config.format_version, (1, 0));
        assert_eq!(config.compact_threshold, DEFAULT_COMPACT_THRESHOLD);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .compact_threshold(0)
            .format_version(1, 3);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.compact_threshold, 0);
        assert_eq!(config.format_version, (1, 3));
    }
}
