//! Store configuration.

use std::time::Duration;

/// Snapshot model version this build writes and expects on recovery.
pub const MODEL_VERSION: u32 = 1;

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Bounded wait of each log poll in the consumer loop.
    ///
    /// Also bounds how long `close()` waits for the consumer to notice
    /// shutdown.
    pub poll_timeout: Duration,

    /// Maximum time `open()` waits for the startup backlog to drain.
    pub open_timeout: Duration,

    /// Snapshot model version expected on recovery and written on snapshot.
    pub model_version: u32,

    /// How many snapshots to keep after a successful snapshot (`None` = all).
    pub retained_snapshots: Option<usize>,

    /// Whether a brand-new store snapshots right after its bootstrap transaction.
    pub snapshot_on_bootstrap: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(50),
            open_timeout: Duration::from_secs(30),
            model_version: MODEL_VERSION,
            retained_snapshots: None,
            snapshot_on_bootstrap: true,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the consumer poll timeout.
    #[must_use]
    pub const fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the backlog drain timeout of `open()`.
    #[must_use]
    pub const fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Sets the expected snapshot model version.
    #[must_use]
    pub const fn model_version(mut self, version: u32) -> Self {
        self.model_version = version;
        self
    }

    /// Keeps only the newest `count` snapshots.
    #[must_use]
    pub const fn retained_snapshots(mut self, count: usize) -> Self {
        self.retained_snapshots = Some(count);
        self
    }

    /// Sets whether a new store snapshots after bootstrap.
    #[must_use]
    pub const fn snapshot_on_bootstrap(mut self, value: bool) -> Self {
        self.snapshot_on_bootstrap = value;
        self
    }
}
