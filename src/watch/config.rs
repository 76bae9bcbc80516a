//! # Watch configuration
//!
//! Module dedicated to the reactive watch configuration. Both
//! settings can change while watchers are running: the manager
//! observes them through [`tokio::sync::watch`] channels instead of
//! polling a global configuration source.

use std::time::Duration;

use tokio::sync::watch;

/// The default maximum amount of concurrently watched folders.
pub const DEFAULT_MAX_FOLDERS: usize = 10;

/// The default IDLE refresh interval. Kept under the 29 minutes
/// suggested by RFC 2177 so intermediaries do not drop the
/// connection.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(24 * 60);

/// The observable watch configuration, injected into the manager.
#[derive(Clone, Debug)]
pub struct WatchConfig {
    max_folders: watch::Receiver<usize>,
    idle_interval: watch::Receiver<Duration>,
}

impl WatchConfig {
    /// Creates a watch configuration along with its controller.
    pub fn channel(
        max_folders: usize,
        idle_interval: Duration,
    ) -> (WatchConfigController, Self) {
        let (max_folders_tx, max_folders_rx) = watch::channel(max_folders);
        let (idle_interval_tx, idle_interval_rx) = watch::channel(idle_interval);

        let controller = WatchConfigController {
            max_folders: max_folders_tx,
            idle_interval: idle_interval_tx,
        };

        let config = Self {
            max_folders: max_folders_rx,
            idle_interval: idle_interval_rx,
        };

        (controller, config)
    }

    /// The current maximum amount of concurrently watched folders.
    pub fn max_folders(&self) -> usize {
        *self.max_folders.borrow()
    }

    /// The current IDLE refresh interval.
    pub fn idle_interval(&self) -> Duration {
        *self.idle_interval.borrow()
    }

    pub(crate) fn max_folders_stream(&self) -> watch::Receiver<usize> {
        self.max_folders.clone()
    }

    pub(crate) fn idle_interval_stream(&self) -> watch::Receiver<Duration> {
        self.idle_interval.clone()
    }
}

/// The sender half of the watch configuration, kept by the embedder.
#[derive(Debug)]
pub struct WatchConfigController {
    max_folders: watch::Sender<usize>,
    idle_interval: watch::Sender<Duration>,
}

impl WatchConfigController {
    /// Changes the maximum amount of concurrently watched folders.
    pub fn set_max_folders(&self, max_folders: usize) {
        let _ = self.max_folders.send(max_folders);
    }

    /// Changes the IDLE refresh interval.
    pub fn set_idle_interval(&self, idle_interval: Duration) {
        let _ = self.idle_interval.send(idle_interval);
    }
}
