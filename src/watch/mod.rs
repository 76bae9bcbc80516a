//! # Watch
//!
//! Module dedicated to near-real-time mailbox watching. The main
//! structure of this module is the [`WatchManager`], which supervises
//! one IDLE worker per watched folder under resource constraints:
//! maximum concurrent session count, device wake locks, and a single
//! OS wake-up alarm shared by every retry timer.

pub mod config;
mod error;
pub mod timer;
pub mod worker;

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::{sync::{mpsc, Mutex}, task::JoinHandle};
use tracing::{debug, info, trace, warn};

#[doc(inline)]
pub use self::{
    config::{WatchConfig, WatchConfigController, DEFAULT_IDLE_INTERVAL, DEFAULT_MAX_FOLDERS},
    error::{Error, Result},
    timer::{AlarmClock, WakeTimer, WakeTimerPool, PRECISION},
    worker::{PowerManager, WakeLock},
};
use self::{
    timer::WakeTimerHandler,
    worker::{FolderWatcher, WatcherEvent, WatcherHandle},
};
use crate::backend::{self, RemoteStore};

/// Backoff applied before retrying a folder whose watcher failed on a
/// transient condition (I/O, transient protocol failure).
pub const BACKOFF_SHORT: Duration = Duration::from_secs(5 * 60);

/// Backoff applied before retrying a folder whose watcher failed on a
/// condition unlikely to resolve soon (authentication, permanent
/// protocol failure, anything unclassified).
pub const BACKOFF_LONG: Duration = Duration::from_secs(60 * 60);

/// Classifies a backend failure into a retry backoff duration.
pub fn backoff_for(err: &backend::Error) -> Duration {
    match err {
        backend::Error::Io(_) | backend::Error::ProtocolTransient(_) => BACKOFF_SHORT,
        backend::Error::Authentication(_)
        | backend::Error::ProtocolPermanent(_)
        | backend::Error::Unexpected(_) => BACKOFF_LONG,
    }
}

/// The watch event handler, implemented by the embedder.
#[async_trait]
pub trait WatchEventHandler: Send + Sync {
    /// The server signaled changes on the given folder, or a watcher
    /// just started and needs to catch up. The expected reaction is a
    /// synchronization pass of that folder.
    async fn push_received(&self, folder: &str);

    /// The last active watcher failed: push is dead for the whole
    /// account until a retry timer or a configuration change revives
    /// it. Individual watcher failures are retried silently and never
    /// reach this method.
    async fn push_failed(&self, err: &backend::Error);

    /// The server does not support IDLE for the given folder. The
    /// manager does not retry it.
    async fn push_not_supported(&self, folder: &str);
}

struct WatchState {
    desired: Vec<String>,
    active: HashMap<String, WatcherHandle>,
    sleeping: HashMap<String, WakeTimer>,
}

/// The watch manager.
///
/// Supervises the set of per-folder IDLE workers: enforces the
/// maximum concurrent count, restarts and stops workers as the
/// desired folder set changes, and retries failed workers with an
/// error-class-specific backoff through the shared [`WakeTimerPool`].
///
/// A folder is in at most one of the active or sleeping sets at any
/// time; both are mutated under a single lock, while the actual
/// worker start/stop I/O happens outside of it.
pub struct WatchManager {
    remote: Arc<dyn RemoteStore>,
    power: Arc<dyn PowerManager>,
    timers: Arc<WakeTimerPool>,
    handler: Arc<dyn WatchEventHandler>,
    config: WatchConfig,
    state: Mutex<WatchState>,
    events: mpsc::UnboundedSender<WatcherEvent>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<WatcherEvent>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WatchManager {
    /// Creates a new watch manager.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        power: Arc<dyn PowerManager>,
        alarm: Arc<dyn AlarmClock>,
        handler: Arc<dyn WatchEventHandler>,
        config: WatchConfig,
    ) -> Arc<Self> {
        let (events, inbox) = mpsc::unbounded_channel();

        Arc::new(Self {
            remote,
            power,
            timers: Arc::new(WakeTimerPool::new(alarm)),
            handler,
            config,
            state: Mutex::new(WatchState {
                desired: Vec::new(),
                active: HashMap::new(),
                sleeping: HashMap::new(),
            }),
            events,
            inbox: Mutex::new(Some(inbox)),
            supervisor: Mutex::new(None),
        })
    }

    /// Gives access to the wake-timer pool, so the embedder can route
    /// its OS alarm callback to
    /// [`WakeTimerPool::process_due_timers`].
    pub fn timers(&self) -> &Arc<WakeTimerPool> {
        &self.timers
    }

    /// Starts supervising: reacts to configuration changes and to
    /// watcher events until [`stop`](Self::stop).
    pub async fn start(self: &Arc<Self>) {
        let mut inbox = match self.inbox.lock().await.take() {
            Some(inbox) => inbox,
            None => {
                debug!("watch manager already started");
                return;
            }
        };

        let mut max_folders = self.config.max_folders_stream();
        let mut idle_interval = self.config.idle_interval_stream();
        let manager = Arc::downgrade(self);

        let supervisor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = max_folders.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let Some(manager) = manager.upgrade() else { break };
                        debug!("maximum watched folders changed, recomputing watchers");
                        let desired = manager.state.lock().await.desired.clone();
                        manager.update_folders(desired).await;
                    }
                    changed = idle_interval.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let Some(manager) = manager.upgrade() else { break };
                        let interval = manager.config.idle_interval();
                        debug!("idle refresh interval changed to {interval:?}");
                        let state = manager.state.lock().await;
                        for handle in state.active.values() {
                            handle.refresh(interval);
                        }
                    }
                    event = inbox.recv() => {
                        let Some(event) = event else { break };
                        let Some(manager) = manager.upgrade() else { break };
                        match event {
                            WatcherEvent::Error(folder, err) => {
                                manager.on_watch_error(folder, err).await;
                            }
                            WatcherEvent::NotSupported(folder) => {
                                manager.on_watch_not_supported(folder).await;
                            }
                        }
                    }
                }
            }

            trace!("watch supervisor stopped");
        });

        *self.supervisor.lock().await = Some(supervisor);
    }

    /// Updates the set of watched folders.
    ///
    /// The desired set is capped to the first
    /// [`WatchConfig::max_folders`] entries, in the order provided by
    /// the caller. Folders sleeping on a retry timer stay asleep
    /// until their timer fires, even when still desired.
    pub async fn update_folders(self: &Arc<Self>, folders: Vec<String>) {
        let max_folders = self.config.max_folders();
        let idle_interval = self.config.idle_interval();

        let (stopped, cancelled) = {
            let mut state = self.state.lock().await;
            state.desired = folders.clone();

            let capped: Vec<String> = folders.into_iter().take(max_folders).collect();
            debug!("updating watched folders: {capped:?}");

            let stop: Vec<String> = state
                .active
                .keys()
                .filter(|folder| !capped.contains(folder))
                .cloned()
                .collect();
            let mut stopped = Vec::new();
            for folder in stop {
                if let Some(handle) = state.active.remove(&folder) {
                    stopped.push((folder, handle));
                }
            }

            let wake: Vec<String> = state
                .sleeping
                .keys()
                .filter(|folder| !capped.contains(folder))
                .cloned()
                .collect();
            let mut cancelled = Vec::new();
            for folder in wake {
                if let Some(timer) = state.sleeping.remove(&folder) {
                    cancelled.push(timer);
                }
            }

            for folder in capped {
                if state.active.contains_key(&folder) || state.sleeping.contains_key(&folder) {
                    continue;
                }

                let handle = FolderWatcher::spawn(
                    folder.clone(),
                    self.remote.clone(),
                    self.power.clone(),
                    self.handler.clone(),
                    self.events.clone(),
                    idle_interval,
                );
                state.active.insert(folder, handle);
            }

            (stopped, cancelled)
        };

        for timer in cancelled {
            self.timers.cancel(timer);
        }
        for (folder, handle) in stopped {
            debug!("stopping watcher of folder {folder}");
            handle.stop().await;
        }
    }

    /// Stops every watcher, cancels every retry timer, force-closes
    /// the pooled remote connections, then recomputes the watcher set
    /// from the last desired folders. Used after suspected connection
    /// poisoning.
    pub async fn reconnect(self: &Arc<Self>) {
        info!("reconnecting watchers");

        let (stopped, cancelled, desired) = {
            let mut state = self.state.lock().await;
            let stopped: Vec<_> = state.active.drain().collect();
            let cancelled: Vec<_> = state.sleeping.drain().map(|(_, timer)| timer).collect();
            (stopped, cancelled, state.desired.clone())
        };

        for timer in cancelled {
            self.timers.cancel(timer);
        }
        for (folder, handle) in stopped {
            debug!("stopping watcher of folder {folder}");
            handle.stop().await;
        }

        if let Err(err) = self.remote.disconnect_all().await {
            debug!("cannot disconnect pooled connections: {err}");
        }

        self.update_folders(desired).await;
    }

    /// Stops supervising and every watcher. Idempotent.
    pub async fn stop(&self) {
        info!("stopping watch manager");

        if let Some(supervisor) = self.supervisor.lock().await.take() {
            supervisor.abort();
        }

        let (stopped, cancelled) = {
            let mut state = self.state.lock().await;
            state.desired.clear();
            let stopped: Vec<_> = state.active.drain().collect();
            let cancelled: Vec<_> = state.sleeping.drain().map(|(_, timer)| timer).collect();
            (stopped, cancelled)
        };

        for timer in cancelled {
            self.timers.cancel(timer);
        }
        for (_, handle) in stopped {
            handle.stop().await;
        }
    }

    /// The folders currently watched by an active worker, sorted.
    pub async fn active_folders(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut folders: Vec<String> = state.active.keys().cloned().collect();
        folders.sort();
        folders
    }

    /// The folders currently sleeping on a retry timer, sorted.
    pub async fn sleeping_folders(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut folders: Vec<String> = state.sleeping.keys().cloned().collect();
        folders.sort();
        folders
    }

    async fn on_watch_error(self: &Arc<Self>, folder: String, err: backend::Error) {
        let backoff = backoff_for(&err);
        warn!("watcher of folder {folder} failed, retrying in {backoff:?}: {err}");

        let manager = Arc::downgrade(self);
        let retry_folder = folder.clone();
        let handler: WakeTimerHandler = Arc::new(move || {
            let manager = manager.clone();
            let folder = retry_folder.clone();
            async move {
                if let Some(manager) = manager.upgrade() {
                    manager.retry_folder(&folder).await;
                }
            }
            .boxed()
        });

        let last_active = {
            let mut state = self.state.lock().await;
            state.active.remove(&folder);

            match self.timers.start_timer(backoff, handler) {
                Ok(timer) => {
                    state.sleeping.insert(folder, timer);
                }
                Err(err) => warn!("cannot arm retry timer of folder {folder}: {err}"),
            }

            state.active.is_empty()
        };

        if last_active {
            self.handler.push_failed(&err).await;
        }
    }

    /// Invoked when a retry timer fires: the folder leaves the
    /// sleeping set and gets readmitted by the next update, provided
    /// it is still desired and room exists.
    async fn retry_folder(self: &Arc<Self>, folder: &str) {
        debug!("retry timer of folder {folder} fired");

        let desired = {
            let mut state = self.state.lock().await;
            state.sleeping.remove(folder);
            state.desired.clone()
        };

        self.update_folders(desired).await;
    }

    async fn on_watch_not_supported(self: &Arc<Self>, folder: String) {
        {
            let mut state = self.state.lock().await;
            state.active.remove(&folder);
        }

        self.handler.push_not_supported(&folder).await;
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::{backoff_for, BACKOFF_LONG, BACKOFF_SHORT};
    use crate::backend::Error;

    #[test]
    fn backoff_classification() {
        let io = Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(backoff_for(&io), BACKOFF_SHORT);
        assert_eq!(
            backoff_for(&Error::ProtocolTransient("busy".into())),
            BACKOFF_SHORT,
        );

        assert_eq!(
            backoff_for(&Error::Authentication("rejected".into())),
            BACKOFF_LONG,
        );
        assert_eq!(
            backoff_for(&Error::ProtocolPermanent("gone".into())),
            BACKOFF_LONG,
        );
        assert_eq!(backoff_for(&Error::Unexpected("?".into())), BACKOFF_LONG);
    }
}
