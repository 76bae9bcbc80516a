//! # Folder watcher
//!
//! Module dedicated to the per-folder IDLE worker. Every watched
//! folder gets its own task blocking on the protocol-level IDLE wait,
//! so a slow or dead session on one folder never delays the others.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use super::WatchEventHandler;
use crate::backend::{self, IdleEvent, OpenMode, RemoteStore};

/// The device wake lock seam.
///
/// On platforms without suspend semantics this can be a no-op
/// implementation.
pub trait PowerManager: Send + Sync {
    /// Acquires a wake lock, tagged for diagnostics. The lock is held
    /// until the returned guard is dropped.
    fn acquire(&self, tag: &str) -> Box<dyn WakeLock>;
}

/// A held wake lock, released on drop.
pub trait WakeLock: Send {}

/// Events a watcher reports to its manager.
#[derive(Debug)]
pub(crate) enum WatcherEvent {
    /// The watcher died with the given failure.
    Error(String, backend::Error),

    /// The server does not support IDLE for this folder.
    NotSupported(String),
}

enum WatchOutcome {
    Stopped,
    NotSupported,
}

/// Handle on a running watcher, owned by the manager.
pub(crate) struct WatcherHandle {
    shutdown: watch::Sender<bool>,
    refresh: watch::Sender<Duration>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Asks the watcher to renegotiate its IDLE window with the given
    /// interval, without leaving the IDLE loop.
    pub(crate) fn refresh(&self, idle_interval: Duration) {
        let _ = self.refresh.send(idle_interval);
    }

    /// Stops the watcher, interrupting its blocking wait promptly,
    /// and waits for the task to finish.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            debug!("cannot join watcher task: {err}");
        }
    }
}

/// The per-folder IDLE worker.
pub(crate) struct FolderWatcher {
    folder: String,
    remote: Arc<dyn RemoteStore>,
    power: Arc<dyn PowerManager>,
    handler: Arc<dyn WatchEventHandler>,
    events: mpsc::UnboundedSender<WatcherEvent>,
}

impl FolderWatcher {
    /// Spawns a watcher on its own task and returns its handle.
    pub(crate) fn spawn(
        folder: String,
        remote: Arc<dyn RemoteStore>,
        power: Arc<dyn PowerManager>,
        handler: Arc<dyn WatchEventHandler>,
        events: mpsc::UnboundedSender<WatcherEvent>,
        idle_interval: Duration,
    ) -> WatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (refresh_tx, refresh_rx) = watch::channel(idle_interval);

        let watcher = Self {
            folder,
            remote,
            power,
            handler,
            events,
        };
        let task = tokio::spawn(watcher.run(shutdown_rx, refresh_rx));

        WatcherHandle {
            shutdown: shutdown_tx,
            refresh: refresh_tx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>, mut refresh: watch::Receiver<Duration>) {
        info!("watching folder {} for remote changes", self.folder);

        match self.watch(&mut shutdown, &mut refresh).await {
            Ok(WatchOutcome::Stopped) => {
                debug!("stopped watching folder {}", self.folder);
            }
            Ok(WatchOutcome::NotSupported) => {
                warn!("cannot watch folder {}: IDLE not supported", self.folder);
                let _ = self
                    .events
                    .send(WatcherEvent::NotSupported(self.folder.clone()));
            }
            Err(err) => {
                warn!("cannot watch folder {}: {err}", self.folder);
                let _ = self
                    .events
                    .send(WatcherEvent::Error(self.folder.clone(), err));
            }
        }
    }

    async fn watch(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        refresh: &mut watch::Receiver<Duration>,
    ) -> backend::Result<WatchOutcome> {
        let tag = format!("imap-sync::watch::{}", self.folder);

        // catch up on whatever happened while not watching
        {
            let _lock = self.power.acquire(&tag);
            self.handler.push_received(&self.folder).await;
        }

        let mut folder = self.remote.folder(&self.folder).await?;
        folder.open(OpenMode::ReadOnly).await?;

        if !folder.supports_idle() {
            if let Err(err) = folder.close().await {
                debug!("cannot close remote folder {}: {err}", self.folder);
            }
            return Ok(WatchOutcome::NotSupported);
        }

        loop {
            let idle_interval = *refresh.borrow_and_update();
            trace!(
                "entering IDLE on folder {} for {idle_interval:?}",
                self.folder
            );

            // the idle future is dropped as soon as another branch
            // completes, which is what makes stop() prompt
            let wake = tokio::select! {
                _ = shutdown.changed() => Wake::Shutdown,
                _ = refresh.changed() => Wake::Refresh,
                res = folder.idle(idle_interval) => Wake::Idle(res),
            };

            match wake {
                Wake::Shutdown => {
                    if let Err(err) = folder.close().await {
                        debug!("cannot close remote folder {}: {err}", self.folder);
                    }
                    return Ok(WatchOutcome::Stopped);
                }
                Wake::Refresh => {
                    debug!("renegotiating IDLE window of folder {}", self.folder);
                }
                Wake::Idle(res) => {
                    // the wake lock covers the processing of the wake
                    // signal, never the idle inactivity itself
                    let _lock = self.power.acquire(&tag);
                    match res {
                        Ok(IdleEvent::Changed) => {
                            debug!("remote folder {} changed", self.folder);
                            self.handler.push_received(&self.folder).await;
                        }
                        Ok(IdleEvent::TimedOut) => {
                            trace!("IDLE window of folder {} expired", self.folder);
                        }
                        Err(err) => {
                            if let Err(err) = folder.close().await {
                                debug!("cannot close remote folder {}: {err}", self.folder);
                            }
                            return Err(err);
                        }
                    }
                }
            }
        }
    }
}

enum Wake {
    Shutdown,
    Refresh,
    Idle(backend::Result<IdleEvent>),
}
