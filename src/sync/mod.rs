//! # Synchronization
//!
//! Module dedicated to mailbox synchronization. The main structure of
//! this module is the [`MailboxSynchronizer`], which reconciles the
//! local cache of one folder against the true state of its remote
//! counterpart: identity matching, windowing, partial vs. full
//! download, flag-only refresh and deletion propagation.

pub mod config;
mod error;
pub mod report;

use std::{
    collections::{HashMap, HashSet},
    error::Error as StdError,
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
};

use chrono::Utc;
use tracing::{debug, info, trace, warn};

use crate::{
    backend::{FetchProfile, OpenMode, RemoteFolder, RemoteStore},
    envelope::{cmp_uid_desc, Envelope, Flag},
    folder::{
        recompute_more_messages, LocalFolder, LocalStore, HIGHEST_SEEN_UID_KEY, UID_VALIDITY_KEY,
    },
    message::RemoteMessage,
};

#[doc(inline)]
pub use self::{
    config::{ExpungePolicy, SyncConfig},
    error::{Error, Result},
    report::SyncReport,
};

/// The synchronization async event handler.
pub type SyncEventHandler =
    dyn Fn(SyncEvent) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync;

/// The synchronization event.
///
/// Represents all the events that can be triggered during a
/// synchronization pass. The first field is always the name of the
/// folder being synchronized.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum SyncEvent {
    /// The pass started.
    Started(String),

    /// The remote folder was opened, which implies the server
    /// accepted the credentials.
    AuthenticationSucceeded(String),

    /// The envelope listing started.
    HeadersStarted(String),

    /// An envelope was listed (done, total).
    HeadersProgress(String, usize, usize),

    /// The envelope listing finished with the given amount of
    /// envelopes.
    HeadersFinished(String, usize),

    /// A message body was downloaded (done, total).
    Progress(String, usize, usize),

    /// A message was downloaded into the local cache. The flag tells
    /// whether the message is older than the highest UID previously
    /// seen (backfill rather than new mail).
    NewMessage(String, String, bool),

    /// A local message was destroyed by deletion propagation.
    MessageRemoved(String, String),

    /// The flags of a cached message changed.
    FlagsChanged(String, String),

    /// The persisted folder status changed.
    FolderStatusChanged(String),

    /// The pass finished with the given new-message count.
    Finished(String, usize),

    /// The pass failed with the given root-cause message.
    Failed(String, String),
}

impl SyncEvent {
    pub async fn emit(&self, handler: &Option<Arc<SyncEventHandler>>) {
        if let Some(handler) = handler.as_ref() {
            if let Err(err) = handler(self.clone()).await {
                debug!("error while emitting sync event: {err}");
                trace!("{err:?}");
            } else {
                trace!("emitted sync event {self:?}");
            }
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started(folder) => {
                write!(f, "Started synchronization of folder {folder}")
            }
            Self::AuthenticationSucceeded(folder) => {
                write!(f, "Authenticated to remote folder {folder}")
            }
            Self::HeadersStarted(folder) => {
                write!(f, "Listing envelopes of folder {folder}")
            }
            Self::HeadersProgress(folder, done, total) => {
                write!(f, "Listed {done}/{total} envelopes of folder {folder}")
            }
            Self::HeadersFinished(folder, n) => {
                write!(f, "Listed {n} envelopes of folder {folder}")
            }
            Self::Progress(folder, done, total) => {
                write!(f, "Downloaded {done}/{total} messages of folder {folder}")
            }
            Self::NewMessage(folder, uid, true) => {
                write!(f, "Downloaded old message {uid} of folder {folder}")
            }
            Self::NewMessage(folder, uid, false) => {
                write!(f, "Downloaded new message {uid} of folder {folder}")
            }
            Self::MessageRemoved(folder, uid) => {
                write!(f, "Removed local message {uid} of folder {folder}")
            }
            Self::FlagsChanged(folder, uid) => {
                write!(f, "Changed flags of message {uid} of folder {folder}")
            }
            Self::FolderStatusChanged(folder) => {
                write!(f, "Changed status of folder {folder}")
            }
            Self::Finished(folder, n) => {
                write!(f, "Synchronized folder {folder}, {n} new messages")
            }
            Self::Failed(folder, msg) => {
                write!(f, "Synchronization of folder {folder} failed: {msg}")
            }
        }
    }
}

/// The mailbox synchronizer.
///
/// Performs one full reconcile-and-download pass per call, one folder
/// at a time, from whatever execution context the caller provides.
/// The synchronizer has no internal concurrency: it only suspends on
/// remote I/O.
pub struct MailboxSynchronizer {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    handler: Option<Arc<SyncEventHandler>>,
}

impl MailboxSynchronizer {
    /// Creates a new synchronizer on top of the given local and
    /// remote stores.
    pub fn new(local: Arc<dyn LocalStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            local,
            remote,
            handler: None,
        }
    }

    pub fn set_some_handler<F: Future<Output = Result<()>> + Send + 'static>(
        &mut self,
        handler: Option<impl Fn(SyncEvent) -> F + Send + Sync + 'static>,
    ) {
        self.handler = match handler {
            Some(handler) => Some(Arc::new(move |evt| Box::pin(handler(evt)))),
            None => None,
        };
    }

    pub fn set_handler<F: Future<Output = Result<()>> + Send + 'static>(
        &mut self,
        handler: impl Fn(SyncEvent) -> F + Send + Sync + 'static,
    ) {
        self.set_some_handler(Some(handler));
    }

    pub fn with_some_handler<F: Future<Output = Result<()>> + Send + 'static>(
        mut self,
        handler: Option<impl Fn(SyncEvent) -> F + Send + Sync + 'static>,
    ) -> Self {
        self.set_some_handler(handler);
        self
    }

    pub fn with_handler<F: Future<Output = Result<()>> + Send + 'static>(
        mut self,
        handler: impl Fn(SyncEvent) -> F + Send + Sync + 'static,
    ) -> Self {
        self.set_handler(handler);
        self
    }

    /// Synchronizes one folder.
    ///
    /// Every failure is caught here: it is recorded into the folder
    /// status with a fresh last-checked timestamp, reported through
    /// the [`SyncEvent::Failed`] event and returned inside the
    /// report. The previous local content stays intact.
    pub async fn synchronize(&self, folder: &str, config: &SyncConfig) -> SyncReport {
        info!("synchronizing folder {folder}");

        let mut report = SyncReport::default();
        SyncEvent::Started(folder.to_owned()).emit(&self.handler).await;

        let local = match self.local.folder(folder).await {
            Ok(local) => local,
            Err(err) => {
                warn!("cannot open local folder {folder}: {err}");
                let message = root_cause(&err);
                report.failure = Some(message.clone());
                SyncEvent::Failed(folder.to_owned(), message)
                    .emit(&self.handler)
                    .await;
                return report;
            }
        };

        match self.sync_pass(folder, local.as_ref(), config, &mut report).await {
            Ok(()) => {
                let finalized: crate::folder::Result<()> = async {
                    local.set_last_checked(Utc::now()).await?;
                    local.set_status(None).await
                }
                .await;
                if let Err(err) = finalized {
                    debug!("cannot finalize status of folder {folder}: {err}");
                }

                SyncEvent::FolderStatusChanged(folder.to_owned())
                    .emit(&self.handler)
                    .await;
                SyncEvent::Finished(folder.to_owned(), report.new_messages)
                    .emit(&self.handler)
                    .await;
                info!(
                    "synchronized folder {folder}: {} new messages",
                    report.new_messages
                );
            }
            Err(err) => {
                warn!("cannot synchronize folder {folder}: {err}");
                debug!("{err:?}");

                let message = root_cause(&err);
                let recorded: crate::folder::Result<()> = async {
                    local.set_status(Some(&message)).await?;
                    local.set_last_checked(Utc::now()).await
                }
                .await;
                if let Err(err) = recorded {
                    debug!("cannot record status of folder {folder}: {err}");
                }

                report.failure = Some(message.clone());
                SyncEvent::FolderStatusChanged(folder.to_owned())
                    .emit(&self.handler)
                    .await;
                SyncEvent::Failed(folder.to_owned(), message)
                    .emit(&self.handler)
                    .await;
            }
        }

        report
    }

    /// Downloads one message in full, regardless of its size.
    ///
    /// Unlike [`synchronize`](Self::synchronize), failures propagate
    /// to the caller.
    pub async fn download_message(
        &self,
        folder: &str,
        uid: &str,
        _config: &SyncConfig,
    ) -> Result<()> {
        info!("downloading message {uid} of folder {folder}");

        let local = self.local.folder(folder).await?;
        let mut remote = self.remote.folder(folder).await?;

        let res: Result<()> = async {
            remote.open(OpenMode::ReadOnly).await?;
            let uids = vec![uid.to_owned()];
            let message = remote
                .fetch(&uids, FetchProfile::Full, 0)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| Error::MessageNotFoundError(folder.to_owned(), uid.to_owned()))?;
            local.save_message(&message, true).await?;
            Ok(())
        }
        .await;

        if let Err(err) = remote.close().await {
            debug!("cannot close remote folder {folder}: {err}");
        }

        res
    }

    /// Runs the pass against a fresh remote folder handle, making
    /// sure the handle is closed whatever the outcome.
    async fn sync_pass(
        &self,
        folder: &str,
        local: &dyn LocalFolder,
        config: &SyncConfig,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut remote = self.remote.folder(folder).await?;

        let res = self
            .sync_remote(folder, local, remote.as_mut(), config, report)
            .await;

        if let Err(err) = remote.close().await {
            debug!("cannot close remote folder {folder}: {err}");
        }

        res
    }

    async fn sync_remote(
        &self,
        folder: &str,
        local: &dyn LocalFolder,
        remote: &mut dyn RemoteFolder,
        config: &SyncConfig,
        report: &mut SyncReport,
    ) -> Result<()> {
        if config.expunge_policy == ExpungePolicy::OnPoll {
            debug!("expunging remote folder {folder} before polling");
            remote.expunge().await?;
        }

        remote.open(OpenMode::ReadOnly).await?;
        SyncEvent::AuthenticationSucceeded(folder.to_owned())
            .emit(&self.handler)
            .await;

        // A UID validity change means every cached identifier is
        // stale: drop the whole cache before reconciling anything.
        let observed_validity = remote.uid_validity().await?;
        match local.extra_number(UID_VALIDITY_KEY).await? {
            Some(stored) if stored != observed_validity as i64 => {
                warn!(
                    "UID validity of folder {folder} changed from {stored} to \
                     {observed_validity}, invalidating local cache"
                );
                let uids = local.uids().await?;
                if !uids.is_empty() {
                    local.destroy_messages(&uids).await?;
                }
                local
                    .set_extra_number(UID_VALIDITY_KEY, observed_validity as i64)
                    .await?;
            }
            Some(_) => (),
            None => {
                local
                    .set_extra_number(UID_VALIDITY_KEY, observed_validity as i64)
                    .await?;
            }
        }

        let local_dates = local.message_dates().await?;
        let highest_seen = local
            .extra_number(HIGHEST_SEEN_UID_KEY)
            .await?
            .and_then(|n| u64::try_from(n).ok());

        let remote_count = remote.message_count().await?;
        if remote_count < 0 {
            return Err(Error::NegativeMessageCountError(
                folder.to_owned(),
                remote_count,
            ));
        }
        let remote_count = remote_count as u32;

        let visible_limit = resolve_visible_limit(local.visible_limit().await?, config);

        let (remote_start, remote_set) = if remote_count == 0 {
            (1, HashMap::new())
        } else {
            let remote_start = fetch_window_start(remote_count, visible_limit);
            debug!(
                "fetching envelopes {remote_start}:{remote_count} of folder {folder} \
                 (visible limit {visible_limit})"
            );

            SyncEvent::HeadersStarted(folder.to_owned())
                .emit(&self.handler)
                .await;

            let envelopes = remote
                .list_envelopes(remote_start, remote_count, config.earliest_poll_date)
                .await?;
            let listed = envelopes.len();

            // The earliest date is only a hint for the server: keep a
            // message when it is not cached yet, or when its cached
            // date is within the polling window.
            let mut remote_set: HashMap<String, Envelope> = HashMap::new();
            for (done, envelope) in envelopes.into_iter().enumerate() {
                SyncEvent::HeadersProgress(folder.to_owned(), done + 1, listed)
                    .emit(&self.handler)
                    .await;

                let keep = match (config.earliest_poll_date, local_dates.get(&envelope.uid)) {
                    (Some(earliest), Some(date)) => *date >= earliest,
                    _ => true,
                };
                if keep {
                    remote_set.insert(envelope.uid.clone(), envelope);
                }
            }

            SyncEvent::HeadersFinished(folder.to_owned(), listed)
                .emit(&self.handler)
                .await;

            (remote_start, remote_set)
        };

        // Deletion propagation. Runs before any download or flag
        // refresh: a message destroyed here must not resurface later
        // in the same pass.
        let mut removed_any = false;
        if config.sync_remote_deletions {
            let destroyed: Vec<String> = local_dates
                .keys()
                .filter(|uid| !remote_set.contains_key(*uid))
                .cloned()
                .collect();

            if !destroyed.is_empty() {
                debug!(
                    "destroying {} local messages absent from remote folder {folder}",
                    destroyed.len()
                );
                local.destroy_messages(&destroyed).await?;
                removed_any = true;
                report.removed_messages += destroyed.len();

                for uid in destroyed {
                    SyncEvent::MessageRemoved(folder.to_owned(), uid)
                        .emit(&self.handler)
                        .await;
                }
            }
        }

        let current = local.more_messages().await?;
        let tentative = recompute_more_messages(current, removed_any, remote_start, None);
        let more_messages = if tentative.is_unknown() && remote_start > 1 {
            let probe = remote
                .more_messages_available(remote_start, config.earliest_poll_date)
                .await?;
            recompute_more_messages(current, removed_any, remote_start, Some(probe))
        } else {
            tentative
        };
        local.set_more_messages(more_messages).await?;

        // Classification: remotely-deleted and fully-cached messages
        // only need a flag refresh, everything else is a download
        // candidate.
        let mut unsynced = Vec::new();
        let mut flag_refresh = Vec::new();
        let mut incomplete_cached = HashSet::new();

        for (uid, envelope) in &remote_set {
            if envelope.flags.has(&Flag::Deleted) {
                flag_refresh.push(uid.clone());
            } else if !local.is_message_present(uid).await? {
                unsynced.push(envelope.clone());
            } else if !local.is_message_complete(uid).await? {
                incomplete_cached.insert(uid.clone());
                unsynced.push(envelope.clone());
            } else {
                flag_refresh.push(uid.clone());
            }
        }

        unsynced.sort_by(|left, right| cmp_uid_desc(&left.uid, &right.uid));
        if visible_limit > 0 && unsynced.len() > visible_limit as usize {
            unsynced.truncate(visible_limit as usize);
        }

        let mut small = Vec::new();
        let mut large = Vec::new();

        if !unsynced.is_empty() {
            let uids: Vec<String> = unsynced.iter().map(|e| e.uid.clone()).collect();
            let fetched = remote
                .fetch(&uids, FetchProfile::Envelope, config.max_download_size)
                .await?;

            for message in fetched {
                if message.envelope.flags.has(&Flag::Deleted) {
                    debug!(
                        "skipping message {} of folder {folder}, deleted on remote while fetching",
                        message.uid()
                    );
                    continue;
                }

                if config.max_download_size > 0 && message.envelope.size > config.max_download_size
                {
                    large.push(message);
                } else {
                    small.push(message);
                }
            }
        }

        let total_downloads = small.len() + large.len();
        let mut downloaded = 0;

        if !small.is_empty() {
            let uids: Vec<String> = small.iter().map(|m| m.uid().to_owned()).collect();
            let messages = remote
                .fetch(&uids, FetchProfile::Full, config.max_download_size)
                .await?;

            for message in messages {
                local.save_message(&message, true).await?;
                downloaded += 1;
                SyncEvent::Progress(folder.to_owned(), downloaded, total_downloads)
                    .emit(&self.handler)
                    .await;
                self.record_download(folder, &message, highest_seen, &incomplete_cached, report)
                    .await;
            }
        }

        if !large.is_empty() {
            let uids: Vec<String> = large.iter().map(|m| m.uid().to_owned()).collect();
            let messages = remote
                .fetch(&uids, FetchProfile::Structure, config.max_download_size)
                .await?;

            for mut message in messages {
                match message.structure.clone() {
                    Some(structure) => {
                        let mut content = Vec::new();
                        for part in structure.text_parts() {
                            let chunk = remote
                                .fetch_part(message.uid(), part, config.max_download_size)
                                .await?;
                            content.extend(chunk);
                        }
                        message.content = Some(content);
                    }
                    None => {
                        debug!(
                            "no usable structure for message {} of folder {folder}, \
                             falling back to bounded body fetch",
                            message.uid()
                        );
                        let uid = vec![message.uid().to_owned()];
                        if let Some(fallback) = remote
                            .fetch(&uid, FetchProfile::Sane, config.max_download_size)
                            .await?
                            .into_iter()
                            .next()
                        {
                            message.content = fallback.content;
                        }
                    }
                }

                local.save_message(&message, false).await?;
                downloaded += 1;
                SyncEvent::Progress(folder.to_owned(), downloaded, total_downloads)
                    .emit(&self.handler)
                    .await;
                self.record_download(folder, &message, highest_seen, &incomplete_cached, report)
                    .await;
            }
        }

        // Flag-only refresh, skipping messages the local cache
        // already considers deleted.
        let mut candidates = Vec::new();
        for uid in flag_refresh {
            if !local.flags(&uid).await?.has(&Flag::Deleted) {
                candidates.push(uid);
            }
        }

        if !candidates.is_empty() {
            let messages = remote.fetch(&candidates, FetchProfile::Flags, 0).await?;

            for message in messages {
                let uid = message.uid();
                let local_flags = local.flags(uid).await?;
                let mut changed = false;

                if message.envelope.flags.has(&Flag::Deleted) && config.sync_remote_deletions {
                    local.set_flag(uid, &Flag::Deleted, true).await?;
                    changed = true;
                } else {
                    for flag in config.sync_flags.iter() {
                        let remote_value = message.envelope.flags.has(flag);
                        if local_flags.has(flag) != remote_value {
                            local.set_flag(uid, flag, remote_value).await?;
                            changed = true;
                        }
                    }
                }

                if changed {
                    report.changed_flags += 1;
                    SyncEvent::FlagsChanged(folder.to_owned(), uid.to_owned())
                        .emit(&self.handler)
                        .await;
                }
            }
        }

        // Advance the highest-seen marker so the next pass can tell
        // backfill apart from new mail.
        let highest_fetched = remote_set.values().filter_map(Envelope::uid_number).max();
        if let Some(highest) = highest_fetched {
            if highest_seen.map_or(true, |seen| highest > seen) {
                local
                    .set_extra_number(HIGHEST_SEEN_UID_KEY, highest as i64)
                    .await?;
            }
        }

        Ok(())
    }

    async fn record_download(
        &self,
        folder: &str,
        message: &RemoteMessage,
        highest_seen: Option<u64>,
        incomplete_cached: &HashSet<String>,
        report: &mut SyncReport,
    ) {
        let previously_cached = incomplete_cached.contains(message.uid());
        if !previously_cached && !message.envelope.flags.has(&Flag::Seen) {
            report.new_messages += 1;
        }

        let old = message.envelope.is_older_than(highest_seen);
        SyncEvent::NewMessage(folder.to_owned(), message.uid().to_owned(), old)
            .emit(&self.handler)
            .await;
    }
}

/// Resolves the effective visible limit of a folder: a negative
/// folder value means no override, falling back to the configured
/// default. Zero disables windowing entirely.
fn resolve_visible_limit(folder_limit: i64, config: &SyncConfig) -> u32 {
    if folder_limit < 0 {
        config.default_visible_limit
    } else {
        folder_limit as u32
    }
}

/// Computes the first sequence number of the fetch window.
fn fetch_window_start(remote_count: u32, visible_limit: u32) -> u32 {
    if visible_limit > 0 {
        remote_count.saturating_sub(visible_limit) + 1
    } else {
        1
    }
}

/// Walks the source chain of an error down to its root cause.
fn root_cause(err: &dyn StdError) -> String {
    let mut cause = err;
    while let Some(source) = cause.source() {
        cause = source;
    }
    cause.to_string()
}

#[cfg(test)]
mod tests {
    use super::{fetch_window_start, resolve_visible_limit, SyncConfig};

    #[test]
    fn window_start() {
        assert_eq!(fetch_window_start(100, 25), 76);
        assert_eq!(fetch_window_start(25, 25), 1);
        assert_eq!(fetch_window_start(3, 25), 1);
        assert_eq!(fetch_window_start(100, 0), 1);
        assert_eq!(fetch_window_start(1, 1), 1);
    }

    #[test]
    fn visible_limit_fallback() {
        let config = SyncConfig {
            default_visible_limit: 25,
            ..Default::default()
        };

        assert_eq!(resolve_visible_limit(-1, &config), 25);
        assert_eq!(resolve_visible_limit(0, &config), 0);
        assert_eq!(resolve_visible_limit(10, &config), 10);
    }
}
