//! # Folder
//!
//! Module dedicated to the local folder cache seam. The synchronizer
//! reconciles a [`LocalFolder`] against its remote counterpart; the
//! persistent storage itself (database, maildir, whatever the
//! application uses) lives behind these traits.

mod error;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[doc(inline)]
pub use self::error::{Error, Result};
use crate::{
    envelope::{Flag, Flags},
    message::RemoteMessage,
};

/// Folder extra key holding the last seen UID validity.
pub const UID_VALIDITY_KEY: &str = "uidValidity";

/// Folder extra key holding the highest server UID ever seen, used to
/// tell backfilled messages apart from genuinely new mail.
pub const HIGHEST_SEEN_UID_KEY: &str = "highestSeenUid";

/// Whether remote history exists beyond the locally fetched window.
///
/// The state is persisted per folder. It degrades to [`Unknown`]
/// whenever a remote-deletion sweep removes local messages, because
/// the window semantics may have shifted, and gets resolved again by
/// a dedicated remote probe. See [`recompute_more_messages`].
///
/// [`Unknown`]: MoreMessages::Unknown
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MoreMessages {
    /// Nothing is known about older remote messages.
    #[default]
    Unknown,

    /// Older messages exist beyond the fetched window.
    Available,

    /// The fetched window already starts at the oldest message.
    None,
}

impl MoreMessages {
    /// Whether the state still needs to be resolved by a probe.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl From<bool> for MoreMessages {
    fn from(available: bool) -> Self {
        if available {
            Self::Available
        } else {
            Self::None
        }
    }
}

/// Recomputes the more-messages state after a synchronization pass.
///
/// Any local removal invalidates the previous state. An unknown state
/// is trivially resolved when the fetch window already started at the
/// oldest message (`remote_start <= 1`), otherwise it takes the probe
/// result, or stays unknown when no probe ran.
pub fn recompute_more_messages(
    current: MoreMessages,
    removed_any_local: bool,
    remote_start: u32,
    probe: Option<bool>,
) -> MoreMessages {
    let current = if removed_any_local {
        MoreMessages::Unknown
    } else {
        current
    };

    match current {
        MoreMessages::Unknown if remote_start <= 1 => MoreMessages::None,
        MoreMessages::Unknown => probe.map(MoreMessages::from).unwrap_or(MoreMessages::Unknown),
        resolved => resolved,
    }
}

/// The local folder store.
///
/// One store per account, handing out per-folder caches.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Returns a handle on the cache of the given folder.
    async fn folder(&self, name: &str) -> Result<Box<dyn LocalFolder>>;
}

/// The per-folder local cache.
///
/// Messages are addressed by their server UID. Folder extras are a
/// small per-folder key-value area for synchronizer bookkeeping, see
/// [`UID_VALIDITY_KEY`] and [`HIGHEST_SEEN_UID_KEY`].
#[async_trait]
pub trait LocalFolder: Send {
    /// The visible-limit override of the folder, or a negative value
    /// when the folder has none.
    async fn visible_limit(&self) -> Result<i64>;

    /// Lists the UIDs of all cached messages.
    async fn uids(&self) -> Result<Vec<String>>;

    /// Returns the UID → effective date index of cached messages,
    /// used for windowing decisions only.
    async fn message_dates(&self) -> Result<HashMap<String, DateTime<Utc>>>;

    /// Whether a message with the given UID is cached.
    async fn is_message_present(&self, uid: &str) -> Result<bool>;

    /// Whether the cached message content is complete, as opposed to
    /// a partial text-only download.
    async fn is_message_complete(&self, uid: &str) -> Result<bool>;

    /// Returns the cached flags of the given message.
    async fn flags(&self, uid: &str) -> Result<Flags>;

    /// Sets or clears one flag on the given cached message.
    async fn set_flag(&self, uid: &str, flag: &Flag, value: bool) -> Result<()>;

    /// Removes the given messages from the cache.
    async fn destroy_messages(&self, uids: &[String]) -> Result<()>;

    /// Saves a downloaded message, complete or partial.
    async fn save_message(&self, message: &RemoteMessage, complete: bool) -> Result<()>;

    /// Reads a folder extra string.
    async fn extra_string(&self, key: &str) -> Result<Option<String>>;

    /// Writes a folder extra string.
    async fn set_extra_string(&self, key: &str, value: &str) -> Result<()>;

    /// Reads a folder extra number.
    async fn extra_number(&self, key: &str) -> Result<Option<i64>>;

    /// Writes a folder extra number.
    async fn set_extra_number(&self, key: &str, value: i64) -> Result<()>;

    /// Returns the persisted more-messages state.
    async fn more_messages(&self) -> Result<MoreMessages>;

    /// Persists the more-messages state.
    async fn set_more_messages(&self, more_messages: MoreMessages) -> Result<()>;

    /// Persists the time of the last synchronization attempt.
    async fn set_last_checked(&self, at: DateTime<Utc>) -> Result<()>;

    /// Persists the human-readable folder status, or clears it.
    async fn set_status(&self, status: Option<&str>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::{recompute_more_messages, MoreMessages};

    #[test]
    fn recompute() {
        // untouched state survives when nothing was removed
        assert_eq!(
            recompute_more_messages(MoreMessages::Available, false, 10, None),
            MoreMessages::Available,
        );
        assert_eq!(
            recompute_more_messages(MoreMessages::None, false, 10, Some(true)),
            MoreMessages::None,
        );

        // removals invalidate the previous state
        assert_eq!(
            recompute_more_messages(MoreMessages::Available, true, 10, None),
            MoreMessages::Unknown,
        );
        assert_eq!(
            recompute_more_messages(MoreMessages::None, true, 10, Some(true)),
            MoreMessages::Available,
        );

        // a window starting at the oldest message resolves trivially
        assert_eq!(
            recompute_more_messages(MoreMessages::Unknown, false, 1, None),
            MoreMessages::None,
        );
        assert_eq!(
            recompute_more_messages(MoreMessages::Unknown, true, 0, Some(true)),
            MoreMessages::None,
        );

        // otherwise the probe decides
        assert_eq!(
            recompute_more_messages(MoreMessages::Unknown, false, 5, Some(true)),
            MoreMessages::Available,
        );
        assert_eq!(
            recompute_more_messages(MoreMessages::Unknown, false, 5, Some(false)),
            MoreMessages::None,
        );
        assert_eq!(
            recompute_more_messages(MoreMessages::Unknown, false, 5, None),
            MoreMessages::Unknown,
        );
    }
}
