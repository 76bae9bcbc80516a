//! # Synchronization configuration
//!
//! Module dedicated to the per-pass synchronization configuration.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
#[cfg(feature = "derive")]
use serde::{Deserialize, Serialize};

use crate::envelope::{Flag, Flags};

/// The default visible limit applied to folders without an override.
pub const DEFAULT_VISIBLE_LIMIT: u32 = 25;

/// The flags mirrored from the remote folder by default.
static DEFAULT_SYNC_FLAGS: Lazy<Flags> =
    Lazy::new(|| Flags::from_iter([Flag::Seen, Flag::Answered, Flag::Flagged]));

/// When messages marked for deletion get expunged on the remote
/// folder.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(Serialize, Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum ExpungePolicy {
    /// Never expunge automatically.
    #[default]
    Never,

    /// Expunge at the beginning of every synchronization pass.
    OnPoll,
}

/// The configuration of one synchronization pass.
///
/// The configuration is immutable and supplied per call; it carries
/// no per-folder state. Folder-level overrides (the visible limit)
/// come from the local folder itself.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(Serialize, Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct SyncConfig {
    /// The remote expunge policy.
    pub expunge_policy: ExpungePolicy,

    /// Messages older than this date are not polled. Used as a hint
    /// for the remote listing and as a filter on the working set.
    pub earliest_poll_date: Option<DateTime<Utc>>,

    /// Messages larger than this size (in bytes) only get a partial,
    /// text-only download. Zero means unlimited.
    pub max_download_size: u32,

    /// The visible limit applied to folders without an override.
    pub default_visible_limit: u32,

    /// The set of flags mirrored from the remote folder.
    pub sync_flags: Flags,

    /// Whether messages deleted on the remote folder should also be
    /// removed from the local cache.
    pub sync_remote_deletions: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            expunge_policy: ExpungePolicy::default(),
            earliest_poll_date: None,
            max_download_size: 0,
            default_visible_limit: DEFAULT_VISIBLE_LIMIT,
            sync_flags: DEFAULT_SYNC_FLAGS.clone(),
            sync_remote_deletions: false,
        }
    }
}
