//! # Backend
//!
//! Module dedicated to the remote mailbox seam. The synchronizer and
//! the watch subsystem never talk IMAP themselves: they drive a
//! [`RemoteFolder`] obtained from a [`RemoteStore`], and the actual
//! wire codec plus connection pooling live behind these traits.

mod error;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[doc(inline)]
pub use self::error::{Error, Result};
use crate::{envelope::Envelopes, message::{MessagePart, RemoteMessage}};

/// The mode a remote folder is opened in.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OpenMode {
    /// The folder is opened for reading only.
    #[default]
    ReadOnly,

    /// The folder is opened for reading and writing.
    ReadWrite,
}

/// The subset of message data a fetch should transfer.
///
/// Profiles keep the round-trips cheap: the synchronizer asks for
/// flags when it only refreshes flags, and for content only once it
/// has decided a message is worth downloading.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FetchProfile {
    /// Flags only.
    Flags,

    /// Flags plus envelope data (size, date).
    Envelope,

    /// Flags, envelope and MIME structure.
    Structure,

    /// The complete message content.
    Full,

    /// A bounded portion of the message content, used as a fallback
    /// when no usable structure could be obtained.
    Sane,
}

/// The outcome of a blocking IDLE wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IdleEvent {
    /// The server signaled mailbox changes.
    Changed,

    /// The wait expired without any change; the session needs to be
    /// re-entered to keep the connection alive.
    TimedOut,
}

/// The remote mailbox store.
///
/// One store per account. It owns connection pooling and reuse, which
/// is why the watch subsystem goes through it to force-close every
/// pooled connection after suspected poisoning.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns a handle on the given remote folder. The handle is
    /// cheap: no network round-trip happens before [`RemoteFolder::open`].
    async fn folder(&self, name: &str) -> Result<Box<dyn RemoteFolder>>;

    /// Forcibly closes every pooled connection of the account.
    async fn disconnect_all(&self) -> Result<()>;
}

/// A handle on one remote folder.
#[async_trait]
pub trait RemoteFolder: Send {
    /// Opens the folder in the given mode.
    async fn open(&mut self, mode: OpenMode) -> Result<()>;

    /// Closes the folder and returns its connection to the pool.
    async fn close(&mut self) -> Result<()>;

    /// Returns the number of messages in the folder.
    ///
    /// Servers have been seen reporting negative counts; callers
    /// treat those as a failed pass.
    async fn message_count(&mut self) -> Result<i64>;

    /// Returns the UID validity of the folder.
    async fn uid_validity(&mut self) -> Result<u32>;

    /// Lists envelopes for the sequence-number range `[start, end]`
    /// (1-based, inclusive). The earliest date is a hint forwarded to
    /// the server, not a guarantee: callers re-filter the result.
    async fn list_envelopes(
        &mut self,
        start: u32,
        end: u32,
        earliest: Option<DateTime<Utc>>,
    ) -> Result<Envelopes>;

    /// Fetches the given messages by UID with the requested profile.
    /// Content-bearing profiles are bounded by `max_size` bytes when
    /// it is non-zero.
    async fn fetch(
        &mut self,
        uids: &[String],
        profile: FetchProfile,
        max_size: u32,
    ) -> Result<Vec<RemoteMessage>>;

    /// Fetches a single body part of the given message, bounded by
    /// `max_size` bytes when it is non-zero.
    async fn fetch_part(
        &mut self,
        uid: &str,
        part: &MessagePart,
        max_size: u32,
    ) -> Result<Vec<u8>>;

    /// Expunges messages marked for deletion.
    async fn expunge(&mut self) -> Result<()>;

    /// Probes whether messages older than the fetch window exist,
    /// i.e. messages before sequence number `start` that still match
    /// the earliest date.
    async fn more_messages_available(
        &mut self,
        start: u32,
        earliest: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Whether the server supports the IDLE extension.
    fn supports_idle(&self) -> bool;

    /// Blocks until the server signals changes or the given timeout
    /// expires. Dropping the returned future leaves the session in a
    /// reusable state, which is how watchers get interrupted promptly.
    async fn idle(&mut self, timeout: Duration) -> Result<IdleEvent>;
}
