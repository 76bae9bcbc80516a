//! Rust library to reconcile and watch remote IMAP mailboxes.
//!
//! The main purpose of this library is to keep a local message cache
//! faithful to the true state of a remote mailbox, and to learn about
//! remote changes as they happen instead of polling.
//!
//! Two engines are exposed:
//!
//! - The [`MailboxSynchronizer`](sync::MailboxSynchronizer) performs
//!   one full reconcile-and-download pass for one folder: identity
//!   matching, windowing, partial vs. full download, flag-only
//!   refresh and deletion propagation.
//! - The [`WatchManager`](watch::WatchManager) maintains long-lived
//!   IDLE sessions across many folders under resource constraints
//!   (sessions, device wake locks, a single OS wake-up alarm),
//!   retrying failed sessions with an error-class-specific backoff.
//!
//! The wire-level IMAP codec, the connection pooling and the
//! persistent local store are not implemented here: they live behind
//! the [`backend`] and [`folder`] traits, so the library fits any
//! application able to provide them.
//!
//! See usage examples in the `/tests` folder.

pub mod backend;
pub mod envelope;
pub mod folder;
pub mod message;
pub mod sync;
pub mod watch;

#[doc(inline)]
pub use envelope::{flag, Envelope, Envelopes, Flag, Flags};
