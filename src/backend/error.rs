use std::io;

use thiserror::Error;

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by remote mailbox backends.
///
/// The variants follow the failure classes the push subsystem knows
/// how to back off from, so backend implementations are expected to
/// map their own errors onto the closest class.
#[derive(Debug, Error)]
pub enum Error {
    /// The server rejected the credentials.
    #[error("cannot authenticate to remote mailbox: {0}")]
    Authentication(String),

    /// The connection failed or broke mid-operation.
    #[error("cannot reach remote mailbox")]
    Io(#[from] io::Error),

    /// The server reported a condition unlikely to resolve soon.
    #[error("remote mailbox reported a permanent failure: {0}")]
    ProtocolPermanent(String),

    /// The server reported a condition likely to resolve on retry.
    #[error("remote mailbox reported a transient failure: {0}")]
    ProtocolTransient(String),

    /// Anything the backend could not classify.
    #[error("unexpected remote mailbox failure: {0}")]
    Unexpected(String),
}
