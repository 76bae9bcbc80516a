use thiserror::Error;

use crate::{backend, folder};

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors related to mailbox synchronization.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot execute remote folder operation")]
    RemoteError(#[from] backend::Error),

    #[error("cannot execute local folder operation")]
    LocalError(#[from] folder::Error),

    #[error("remote folder {0} reported negative message count {1}")]
    NegativeMessageCountError(String, i64),

    #[error("cannot find message {1} in remote folder {0}")]
    MessageNotFoundError(String, String),
}
