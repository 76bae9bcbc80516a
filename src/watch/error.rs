use std::time::Duration;

use thiserror::Error;

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors related to mailbox watching.
#[derive(Debug, Error)]
pub enum Error {
    #[error("wake timer timeout {0:?} must exceed the {1:?} alarm granularity")]
    TimerTooShortError(Duration, Duration),
}
