use thiserror::Error;

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the local folder store.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open local folder {0}")]
    OpenFolder(String),

    #[error("local folder storage failure: {0}")]
    Storage(String),
}
