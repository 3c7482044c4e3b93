use std::io::Error as IoError;
use thiserror::Error;

/// Error type throughout the cachette stack.
///
/// The filter itself never hands one of these to the framework; entry points
/// always answer with a [`FilterStatus`](crate::proxy::FilterStatus). The
/// variants below are the currency between the filter and a backend: lookup
/// failures fail open toward upstream, body read failures are fatal to the
/// stream being served.
#[derive(Debug, Error)]
pub enum CachetteError {
    /// The backend could not service the operation at all
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    /// The entry disappeared between the headers callback and a body read
    #[error("cache entry vanished mid-stream")]
    EntryVanished,
    /// The backend refused further ingestion (quota or shutdown)
    #[error("cache insert aborted by backend")]
    InsertAborted,
    ///
    #[error(transparent)]
    Http(#[from] http::Error),
    ///
    #[error(transparent)]
    Io(#[from] IoError),
}
