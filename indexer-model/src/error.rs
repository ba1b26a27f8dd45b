use thiserror::Error;

/// Discriminated error kinds shared across the indexer. Each variant maps
/// to one of the policies in the error handling design: some are fatal at
/// startup, some taint an image for retry, some become HTTP statuses.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration parse or validation failure. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Upstream registry transport/5xx failure.
    #[error("upstream registry error: {0}")]
    Upstream(String),

    /// 404 from the upstream registry on a tag, repository or manifest.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed manifest/config blob, or unsupported media type.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Credential acquisition or 401/403 after exhausting challenges.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Snapshot read/write failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid API request input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// API lookup of a repository or image that does not exist.
    #[error("not indexed: {0}")]
    IndexMiss(String),
}

impl Error {
    /// True for the error kinds that should taint an `IndexImage` action
    /// for retry, per the dispatch policy table. `NotFound` is folded into
    /// `Upstream` handling here, matching the reference behavior.
    pub fn taints_retry(&self) -> bool {
        matches!(
            self,
            Error::Upstream(_) | Error::NotFound(_) | Error::Protocol(_) | Error::Auth(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
