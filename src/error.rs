use thiserror::Error;

/// Failure taxonomy for query and mutation execution.
///
/// Errors cross the public boundary as values inside `QueryResponse` /
/// `MutationResponse`; the cache core never throws past its API. The enum is
/// `Clone` because a single in-flight fetch may be awaited by many callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The fetcher failed before producing a response (network, timeout).
    /// Recoverable by retry.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The backend rejected the request as unauthenticated or unauthorized.
    /// Routed to the registered auth handler; never retried automatically.
    #[error("request not authorized: {0}")]
    Auth(String),
    /// The response shape cannot be safely normalized. Fatal for the query;
    /// the cache is left untouched.
    #[error("response decode failed: {0}")]
    Decode(String),
}

impl QueryError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// True for errors that should reach the designated auth handler.
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// True for errors that a caller may reasonably retry.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
