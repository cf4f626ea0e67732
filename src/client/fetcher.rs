//! The network transport seam.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::QueryError;

/// Executes one operation against the backend.
///
/// Transport, authentication headers, and language-header negotiation live
/// behind this trait; the cache core only sees the resulting JSON value or a
/// classified [`QueryError`]. Implementations classify their own failures:
/// connection problems as `Transport`, 401/403-style rejections as `Auth`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, operation: &str, variables: &Value) -> Result<Value, QueryError>;
}
