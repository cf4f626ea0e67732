//! Typed client surface: the transport seam plus per-operation wrappers.

pub mod fetcher;
pub mod ops;

pub use fetcher::Fetcher;
pub use ops::{AuthSession, Credentials, OnsideClient, SearchFilter};
