//! Normalized query cache.
//!
//! Layering, bottom up: [`store`] holds normalized entity records, [`keys`]
//! defines the canonical identifiers, [`normalize`] decomposes responses into
//! records plus a ref-tree shape, [`registry`] tracks which cached views
//! reference which entities, [`slot`] is the per-key result state machine,
//! [`subscription`] routes snapshots to observers, and the coordinators in
//! [`coordinator`] / [`mutation`] drive reads and writes. [`context`] wires
//! it all into the instance the application holds.

pub mod context;
pub mod coordinator;
pub mod debounce;
pub mod keys;
pub(crate) mod lock;
pub mod mutation;
pub mod normalize;
pub mod registry;
pub mod slot;
pub mod store;
pub mod subscription;

pub use context::CacheContext;
pub use coordinator::{CachePolicy, QueryOptions, QueryResponse};
pub use debounce::Debouncer;
pub use keys::{EntityKey, QueryKey};
pub use mutation::{MutationEffects, MutationResponse};
pub use normalize::{EntityMarker, EntitySchema};
pub use registry::DependencyRegistry;
pub use slot::{SlotSnapshot, SlotStatus};
pub use store::EntityStore;
pub use subscription::{SubscriberCallback, SubscriptionHandle};
