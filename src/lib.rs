//! Onside cache: a normalized client-side data layer for a GraphQL backend.
//!
//! The crate sits between UI components and the network: responses are
//! decomposed into identity-keyed entity records so every query view of the
//! same post reads one shared record, identical concurrent queries share a
//! single network call, mutations invalidate exactly the views they affect,
//! and subscribers receive a snapshot on every transition of the slot they
//! observe.
//!
//! Entry points: build a [`cache::CacheContext`] from [`config::CacheSettings`]
//! and an entity marker schema (see [`domain::schema`]), then either call it
//! directly with raw [`serde_json::Value`] variables or wrap it in the typed
//! [`client::OnsideClient`].

pub mod cache;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod telemetry;

pub use cache::{
    CacheContext, CachePolicy, Debouncer, EntityKey, EntityMarker, EntitySchema, MutationEffects,
    MutationResponse, QueryKey, QueryOptions, QueryResponse, SlotSnapshot, SlotStatus,
    SubscriptionHandle,
};
pub use client::{Fetcher, OnsideClient};
pub use config::CacheSettings;
pub use error::QueryError;
