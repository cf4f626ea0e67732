//! Per-key cached result state.
//!
//! State machine: `Empty -> Pending -> {Ready, Error}`; `Ready -> Pending` on
//! revalidation and `Error -> Pending` on retry, retaining the last good data
//! so consumers can render it while the fetch is in flight.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;

use crate::client::Fetcher;
use crate::error::QueryError;

use super::keys::QueryKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Empty,
    Pending,
    Ready,
    Error,
}

/// Point-in-time view of a slot, dispatched to subscribers.
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub key: QueryKey,
    pub status: SlotStatus,
    /// Denormalized last-known data; survives revalidation and errors.
    pub data: Option<Value>,
    pub error: Option<QueryError>,
    pub is_stale: bool,
    pub last_fetched_at: Option<OffsetDateTime>,
}

/// How to re-issue the fetch that last populated a slot.
#[derive(Clone)]
pub(crate) struct FetchOrigin {
    pub operation: String,
    pub variables: Value,
    pub fetcher: Arc<dyn Fetcher>,
}

pub(crate) struct ResultSlot {
    pub status: SlotStatus,
    /// Ref-tree shape of the last successful response.
    pub shape: Option<Value>,
    pub error: Option<QueryError>,
    pub is_stale: bool,
    pub last_fetched_at: Option<OffsetDateTime>,
    /// Issuance counter of the last applied response (sequence guard).
    pub last_applied_seq: u64,
    pub subscribers: usize,
    /// When the slot last became unobserved; drives retention GC.
    pub idle_since: OffsetDateTime,
    pub origin: Option<FetchOrigin>,
}

impl ResultSlot {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            status: SlotStatus::Empty,
            shape: None,
            error: None,
            is_stale: false,
            last_fetched_at: None,
            last_applied_seq: 0,
            subscribers: 0,
            idle_since: now,
            origin: None,
        }
    }

    pub fn begin_fetch(&mut self, origin: FetchOrigin) {
        self.status = SlotStatus::Pending;
        self.origin = Some(origin);
    }

    /// True when a response tagged `seq` has been superseded by a later one.
    pub fn supersedes(&self, seq: u64) -> bool {
        seq < self.last_applied_seq
    }

    pub fn apply_success(&mut self, shape: Value, seq: u64, now: OffsetDateTime) {
        self.status = SlotStatus::Ready;
        self.shape = Some(shape);
        self.error = None;
        self.is_stale = false;
        self.last_fetched_at = Some(now);
        self.last_applied_seq = seq;
    }

    /// Record a failed fetch; the last good shape is retained.
    pub fn apply_error(&mut self, error: QueryError, seq: u64, now: OffsetDateTime) {
        self.status = SlotStatus::Error;
        self.error = Some(error);
        self.last_fetched_at = Some(now);
        self.last_applied_seq = seq;
    }

    pub fn mark_stale(&mut self) {
        self.is_stale = true;
    }

    /// Ready, not invalidated, and within the freshness window (if any).
    pub fn is_fresh(&self, stale_time: Option<Duration>, now: OffsetDateTime) -> bool {
        if self.status != SlotStatus::Ready || self.is_stale {
            return false;
        }
        match (stale_time, self.last_fetched_at) {
            (None, _) => true,
            (Some(window), Some(at)) => {
                (now - at).whole_milliseconds() <= window.as_millis() as i128
            }
            (Some(_), None) => false,
        }
    }

    pub fn retain_subscriber(&mut self) {
        self.subscribers += 1;
    }

    pub fn release_subscriber(&mut self, now: OffsetDateTime) {
        self.subscribers = self.subscribers.saturating_sub(1);
        if self.subscribers == 0 {
            self.idle_since = now;
        }
    }

    /// Eligible for garbage collection: unobserved beyond the retention window.
    pub fn is_expired(&self, retention: Duration, now: OffsetDateTime) -> bool {
        self.subscribers == 0
            && (now - self.idle_since).whole_milliseconds() > retention.as_millis() as i128
    }
}
