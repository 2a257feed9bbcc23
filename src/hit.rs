//! Hit records: which entities a cached query returned.
//!
//! ```text
//! Hit    1:N Entity (by ID)
//! Entity N:M Hit
//! ```
//!
//! The invalidation cascade walks this relation in both directions.

use crate::key::HitId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cached result set of one query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hit<Id> {
    /// Encoded query key; primary key of the hit store.
    pub query_id: HitId,
    /// IDs returned by the query, in result order. Empty means the query
    /// found nothing, and that answer is cached too.
    pub entity_ids: Vec<Id>,
    /// When the hit was recorded. Informational only.
    pub timestamp: DateTime<Utc>,
}

impl<Id: PartialEq> Hit<Id> {
    /// Whether this hit's result set includes `id`.
    pub fn references(&self, id: &Id) -> bool {
        self.entity_ids.iter().any(|candidate| candidate == id)
    }

    /// Whether this hit caches an empty result.
    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }
}
