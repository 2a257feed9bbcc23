//! Core entity trait that all cached entities must implement.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

/// Trait that all entities stored in cache must implement.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use cache_through::CacheEntity;
///
/// #[derive(Clone, Serialize, Deserialize)]
/// pub struct Employment {
///     pub id: u64,
///     pub employer_name: String,
/// }
///
/// impl CacheEntity for Employment {
///     type Id = u64;
///
///     fn cache_id(&self) -> Self::Id {
///         self.id
///     }
///
///     fn cache_prefix() -> &'static str {
///         "employment"
///     }
/// }
/// ```
pub trait CacheEntity: Send + Sync + Serialize + for<'de> Deserialize<'de> + Clone + 'static {
    /// Type of the entity's ID.
    ///
    /// IDs are compared when scanning hits, serialized into query keys and
    /// stored inside hit records.
    type Id: Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Return the entity's ID.
    fn cache_id(&self) -> Self::Id;

    /// Return the cache prefix for this entity type.
    ///
    /// Used to namespace repository tables. Example: "employment", "borrower"
    fn cache_prefix() -> &'static str;

    /// Serialize entity for cache storage.
    ///
    /// Uses Postcard with versioned envelopes.
    /// See `crate::serialization` for implementation details.
    fn serialize_for_cache(&self) -> Result<Vec<u8>> {
        crate::serialization::serialize_for_cache(self)
    }

    /// Deserialize entity from cache storage.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCacheEntry`: Bad magic or corrupted envelope
    /// - `Error::VersionMismatch`: Schema version changed
    /// - `Error::DeserializationError`: Corrupted payload
    fn deserialize_from_cache(bytes: &[u8]) -> Result<Self> {
        crate::serialization::deserialize_from_cache(bytes)
    }
}
