//! Source of record and its optional capabilities.
//!
//! The cache only requires a source to look entities up by ID. Every write and
//! the find-all query are optional capabilities, each a narrow trait:
//!
//! | Capability | Trait | Used by |
//! |------------|-------|---------|
//! | `Create` | [`Creator`] | `Cache::create` |
//! | `Update` | [`Updater`] | `Cache::update` |
//! | `DeleteByID` | [`ByIdDeleter`] | `Cache::delete_by_id` |
//! | `DeleteAll` | [`AllDeleter`] | `Cache::delete_all` |
//! | `FindAll` | [`AllFinder`] | `Cache::find_all` |
//!
//! A source advertises a capability by returning itself from the matching
//! `as_*` accessor. The cache asks on every call and answers
//! `Error::CapabilityMissing` when the accessor returns `None`.
//!
//! ```ignore
//! #[async_trait]
//! impl Source<User> for UserTable {
//!     async fn find_by_id(&self, ctx: &Context, id: &u64) -> Result<Option<User>> { ... }
//!
//!     fn as_updater(&self) -> Option<&dyn Updater<User>> {
//!         Some(self)
//!     }
//! }
//! ```

#[cfg(feature = "inmemory")]
pub mod inmemory;

#[cfg(feature = "inmemory")]
pub use inmemory::InMemorySource;

use crate::context::Context;
use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;

/// Optional source capabilities, named after the operation that needs them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    Create,
    Update,
    DeleteByID,
    DeleteAll,
    FindAll,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Create => "Create",
            Capability::Update => "Update",
            Capability::DeleteByID => "DeleteByID",
            Capability::DeleteAll => "DeleteAll",
            Capability::FindAll => "FindAll",
        };
        f.write_str(name)
    }
}

/// Creates entities in the source.
#[async_trait]
pub trait Creator<T: CacheEntity>: Send + Sync {
    /// Persist a new entity. The source may assign its ID.
    async fn create(&self, ctx: &Context, entity: &mut T) -> Result<()>;
}

/// Updates existing entities in the source.
#[async_trait]
pub trait Updater<T: CacheEntity>: Send + Sync {
    async fn update(&self, ctx: &Context, entity: &T) -> Result<()>;
}

/// Deletes a single entity by ID.
#[async_trait]
pub trait ByIdDeleter<Id: Send + Sync>: Send + Sync {
    async fn delete_by_id(&self, ctx: &Context, id: &Id) -> Result<()>;
}

/// Deletes every entity.
#[async_trait]
pub trait AllDeleter: Send + Sync {
    async fn delete_all(&self, ctx: &Context) -> Result<()>;
}

/// Streams every entity.
pub trait AllFinder<T: CacheEntity>: Send + Sync {
    fn find_all<'a>(&'a self, ctx: &'a Context) -> BoxStream<'a, Result<T>>;
}

/// The system of record placed behind the cache.
///
/// # Returns (`find_by_id`)
/// - `Ok(Some(entity))` - Entity found
/// - `Ok(None)` - Entity not found (not an error, and cached as such)
/// - `Err(e)` - Source failure, always returned to the caller unchanged
#[async_trait]
pub trait Source<T: CacheEntity>: Send + Sync {
    /// Fetch an entity by ID.
    async fn find_by_id(&self, ctx: &Context, id: &T::Id) -> Result<Option<T>>;

    fn as_creator(&self) -> Option<&dyn Creator<T>> {
        None
    }

    fn as_updater(&self) -> Option<&dyn Updater<T>> {
        None
    }

    fn as_by_id_deleter(&self) -> Option<&dyn ByIdDeleter<T::Id>> {
        None
    }

    fn as_all_deleter(&self) -> Option<&dyn AllDeleter> {
        None
    }

    fn as_all_finder(&self) -> Option<&dyn AllFinder<T>> {
        None
    }
}

// ============================================================================
// Capability detection
// ============================================================================

pub(crate) fn require_creator<T, S>(source: &S) -> Result<&dyn Creator<T>>
where
    T: CacheEntity,
    S: Source<T> + ?Sized,
{
    source
        .as_creator()
        .ok_or(Error::CapabilityMissing(Capability::Create))
}

pub(crate) fn require_updater<T, S>(source: &S) -> Result<&dyn Updater<T>>
where
    T: CacheEntity,
    S: Source<T> + ?Sized,
{
    source
        .as_updater()
        .ok_or(Error::CapabilityMissing(Capability::Update))
}

pub(crate) fn require_by_id_deleter<T, S>(source: &S) -> Result<&dyn ByIdDeleter<T::Id>>
where
    T: CacheEntity,
    S: Source<T> + ?Sized,
{
    source
        .as_by_id_deleter()
        .ok_or(Error::CapabilityMissing(Capability::DeleteByID))
}

pub(crate) fn require_all_deleter<T, S>(source: &S) -> Result<&dyn AllDeleter>
where
    T: CacheEntity,
    S: Source<T> + ?Sized,
{
    source
        .as_all_deleter()
        .ok_or(Error::CapabilityMissing(Capability::DeleteAll))
}

pub(crate) fn require_all_finder<T, S>(source: &S) -> Result<&dyn AllFinder<T>>
where
    T: CacheEntity,
    S: Source<T> + ?Sized,
{
    source
        .as_all_finder()
        .ok_or(Error::CapabilityMissing(Capability::FindAll))
}
