//! Cache repository traits: where cached entities and hits are kept.
//!
//! The `Repository` trait decouples the cache engine from a specific storage
//! implementation. A repository exposes two stores and a one-phase-commit
//! transaction primitive:
//!
//! - **Entity store** ([`EntityRepository`]): copies of source entities keyed by ID
//! - **Hit store** ([`HitRepository`]): cached query results keyed by [`HitId`]
//! - **Transactions**: `begin_tx` / `commit_tx` / `rollback_tx`
//!
//! # Transactions
//!
//! `begin_tx` returns a new [`Context`] bound to the transaction. Store calls
//! made with that context are staged in the transaction and become visible to
//! other contexts on commit. Calling `begin_tx` with a context that is already
//! in a transaction opens a nested transaction: committing it folds its changes
//! into the parent, rolling it back discards only its own changes.
//!
//! The invalidation cascade relies on this nesting: each step opens its own
//! transaction inside the caller's.
//!
//! # Error Handling
//!
//! Implementations return `Err` for:
//! - Storage connectivity issues
//! - Records that must exist but do not (`update`, `delete_by_id`, `find_by_ids`)
//! - Use of a committed or rolled-back transaction
//!
//! The cache engine never lets these errors fail a read.
//!
//! Implementations can check themselves against these rules with
//! `repository::contract::verify` from their tests.

#[doc(hidden)]
pub mod contract;
#[cfg(feature = "inmemory")]
pub mod inmemory;

#[cfg(feature = "inmemory")]
pub use inmemory::InMemoryRepository;

use crate::context::Context;
use crate::entity::CacheEntity;
use crate::error::Result;
use crate::hit::Hit;
use crate::key::HitId;
use async_trait::async_trait;

/// Store of cached entity copies.
#[async_trait]
pub trait EntityRepository<T: CacheEntity>: Send + Sync {
    /// Store a new entity.
    ///
    /// # Errors
    /// Returns `Err` if an entity with the same ID is already stored.
    async fn create(&self, ctx: &Context, entity: &T) -> Result<()>;

    /// Overwrite a stored entity.
    ///
    /// # Errors
    /// Returns `Err` if no entity with this ID is stored.
    async fn update(&self, ctx: &Context, entity: &T) -> Result<()>;

    /// Fetch a stored entity.
    ///
    /// # Returns
    /// - `Ok(Some(entity))` - Entity cached
    /// - `Ok(None)` - Entity not cached
    async fn find_by_id(&self, ctx: &Context, id: &T::Id) -> Result<Option<T>>;

    /// Fetch stored entities in the order of `ids`.
    ///
    /// # Errors
    /// Returns `Err` if any of the IDs is not stored.
    async fn find_by_ids(&self, ctx: &Context, ids: &[T::Id]) -> Result<Vec<T>>;

    /// Insert or overwrite every entity.
    async fn upsert(&self, ctx: &Context, entities: &[T]) -> Result<()>;

    /// Remove a stored entity.
    ///
    /// # Errors
    /// Returns `Err` if no entity with this ID is stored.
    async fn delete_by_id(&self, ctx: &Context, id: &T::Id) -> Result<()>;

    /// Remove every stored entity.
    async fn delete_all(&self, ctx: &Context) -> Result<()>;
}

/// Store of cached query results.
#[async_trait]
pub trait HitRepository<Id: Send + Sync>: Send + Sync {
    /// Store a new hit. An existing hit with the same query ID is replaced.
    async fn create(&self, ctx: &Context, hit: &Hit<Id>) -> Result<()>;

    /// Overwrite a stored hit.
    ///
    /// # Errors
    /// Returns `Err` if no hit with this query ID is stored.
    async fn update(&self, ctx: &Context, hit: &Hit<Id>) -> Result<()>;

    async fn find_by_id(&self, ctx: &Context, query_id: &HitId) -> Result<Option<Hit<Id>>>;

    /// Every stored hit; used by the invalidation scan.
    async fn find_all(&self, ctx: &Context) -> Result<Vec<Hit<Id>>>;

    /// Remove a stored hit.
    ///
    /// # Errors
    /// Returns `Err` if no hit with this query ID is stored.
    async fn delete_by_id(&self, ctx: &Context, query_id: &HitId) -> Result<()>;

    async fn delete_all(&self, ctx: &Context) -> Result<()>;
}

/// Storage behind the cache: an entity store, a hit store and transactions.
///
/// **IMPORTANT:** All methods use `&self`. Implementations use interior
/// mutability or external storage so a single repository can serve concurrent
/// cache operations.
#[async_trait]
pub trait Repository<T: CacheEntity>: Send + Sync {
    type Entities: EntityRepository<T>;
    type Hits: HitRepository<T::Id>;

    fn entities(&self) -> &Self::Entities;

    fn hits(&self) -> &Self::Hits;

    /// Open a transaction (nested if `ctx` is already in one).
    ///
    /// # Errors
    /// Returns `Err` if the context is cancelled or the parent transaction is finished.
    async fn begin_tx(&self, ctx: &Context) -> Result<Context>;

    /// Commit the transaction `ctx` is bound to.
    async fn commit_tx(&self, ctx: &Context) -> Result<()>;

    /// Roll back the transaction `ctx` is bound to.
    async fn rollback_tx(&self, ctx: &Context) -> Result<()>;
}
