//! Shared cache handle for services.
//!
//! Provides a convenient wrapper around [`Cache`] with Arc for easy sharing.

use crate::cache::Cache;
use crate::context::Context;
use crate::entity::CacheEntity;
use crate::error::Result;
use crate::key::HitId;
use crate::observability::CacheMetrics;
use crate::repository::Repository;
use crate::source::Source;
use std::future::Future;
use std::sync::Arc;

/// Cheaply cloneable cache handle.
///
/// Wraps `Cache` in `Arc` so it can be handed to spawned tasks without
/// requiring external `Arc<Mutex<>>` wrappers.
///
/// # Design
///
/// Sources and repositories serve `&self` calls (interior mutability or
/// external storage) and `Cache` keeps no mutable state, so the `Arc` alone
/// is enough.
///
/// # Example
///
/// ```ignore
/// use cache_through::{CacheService, InMemoryRepository};
///
/// let cache = CacheService::new(UserTable::new(pool), InMemoryRepository::new());
///
/// pub struct UserService {
///     cache: CacheService<User, UserTable, InMemoryRepository<User>>,
/// }
///
/// impl UserService {
///     pub async fn get(&self, ctx: &Context, id: u64) -> Result<Option<User>> {
///         self.cache.find_by_id(ctx, &id).await
///     }
/// }
/// ```
pub struct CacheService<T, S, R>
where
    T: CacheEntity,
    S: Source<T>,
    R: Repository<T>,
{
    cache: Arc<Cache<T, S, R>>,
}

impl<T, S, R> Clone for CacheService<T, S, R>
where
    T: CacheEntity,
    S: Source<T>,
    R: Repository<T>,
{
    fn clone(&self) -> Self {
        CacheService {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<T, S, R> CacheService<T, S, R>
where
    T: CacheEntity,
    S: Source<T>,
    R: Repository<T>,
{
    /// Create a new cache service over `source` and `repository`.
    pub fn new(source: S, repository: R) -> Self {
        CacheService {
            cache: Arc::new(Cache::new(source, repository)),
        }
    }

    /// Create a new cache service with custom metrics.
    pub fn with_metrics(source: S, repository: R, metrics: Box<dyn CacheMetrics>) -> Self {
        CacheService {
            cache: Arc::new(Cache::new(source, repository).with_metrics(metrics)),
        }
    }

    /// Share an already configured cache.
    pub fn from_cache(cache: Cache<T, S, R>) -> Self {
        CacheService {
            cache: Arc::new(cache),
        }
    }

    /// See [`Cache::create`].
    pub async fn create(&self, ctx: &Context, entity: &mut T) -> Result<()> {
        self.cache.create(ctx, entity).await
    }

    /// See [`Cache::find_by_id`].
    pub async fn find_by_id(&self, ctx: &Context, id: &T::Id) -> Result<Option<T>> {
        self.cache.find_by_id(ctx, id).await
    }

    /// See [`Cache::find_all`].
    pub async fn find_all(&self, ctx: &Context) -> Result<Vec<T>> {
        self.cache.find_all(ctx).await
    }

    /// See [`Cache::update`].
    pub async fn update(&self, ctx: &Context, entity: &T) -> Result<()> {
        self.cache.update(ctx, entity).await
    }

    /// See [`Cache::delete_by_id`].
    pub async fn delete_by_id(&self, ctx: &Context, id: &T::Id) -> Result<()> {
        self.cache.delete_by_id(ctx, id).await
    }

    /// See [`Cache::delete_all`].
    pub async fn delete_all(&self, ctx: &Context) -> Result<()> {
        self.cache.delete_all(ctx).await
    }

    /// See [`Cache::cached_query_many`].
    pub async fn cached_query_many<F, Fut>(
        &self,
        ctx: &Context,
        key: &HitId,
        query: F,
    ) -> Result<Vec<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        self.cache.cached_query_many(ctx, key, query).await
    }

    /// See [`Cache::cached_query_one`].
    pub async fn cached_query_one<F, Fut>(
        &self,
        ctx: &Context,
        key: &HitId,
        query: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        self.cache.cached_query_one(ctx, key, query).await
    }

    /// See [`Cache::invalidate_by_id`].
    pub async fn invalidate_by_id(&self, ctx: &Context, id: &T::Id) -> Result<()> {
        self.cache.invalidate_by_id(ctx, id).await
    }

    /// See [`Cache::invalidate_cached_query`].
    pub async fn invalidate_cached_query(&self, ctx: &Context, query_id: &HitId) -> Result<()> {
        self.cache.invalidate_cached_query(ctx, query_id).await
    }

    /// See [`Cache::drop_cached_values`].
    pub async fn drop_cached_values(&self, ctx: &Context) -> Result<()> {
        self.cache.drop_cached_values(ctx).await
    }

    /// Get a reference to the underlying cache.
    ///
    /// Use this if you need direct access to cache methods.
    pub fn cache(&self) -> &Cache<T, S, R> {
        &self.cache
    }
}
