//! Cache engine - read-through/write-through caching in front of a source.
//!
//! [`Cache`] serves reads from a [`Repository`] and falls back to the
//! [`Source`] on a miss, recording every answered query as a [`Hit`](crate::Hit).
//! Writes go to the source first and then keep the repository consistent,
//! invalidating every cached query that could have observed the change.
//!
//! | Operation | Source capability | Cache effect |
//! |-----------|-------------------|--------------|
//! | `create` | `Creator` | Mirror the new entity |
//! | `find_by_id` | (required) | Entity store, then cached `FindByID` query |
//! | `find_all` | `AllFinder` | Cached `FindAll` query |
//! | `update` | `Updater` | Overwrite the copy, or invalidate it |
//! | `delete_by_id` | `ByIdDeleter` | `invalidate_by_id` |
//! | `delete_all` | `AllDeleter` | `drop_cached_values` |
//!
//! Repository failures never fail a read: the engine logs them and answers
//! from the source. A cancellation or deadline reported by a store is not a
//! failure of the store and is returned as is. Source failures are always
//! returned unchanged.

mod invalidate;
mod query;

use crate::context::Context;
use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use crate::key::{HitId, QueryKey};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::repository::{EntityRepository, HitRepository, Repository};
use crate::source::{
    require_all_deleter, require_all_finder, require_by_id_deleter, require_creator,
    require_updater, Source,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::marker::PhantomData;

/// Read-through/write-through cache of `T` entities.
///
/// Holds no mutable state of its own; every operation takes `&self`, so one
/// `Cache` can serve concurrent tasks (see [`CacheService`](crate::CacheService)).
///
/// # Example
///
/// ```ignore
/// use cache_through::{Cache, Context, InMemoryRepository};
///
/// let cache = Cache::new(user_table, InMemoryRepository::new());
/// let ctx = Context::new();
///
/// let user = cache.find_by_id(&ctx, &42).await?;   // source, then cached
/// let again = cache.find_by_id(&ctx, &42).await?;  // entity store
/// ```
pub struct Cache<T, S, R>
where
    T: CacheEntity,
    S: Source<T>,
    R: Repository<T>,
{
    source: S,
    repository: R,
    metrics: Box<dyn CacheMetrics>,
    clock: fn() -> DateTime<Utc>,
    _entity: PhantomData<fn() -> T>,
}

impl<T, S, R> Cache<T, S, R>
where
    T: CacheEntity,
    S: Source<T>,
    R: Repository<T>,
{
    /// Create a cache over `source`, keeping cached data in `repository`.
    pub fn new(source: S, repository: R) -> Self {
        Cache {
            source,
            repository,
            metrics: Box::new(NoOpMetrics),
            clock: Utc::now,
            _entity: PhantomData,
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set the clock used to timestamp hits.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// The source of record.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The repository holding cached entities and hits.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Create an entity in the source and mirror it into the entity store.
    ///
    /// The source may assign fields (such as the ID) through `entity`. A
    /// failed mirror is logged and ignored, unless the context was cancelled
    /// or timed out.
    ///
    /// # Errors
    ///
    /// - `Error::CapabilityMissing`: The source cannot create
    /// - Any error returned by the source
    pub async fn create(&self, ctx: &Context, entity: &mut T) -> Result<()> {
        ctx.check()?;
        let creator = require_creator::<T, S>(&self.source)?;
        creator.create(ctx, entity).await?;

        if let Err(e) = self.repository.entities().create(ctx, entity).await {
            if e.is_context_error() {
                return Err(e);
            }
            warn!(
                "⚠ Could not mirror new {} {:?}: {}",
                T::cache_prefix(),
                entity.cache_id(),
                e
            );
            self.metrics.record_error(T::cache_prefix(), &e.to_string());
        }
        Ok(())
    }

    /// Find an entity by ID.
    ///
    /// Reads the entity store first. On a miss the lookup runs as the cached
    /// `FindByID` query, so an ID the source does not know is remembered as
    /// not found.
    ///
    /// # Errors
    ///
    /// - `Error::Cancelled` / `Error::Timeout`: Context is done
    /// - Any error returned by the source
    pub async fn find_by_id(&self, ctx: &Context, id: &T::Id) -> Result<Option<T>> {
        ctx.check()?;

        match self.repository.entities().find_by_id(ctx, id).await {
            Ok(Some(entity)) => {
                debug!("✓ Entity store hit for {} {:?}", T::cache_prefix(), id);
                return Ok(Some(entity));
            }
            Ok(None) => {}
            Err(e) => {
                return self
                    .bypass(T::cache_prefix(), e, || self.source.find_by_id(ctx, id))
                    .await;
            }
        }

        let key = find_by_id_key(id)?;
        self.cached_query_one(ctx, &key, || self.source.find_by_id(ctx, id))
            .await
    }

    /// Every entity, served by the cached `FindAll` query.
    ///
    /// # Errors
    ///
    /// - `Error::CapabilityMissing`: The source cannot list entities
    /// - Any error yielded by the source stream
    pub async fn find_all(&self, ctx: &Context) -> Result<Vec<T>> {
        ctx.check()?;
        let finder = require_all_finder::<T, S>(&self.source)?;
        let key = QueryKey::find_all().encode()?;
        self.cached_query_many(ctx, &key, || finder.find_all(ctx).try_collect::<Vec<T>>())
            .await
    }

    /// Update an entity in the source, then overwrite the cached copy.
    ///
    /// If the copy cannot be overwritten (for instance it was never cached),
    /// the entity is invalidated instead.
    ///
    /// # Errors
    ///
    /// - `Error::CapabilityMissing`: The source cannot update
    /// - Any error returned by the source
    /// - Errors from the fallback invalidation
    pub async fn update(&self, ctx: &Context, entity: &T) -> Result<()> {
        ctx.check()?;
        let updater = require_updater::<T, S>(&self.source)?;
        updater.update(ctx, entity).await?;

        if let Err(e) = self.repository.entities().update(ctx, entity).await {
            if e.is_context_error() {
                return Err(e);
            }
            let id = entity.cache_id();
            warn!(
                "⚠ Could not overwrite cached {} {:?}: {}, invalidating",
                T::cache_prefix(),
                id,
                e
            );
            self.metrics.record_error(T::cache_prefix(), &e.to_string());
            return self.invalidate_by_id(ctx, &id).await;
        }
        Ok(())
    }

    /// Delete an entity in the source and invalidate everything cached about it.
    ///
    /// # Errors
    ///
    /// - `Error::CapabilityMissing`: The source cannot delete by ID
    /// - Any error returned by the source
    /// - Errors from the invalidation cascade
    pub async fn delete_by_id(&self, ctx: &Context, id: &T::Id) -> Result<()> {
        ctx.check()?;
        let deleter = require_by_id_deleter::<T, S>(&self.source)?;
        deleter.delete_by_id(ctx, id).await?;
        self.invalidate_by_id(ctx, id).await
    }

    /// Delete every entity in the source and drop all cached values.
    ///
    /// # Errors
    ///
    /// - `Error::CapabilityMissing`: The source cannot delete everything
    /// - Any error returned by the source
    /// - Errors from `drop_cached_values`
    pub async fn delete_all(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        let deleter = require_all_deleter::<T, S>(&self.source)?;
        deleter.delete_all(ctx).await?;
        self.drop_cached_values(ctx).await
    }

    /// Delete every hit and every cached entity.
    ///
    /// Both stores are cleared in one repository transaction: if either
    /// clear fails, neither takes effect.
    ///
    /// # Errors
    ///
    /// - `Error::Cancelled` / `Error::Timeout`: Context is done
    /// - Any repository or transaction error
    pub async fn drop_cached_values(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        let tx = self.repository.begin_tx(ctx).await?;
        let result = async {
            self.repository.hits().delete_all(&tx).await?;
            self.repository.entities().delete_all(&tx).await
        }
        .await;
        self.finish_tx(&tx, result).await?;

        info!("✓ Dropped cached values for {}", T::cache_prefix());
        Ok(())
    }

    /// Commit on success; on failure roll back and return the original error.
    async fn finish_tx(&self, tx: &Context, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => self.repository.commit_tx(tx).await,
            Err(e) => {
                if let Err(rollback) = self.repository.rollback_tx(tx).await {
                    warn!("⚠ Rollback after '{}' failed: {}", e, rollback);
                }
                Err(e)
            }
        }
    }

    /// Log a repository failure and answer from the source instead.
    ///
    /// Context errors are returned: the caller asked to stop, so the source
    /// is not consulted.
    async fn bypass<V, F, Fut>(&self, label: &str, error: Error, query: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V>>,
    {
        if error.is_context_error() {
            return Err(error);
        }
        warn!("⚠ Cache unavailable for {}: {}, querying source", label, error);
        self.metrics.record_error(label, &error.to_string());
        query().await
    }
}

/// Key of the cached `FindByID` query for `id`.
fn find_by_id_key<Id: serde::Serialize>(id: &Id) -> Result<HitId> {
    QueryKey::find_by_id(id)?.encode()
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::repository::InMemoryRepository;
    use crate::source::{Capability, InMemorySource};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        id: u32,
        title: String,
    }

    impl CacheEntity for Doc {
        type Id = u32;
        fn cache_id(&self) -> u32 {
            self.id
        }
        fn cache_prefix() -> &'static str {
            "doc"
        }
    }

    fn doc(id: u32, title: &str) -> Doc {
        Doc {
            id,
            title: title.to_string(),
        }
    }

    struct Lookup;

    #[async_trait]
    impl Source<Doc> for Lookup {
        async fn find_by_id(&self, _ctx: &Context, id: &u32) -> Result<Option<Doc>> {
            Ok(Some(doc(*id, "static")))
        }
    }

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[tokio::test]
    async fn test_capability_missing_before_any_store_access() {
        let cache = Cache::new(Lookup, InMemoryRepository::<Doc>::new());
        let ctx = Context::new();

        let mut fresh = doc(1, "a");
        assert_eq!(
            cache.create(&ctx, &mut fresh).await,
            Err(Error::CapabilityMissing(Capability::Create))
        );
        assert_eq!(
            cache.update(&ctx, &fresh).await,
            Err(Error::CapabilityMissing(Capability::Update))
        );
        assert_eq!(
            cache.delete_by_id(&ctx, &1).await,
            Err(Error::CapabilityMissing(Capability::DeleteByID))
        );
        assert_eq!(
            cache.delete_all(&ctx).await,
            Err(Error::CapabilityMissing(Capability::DeleteAll))
        );
        assert_eq!(
            cache.find_all(&ctx).await,
            Err(Error::CapabilityMissing(Capability::FindAll))
        );

        assert!(cache.repository().entities().is_empty());
        assert!(cache.repository().hits().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_id_works_with_minimal_source() {
        let cache = Cache::new(Lookup, InMemoryRepository::<Doc>::new());
        let found = cache
            .find_by_id(&Context::new(), &7)
            .await
            .expect("find_by_id");
        assert_eq!(found, Some(doc(7, "static")));
        assert!(cache.repository().entities().contains(&7));
    }

    #[tokio::test]
    async fn test_hits_are_stamped_with_injected_clock() {
        let cache = Cache::new(InMemorySource::<Doc>::new(), InMemoryRepository::new())
            .with_clock(fixed_clock);

        cache.find_all(&Context::new()).await.expect("find_all");

        let key = QueryKey::find_all().encode().expect("encode");
        let hit = cache.repository().hits().get(&key).expect("hit recorded");
        assert_eq!(hit.timestamp, fixed_clock());
        assert!(hit.is_empty());
    }

    #[tokio::test]
    async fn test_create_mirrors_into_entity_store() {
        let cache = Cache::new(InMemorySource::<Doc>::new(), InMemoryRepository::new());
        let ctx = Context::new();

        let mut fresh = doc(3, "new");
        cache.create(&ctx, &mut fresh).await.expect("create");

        assert_eq!(cache.source().len(), 1);
        assert!(cache.repository().entities().contains(&3));

        cache.find_by_id(&ctx, &3).await.expect("find_by_id");
        assert_eq!(cache.source().find_by_id_calls(), 0);
    }

    #[tokio::test]
    async fn test_create_ignores_mirror_failure() {
        let cache = Cache::new(InMemorySource::<Doc>::new(), InMemoryRepository::new());
        cache
            .repository()
            .entities()
            .set_failure(Some(Error::BackendError("down".to_string())));

        let mut fresh = doc(3, "new");
        cache
            .create(&Context::new(), &mut fresh)
            .await
            .expect("create succeeds despite mirror failure");
        assert_eq!(cache.source().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_drop_leaves_both_stores_intact() {
        let source = InMemorySource::with_entities(vec![doc(1, "a")]);
        let cache = Cache::new(source, InMemoryRepository::<Doc>::new());
        let ctx = Context::new();
        cache.find_all(&ctx).await.expect("find_all");

        cache
            .repository()
            .hits()
            .set_failure(Some(Error::BackendError("hits down".to_string())));
        let result = cache.drop_cached_values(&ctx).await;
        assert_eq!(result, Err(Error::BackendError("hits down".to_string())));
        assert_eq!(cache.repository().entities().len(), 1);
        assert_eq!(cache.repository().hits().len(), 1);

        cache.repository().hits().set_failure(None);
        for _ in 0..5 {
            let all = cache.find_all(&ctx).await.expect("find_all");
            assert_eq!(all, vec![doc(1, "a")]);
        }
        assert_eq!(cache.source().find_all_calls(), 1);
    }

    #[tokio::test]
    async fn test_drop_cached_values_clears_both_stores() {
        let source = InMemorySource::with_entities(vec![doc(1, "a"), doc(2, "b")]);
        let cache = Cache::new(source, InMemoryRepository::<Doc>::new());
        let ctx = Context::new();
        cache.find_all(&ctx).await.expect("find_all");
        cache.find_by_id(&ctx, &9).await.expect("negative lookup");

        cache.drop_cached_values(&ctx).await.expect("drop");

        assert!(cache.repository().entities().is_empty());
        assert!(cache.repository().hits().is_empty());
    }

    #[tokio::test]
    async fn test_hit_without_entity_copies_is_rebuilt() {
        let source = InMemorySource::with_entities(vec![doc(1, "a"), doc(2, "b")]);
        let cache = Cache::new(source, InMemoryRepository::<Doc>::new());
        let ctx = Context::new();
        cache.find_all(&ctx).await.expect("find_all");

        // Copies gone, hit left behind
        Repository::entities(cache.repository())
            .delete_all(&ctx)
            .await
            .expect("clear entities");

        for _ in 0..5 {
            let all = cache.find_all(&ctx).await.expect("find_all");
            assert_eq!(all.len(), 2);
        }
        assert_eq!(cache.source().find_all_calls(), 2);
        assert_eq!(cache.repository().entities().len(), 2);
    }

    #[tokio::test]
    async fn test_entity_store_cancellation_skips_source() {
        let source = InMemorySource::with_entities(vec![doc(1, "a")]);
        let cache = Cache::new(source, InMemoryRepository::<Doc>::new());
        cache
            .repository()
            .entities()
            .set_failure(Some(Error::Cancelled));

        let result = cache.find_by_id(&Context::new(), &1).await;

        assert_eq!(result, Err(Error::Cancelled));
        assert_eq!(cache.source().find_by_id_calls(), 0);
    }

    #[tokio::test]
    async fn test_update_returns_timeout_from_entity_store() {
        let source = InMemorySource::with_entities(vec![doc(1, "a")]);
        let cache = Cache::new(source, InMemoryRepository::<Doc>::new());
        cache
            .repository()
            .entities()
            .set_failure(Some(Error::Timeout("store deadline".to_string())));

        let result = cache.update(&Context::new(), &doc(1, "b")).await;

        assert_eq!(result, Err(Error::Timeout("store deadline".to_string())));
    }

    #[tokio::test]
    async fn test_source_error_is_returned_verbatim() {
        let source = InMemorySource::<Doc>::new();
        source.set_failure(Some(Error::Other("db gone".to_string())));
        let cache = Cache::new(source, InMemoryRepository::new());

        let result = cache.find_by_id(&Context::new(), &1).await;
        assert_eq!(result, Err(Error::Other("db gone".to_string())));
        assert!(cache.repository().hits().is_empty());
    }
}
