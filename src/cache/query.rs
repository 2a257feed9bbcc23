//! Cached queries: answer a query from the hit and entity stores, or run it
//! against the source and remember the result.

use super::Cache;
use crate::context::Context;
use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use crate::hit::Hit;
use crate::key::HitId;
use crate::repository::{EntityRepository, HitRepository, Repository};
use crate::source::Source;
use futures::TryFutureExt;
use std::future::Future;
use std::time::Instant;

impl<T, S, R> Cache<T, S, R>
where
    T: CacheEntity,
    S: Source<T>,
    R: Repository<T>,
{
    /// Run a query through the cache.
    ///
    /// `key` identifies the query (see [`QueryKey`](crate::QueryKey)); `query`
    /// runs it against the source and is only called on a miss or when the
    /// repository cannot answer.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let key = QueryKey::new("FindByEmail").arg("email", &email)?.encode()?;
    /// let users = cache
    ///     .cached_query_many(&ctx, &key, || user_table.find_by_email(&ctx, &email))
    ///     .await?;
    /// ```
    ///
    /// A query that caches results must be invalidated when the data it reads
    /// changes in a way the cache cannot see, with
    /// [`invalidate_cached_query`](Cache::invalidate_cached_query).
    ///
    /// A hit whose entity copies are gone is invalidated and the query is
    /// cached again.
    ///
    /// # Errors
    ///
    /// - `Error::Cancelled` / `Error::Timeout`: Context is done, before or
    ///   during store access
    /// - Any error returned by `query`
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
        ctx.check()?;
        let timer = Instant::now();

        match self.repository.hits().find_by_id(ctx, key).await {
            Ok(Some(hit)) => match self
                .repository
                .entities()
                .find_by_ids(ctx, &hit.entity_ids)
                .await
            {
                Ok(entities) => {
                    debug!("✓ Cache hit for {} ({} entities)", key, entities.len());
                    self.metrics.record_hit(key.as_str(), timer.elapsed());
                    return Ok(entities);
                }
                Err(Error::NotFound(missing)) => {
                    debug!("Hit {} references uncached {}, dropping it", key, missing);
                    if let Err(e) = self.invalidate_cached_query(ctx, key).await {
                        return self.bypass(key.as_str(), e, query).await;
                    }
                }
                Err(e) => return self.bypass(key.as_str(), e, query).await,
            },
            Ok(None) => {}
            Err(e) => return self.bypass(key.as_str(), e, query).await,
        }

        debug!("Cache miss for {}, querying source", key);
        let entities = query().await?;
        self.metrics.record_miss(key.as_str(), timer.elapsed());
        self.remember(ctx, key, &entities).await?;
        Ok(entities)
    }

    /// Run a query returning at most one entity through the cache.
    ///
    /// "Not found" is cached like any other answer, so a repeated lookup of a
    /// missing entity does not reach the source.
    ///
    /// # Errors
    ///
    /// Same as [`cached_query_many`](Cache::cached_query_many).
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
        let entities = self
            .cached_query_many(ctx, key, || {
                query().map_ok(|found| found.into_iter().collect::<Vec<T>>())
            })
            .await?;
        Ok(entities.into_iter().next())
    }

    /// Store the entities and record the hit.
    ///
    /// Store failures are logged only; context errors are returned.
    async fn remember(&self, ctx: &Context, key: &HitId, entities: &[T]) -> Result<()> {
        if let Err(e) = self.repository.entities().upsert(ctx, entities).await {
            if e.is_context_error() {
                return Err(e);
            }
            warn!("⚠ Could not cache entities of {}: {}", key, e);
            self.metrics.record_error(key.as_str(), &e.to_string());
            return Ok(());
        }

        let hit = Hit {
            query_id: key.clone(),
            entity_ids: entities.iter().map(CacheEntity::cache_id).collect(),
            timestamp: (self.clock)(),
        };
        if let Err(e) = self.repository.hits().create(ctx, &hit).await {
            if e.is_context_error() {
                return Err(e);
            }
            warn!("⚠ Could not record hit {}: {}", key, e);
            self.metrics.record_error(key.as_str(), &e.to_string());
            return Ok(());
        }

        debug!("✓ Cached {} ({} entities)", key, hit.entity_ids.len());
        Ok(())
    }
}
