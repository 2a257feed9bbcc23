//! Invalidation cascade.
//!
//! Invalidating an entity removes every hit that references it; removing a
//! hit invalidates every entity it references. The two steps call each other
//! until the affected part of the entity/hit graph is gone:
//!
//! ```text
//! invalidate_by_id(id)
//!   ├── invalidate_cached_query(FindByID id)
//!   ├── invalidate_cached_query(hit) for every hit referencing id
//!   └── delete entity copy of id (if cached)
//!
//! invalidate_cached_query(query)
//!   ├── delete hit of query           <- before recursing
//!   └── invalidate_by_id(id) for every id of the hit
//! ```
//!
//! A hit is deleted before its entities are visited, so a later scan can
//! never find it again and every hit is processed at most once.
//!
//! Each step runs in its own repository transaction nested in the caller's:
//! committed on success, rolled back on error.

use super::{find_by_id_key, Cache};
use crate::context::Context;
use crate::entity::CacheEntity;
use crate::error::Result;
use crate::key::HitId;
use crate::repository::{EntityRepository, HitRepository, Repository};
use crate::source::Source;
use futures::future::{BoxFuture, FutureExt};

impl<T, S, R> Cache<T, S, R>
where
    T: CacheEntity,
    S: Source<T>,
    R: Repository<T>,
{
    /// Remove an entity and every cached query that returned it.
    ///
    /// Use [`invalidate_cached_query`](Cache::invalidate_cached_query) for
    /// queries that cached an empty result: they reference no entity and
    /// cannot be found from an ID.
    ///
    /// # Errors
    ///
    /// - `Error::Cancelled` / `Error::Timeout`: Context is done
    /// - Any repository or transaction error; the cascade is rolled back
    pub fn invalidate_by_id<'a>(
        &'a self,
        ctx: &'a Context,
        id: &'a T::Id,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let tx = self.repository.begin_tx(ctx).await?;
            let result = self.invalidate_by_id_in(&tx, id).await;
            self.finish_tx(&tx, result).await
        }
        .boxed()
    }

    /// Remove a cached query and, transitively, every entity it returned.
    ///
    /// An unknown query is not an error.
    ///
    /// # Errors
    ///
    /// - `Error::Cancelled` / `Error::Timeout`: Context is done
    /// - Any repository or transaction error; the cascade is rolled back
    pub fn invalidate_cached_query<'a>(
        &'a self,
        ctx: &'a Context,
        query_id: &'a HitId,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let tx = self.repository.begin_tx(ctx).await?;
            let result = self.invalidate_cached_query_in(&tx, query_id).await;
            self.finish_tx(&tx, result).await
        }
        .boxed()
    }

    async fn invalidate_by_id_in(&self, ctx: &Context, id: &T::Id) -> Result<()> {
        ctx.check()?;
        let key = find_by_id_key(id)?;
        self.invalidate_cached_query(ctx, &key).await?;

        ctx.check()?;
        let referencing: Vec<HitId> = self
            .repository
            .hits()
            .find_all(ctx)
            .await?
            .into_iter()
            .filter(|hit| hit.references(id))
            .map(|hit| hit.query_id)
            .collect();
        for query_id in &referencing {
            ctx.check()?;
            self.invalidate_cached_query(ctx, query_id).await?;
        }

        ctx.check()?;
        let entities = self.repository.entities();
        if entities.find_by_id(ctx, id).await?.is_none() {
            return Ok(());
        }
        entities.delete_by_id(ctx, id).await?;
        debug!("✓ Invalidated {} {:?}", T::cache_prefix(), id);
        Ok(())
    }

    async fn invalidate_cached_query_in(&self, ctx: &Context, query_id: &HitId) -> Result<()> {
        ctx.check()?;
        let hits = self.repository.hits();
        let Some(hit) = hits.find_by_id(ctx, query_id).await? else {
            return Ok(());
        };

        hits.delete_by_id(ctx, query_id).await?;
        self.metrics.record_invalidation(query_id.as_str());
        debug!(
            "✓ Invalidated {} ({} entities)",
            query_id,
            hit.entity_ids.len()
        );

        for id in &hit.entity_ids {
            ctx.check()?;
            self.invalidate_by_id(ctx, id).await?;
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::key::QueryKey;
    use crate::repository::InMemoryRepository;
    use crate::source::InMemorySource;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Node {
        id: u32,
    }

    impl CacheEntity for Node {
        type Id = u32;
        fn cache_id(&self) -> u32 {
            self.id
        }
        fn cache_prefix() -> &'static str {
            "node"
        }
    }

    fn nodes(ids: &[u32]) -> Vec<Node> {
        ids.iter().map(|&id| Node { id }).collect()
    }

    fn key(name: &str) -> HitId {
        QueryKey::new(name).encode().expect("encode")
    }

    async fn seeded() -> Cache<Node, InMemorySource<Node>, InMemoryRepository<Node>> {
        let cache = Cache::new(
            InMemorySource::with_entities(nodes(&[1, 2, 3, 4])),
            InMemoryRepository::new(),
        );
        let ctx = Context::new();
        // q1 -> [1, 2], q2 -> [2, 3], q3 -> [4]
        let seeds: [(&str, &[u32]); 3] = [("q1", &[1, 2]), ("q2", &[2, 3]), ("q3", &[4])];
        for (name, ids) in seeds {
            let result = nodes(ids);
            cache
                .cached_query_many(&ctx, &key(name), || async move { Ok(result) })
                .await
                .expect("populate");
        }
        cache
    }

    #[tokio::test]
    async fn test_cascade_follows_shared_entities() {
        let cache = seeded().await;

        cache
            .invalidate_cached_query(&Context::new(), &key("q1"))
            .await
            .expect("invalidate");

        let hits = cache.repository().hits();
        assert!(!hits.contains(&key("q1")));
        assert!(!hits.contains(&key("q2")));
        assert!(hits.contains(&key("q3")));

        let entities = cache.repository().entities();
        assert!(!entities.contains(&1));
        assert!(!entities.contains(&2));
        assert!(!entities.contains(&3));
        assert!(entities.contains(&4));
    }

    #[tokio::test]
    async fn test_invalidate_by_id_removes_find_by_id_hit() {
        let cache = Cache::new(
            InMemorySource::<Node>::new(),
            InMemoryRepository::new(),
        );
        let ctx = Context::new();
        assert_eq!(cache.find_by_id(&ctx, &9).await.expect("lookup"), None);
        let find_9 = find_by_id_key(&9u32).expect("key");
        assert!(cache.repository().hits().contains(&find_9));

        cache.invalidate_by_id(&ctx, &9).await.expect("invalidate");

        assert!(cache.repository().hits().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_query_is_a_no_op() {
        let cache = seeded().await;
        cache
            .invalidate_cached_query(&Context::new(), &key("nope"))
            .await
            .expect("no-op");
        assert_eq!(cache.repository().hits().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_cascade_is_rolled_back() {
        let cache = seeded().await;
        cache
            .repository()
            .entities()
            .set_failure(Some(Error::BackendError("entities down".to_string())));

        let result = cache.invalidate_by_id(&Context::new(), &2).await;
        assert_eq!(result, Err(Error::BackendError("entities down".to_string())));

        cache.repository().entities().set_failure(None);
        let hits = cache.repository().hits();
        assert!(hits.contains(&key("q1")));
        assert!(hits.contains(&key("q2")));
        assert_eq!(cache.repository().entities().len(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_the_cascade() {
        let cache = seeded().await;
        let ctx = Context::new();
        ctx.cancel();

        assert_eq!(
            cache.invalidate_by_id(&ctx, &1).await,
            Err(Error::Cancelled)
        );
        assert_eq!(cache.repository().hits().len(), 3);
    }
}
