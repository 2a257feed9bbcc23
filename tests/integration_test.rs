//! Integration tests for cache-through
//!
//! These tests verify end-to-end cache behavior across the engine, the
//! in-memory source and the in-memory repository.

use async_trait::async_trait;
use cache_through::{
    AllFinder, Cache, CacheEntity, CacheService, Capability, Context, Error, InMemoryRepository,
    InMemorySource, QueryKey, Result, Source,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct User {
    id: u64,
    name: String,
    email: String,
}

impl CacheEntity for User {
    type Id = u64;

    fn cache_id(&self) -> Self::Id {
        self.id
    }

    fn cache_prefix() -> &'static str {
        "user"
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct Record {
    id: u32,
    v: String,
}

impl CacheEntity for Record {
    type Id = u32;

    fn cache_id(&self) -> Self::Id {
        self.id
    }

    fn cache_prefix() -> &'static str {
        "record"
    }
}

fn user(id: u64, name: &str) -> User {
    User {
        id,
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
    }
}

fn record(id: u32, v: &str) -> Record {
    Record {
        id,
        v: v.to_string(),
    }
}

type UserCache = Cache<User, InMemorySource<User>, InMemoryRepository<User>>;

fn user_cache(users: Vec<User>) -> UserCache {
    Cache::new(InMemorySource::with_entities(users), InMemoryRepository::new())
}

/// Test 1: Idempotent fast path
///
/// Every ID returned once is served again without reaching the source.
#[tokio::test]
async fn test_find_by_id_fast_path_is_idempotent() {
    let cache = user_cache(vec![user(1, "Alice"), user(2, "Bob"), user(3, "Carol")]);
    let ctx = Context::new();

    let mut first = Vec::new();
    for id in 1..=3 {
        first.push(cache.find_by_id(&ctx, &id).await.expect("first lookup"));
    }
    let calls = cache.source().find_by_id_calls();
    assert_eq!(calls, 3);

    for id in 1..=3 {
        let again = cache.find_by_id(&ctx, &id).await.expect("second lookup");
        assert_eq!(again, first[(id - 1) as usize]);
    }
    assert_eq!(cache.source().find_by_id_calls(), calls);
}

/// Test 2: Negative caching
#[tokio::test]
async fn test_missing_entity_is_cached_as_not_found() {
    let cache = user_cache(vec![user(1, "Alice")]);
    let ctx = Context::new();

    assert_eq!(cache.find_by_id(&ctx, &404).await.expect("lookup"), None);
    assert_eq!(cache.find_by_id(&ctx, &404).await.expect("lookup"), None);

    assert_eq!(cache.source().find_by_id_calls(), 1);
}

/// Test 3: Update propagation
#[tokio::test]
async fn test_update_is_visible_through_the_cache() {
    let cache = user_cache(vec![user(1, "Alice")]);
    let ctx = Context::new();
    cache.find_by_id(&ctx, &1).await.expect("warm up");

    let renamed = User {
        name: "Alicia".to_string(),
        ..user(1, "Alice")
    };
    cache.update(&ctx, &renamed).await.expect("update");

    let found = cache.find_by_id(&ctx, &1).await.expect("lookup");
    assert_eq!(found, Some(renamed));
    assert_eq!(cache.source().find_by_id_calls(), 1);
}

/// Test 4: Update of an entity that was never cached
///
/// The entity store rejects the overwrite, so the cached "not found" answer
/// must be invalidated instead.
#[tokio::test]
async fn test_update_invalidates_stale_not_found() {
    let cache = user_cache(vec![]);
    let ctx = Context::new();
    assert_eq!(cache.find_by_id(&ctx, &7).await.expect("lookup"), None);

    cache.source().insert(user(7, "Late"));
    cache.update(&ctx, &user(7, "Later")).await.expect("update");

    let found = cache.find_by_id(&ctx, &7).await.expect("lookup");
    assert_eq!(found, Some(user(7, "Later")));
    assert_eq!(cache.source().find_by_id_calls(), 2);
}

/// Test 5: Cascading invalidation of a FindAll hit
#[tokio::test]
async fn test_delete_invalidates_find_all() {
    let cache = user_cache(vec![user(1, "A"), user(2, "B"), user(3, "C")]);
    let ctx = Context::new();

    let all = cache.find_all(&ctx).await.expect("find_all");
    assert_eq!(all.len(), 3);

    cache.delete_by_id(&ctx, &2).await.expect("delete");

    let all = cache.find_all(&ctx).await.expect("find_all");
    assert_eq!(all, vec![user(1, "A"), user(3, "C")]);
    assert_eq!(cache.source().find_all_calls(), 2);
}

/// Test 6: DeleteAll clears everything
#[tokio::test]
async fn test_delete_all_empties_both_stores() {
    let cache = user_cache(vec![user(1, "A"), user(2, "B")]);
    let ctx = Context::new();
    cache.find_all(&ctx).await.expect("find_all");
    cache.find_by_id(&ctx, &99).await.expect("negative lookup");
    assert!(!cache.repository().hits().is_empty());
    assert!(!cache.repository().entities().is_empty());

    cache.delete_all(&ctx).await.expect("delete_all");

    assert!(cache.repository().hits().is_empty());
    assert!(cache.repository().entities().is_empty());
    assert!(cache.source().is_empty());
}

/// Test 7: Concrete scenario
///
/// FindAll populates both stores; deleting entity 1 removes its copy and the
/// FindAll hit, and the next FindAll asks the source again.
#[tokio::test]
async fn test_find_all_then_delete_scenario() {
    let cache = Cache::new(
        InMemorySource::with_entities(vec![record(1, "a"), record(2, "b")]),
        InMemoryRepository::new(),
    );
    let ctx = Context::new();
    let find_all = QueryKey::find_all().encode().expect("encode");

    let all = cache.find_all(&ctx).await.expect("find_all");
    assert_eq!(all, vec![record(1, "a"), record(2, "b")]);
    let hit = cache
        .repository()
        .hits()
        .get(&find_all)
        .expect("FindAll hit");
    assert_eq!(hit.entity_ids, vec![1, 2]);
    assert!(cache.repository().entities().contains(&1));
    assert!(cache.repository().entities().contains(&2));

    cache.delete_by_id(&ctx, &1).await.expect("delete");

    assert!(!cache.repository().entities().contains(&1));
    assert!(!cache.repository().hits().contains(&find_all));

    let all = cache.find_all(&ctx).await.expect("find_all");
    assert_eq!(all, vec![record(2, "b")]);
    assert_eq!(cache.source().find_all_calls(), 2);
}

/// Test 8: Create mirrors into the entity store
#[tokio::test]
async fn test_create_is_served_without_source_lookup() {
    let cache = user_cache(vec![]);
    let ctx = Context::new();

    let mut fresh = user(5, "Eve");
    cache.create(&ctx, &mut fresh).await.expect("create");

    let found = cache.find_by_id(&ctx, &5).await.expect("lookup");
    assert_eq!(found, Some(fresh));
    assert_eq!(cache.source().find_by_id_calls(), 0);
}

// ============================================================================
// Capabilities
// ============================================================================

/// A source that can only look entities up and list them.
struct Directory {
    users: Vec<User>,
}

#[async_trait]
impl Source<User> for Directory {
    async fn find_by_id(&self, _ctx: &Context, id: &u64) -> Result<Option<User>> {
        Ok(self.users.iter().find(|u| u.id == *id).cloned())
    }

    fn as_all_finder(&self) -> Option<&dyn AllFinder<User>> {
        Some(self)
    }
}

impl AllFinder<User> for Directory {
    fn find_all<'a>(&'a self, _ctx: &'a Context) -> BoxStream<'a, Result<User>> {
        stream::iter(self.users.iter().cloned().map(Ok)).boxed()
    }
}

#[tokio::test]
async fn test_missing_capabilities_are_reported_by_name() {
    let cache = Cache::new(
        Directory {
            users: vec![user(1, "Alice")],
        },
        InMemoryRepository::<User>::new(),
    );
    let ctx = Context::new();

    assert_eq!(cache.find_all(&ctx).await.expect("find_all").len(), 1);

    let err = cache
        .update(&ctx, &user(1, "Alicia"))
        .await
        .expect_err("update must fail");
    assert_eq!(err, Error::CapabilityMissing(Capability::Update));
    assert_eq!(err.to_string(), "Update: not implemented by source");

    let err = cache
        .delete_by_id(&ctx, &1)
        .await
        .expect_err("delete must fail");
    assert_eq!(err, Error::CapabilityMissing(Capability::DeleteByID));

    // Nothing was invalidated by the rejected writes.
    assert_eq!(cache.repository().hits().len(), 1);
    assert_eq!(cache.repository().entities().len(), 1);
}

// ============================================================================
// Errors, cancellation and degradation
// ============================================================================

#[tokio::test]
async fn test_source_errors_propagate_verbatim() {
    let cache = user_cache(vec![user(1, "Alice")]);
    let ctx = Context::new();
    cache
        .source()
        .set_failure(Some(Error::SourceError("connection reset".to_string())));

    let failure = Error::SourceError("connection reset".to_string());
    assert_eq!(cache.find_by_id(&ctx, &1).await, Err(failure.clone()));
    assert_eq!(cache.find_all(&ctx).await, Err(failure.clone()));
    assert_eq!(cache.update(&ctx, &user(1, "X")).await, Err(failure));

    assert!(cache.repository().hits().is_empty());
}

#[tokio::test]
async fn test_cancelled_context_reaches_nothing() {
    let cache = user_cache(vec![user(1, "Alice")]);
    let ctx = Context::new();
    ctx.cancel();

    assert_eq!(cache.find_by_id(&ctx, &1).await, Err(Error::Cancelled));
    assert_eq!(cache.find_all(&ctx).await, Err(Error::Cancelled));
    assert_eq!(cache.delete_by_id(&ctx, &1).await, Err(Error::Cancelled));

    assert_eq!(cache.source().find_by_id_calls(), 0);
    assert_eq!(cache.source().find_all_calls(), 0);
    assert_eq!(cache.source().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_deadline_is_a_timeout() {
    let cache = user_cache(vec![user(1, "Alice")]);
    let ctx = Context::new().with_timeout(Duration::from_millis(50));

    assert!(cache.find_by_id(&ctx, &1).await.expect("in time").is_some());

    tokio::time::advance(Duration::from_millis(100)).await;
    assert!(matches!(
        cache.find_by_id(&ctx, &1).await,
        Err(Error::Timeout(_))
    ));
}

#[tokio::test]
async fn test_entity_store_failure_degrades_to_source() {
    let cache = user_cache(vec![user(1, "Alice")]);
    let ctx = Context::new();
    cache
        .repository()
        .entities()
        .set_failure(Some(Error::BackendError("entities down".to_string())));

    for _ in 0..2 {
        let found = cache.find_by_id(&ctx, &1).await.expect("degraded lookup");
        assert_eq!(found, Some(user(1, "Alice")));
    }
    assert_eq!(cache.source().find_by_id_calls(), 2);
}

#[tokio::test]
async fn test_hit_store_failure_degrades_to_source() {
    let cache = user_cache(vec![user(1, "Alice"), user(2, "Bob")]);
    let ctx = Context::new();
    cache
        .repository()
        .hits()
        .set_failure(Some(Error::BackendError("hits down".to_string())));

    for _ in 0..2 {
        let all = cache.find_all(&ctx).await.expect("degraded find_all");
        assert_eq!(all.len(), 2);
    }
    assert_eq!(cache.source().find_all_calls(), 2);

    cache.repository().hits().set_failure(None);
    cache.find_all(&ctx).await.expect("find_all");
    cache.find_all(&ctx).await.expect("find_all");
    assert_eq!(cache.source().find_all_calls(), 3);
}

// ============================================================================
// Shared service
// ============================================================================

#[tokio::test]
async fn test_service_shares_one_cache_across_tasks() {
    let service = CacheService::new(
        InMemorySource::with_entities((1..=8).map(|i| user(i, &format!("u{}", i)))),
        InMemoryRepository::new(),
    );

    let mut handles = vec![];
    for i in 1..=8u64 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let ctx = Context::new();
            for _ in 0..3 {
                let found = service.find_by_id(&ctx, &i).await?;
                assert_eq!(found.map(|u| u.id), Some(i));
            }
            Ok::<_, Error>(())
        }));
    }

    for handle in handles {
        handle
            .await
            .expect("Task failed")
            .expect("Lookup failed");
    }

    assert_eq!(service.cache().source().find_by_id_calls(), 8);
}
