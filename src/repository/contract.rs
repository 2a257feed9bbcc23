//! Behaviour every [`Repository`] implementation must show.
//!
//! The cache engine relies on these rules: the invalidation cascade needs
//! nested transactions that fold into their parent, and the read path needs
//! `find_by_ids` to fail when a copy is missing. Run [`verify`] from an
//! implementation's test suite:
//!
//! ```ignore
//! #[tokio::test]
//! async fn test_conforms_to_repository_contract() {
//!     cache_through::repository::contract::verify(MyRepository::new, |n| Item { id: n })
//!         .await
//!         .expect("repository contract");
//! }
//! ```
//!
//! `make_repository` must return an empty repository on every call.
//! `make_entity(n)` must return entities with distinct IDs for distinct `n`.

use super::{EntityRepository, HitRepository, Repository};
use crate::context::Context;
use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use crate::hit::Hit;
use crate::key::HitId;
use chrono::Utc;

/// Run every check against fresh repositories.
///
/// # Errors
///
/// The first violated rule, as `Error::Other` naming it, or an unexpected
/// repository error.
pub async fn verify<T, R, F, E>(make_repository: F, make_entity: E) -> Result<()>
where
    T: CacheEntity,
    R: Repository<T>,
    F: Fn() -> R,
    E: Fn(u32) -> T,
{
    entity_store(&make_repository(), &make_entity).await?;
    hit_store(&make_repository(), &make_entity).await?;
    commit_publishes(&make_repository(), &make_entity).await?;
    rollback_discards(&make_repository(), &make_entity).await?;
    nested_commit_folds(&make_repository(), &make_entity).await?;
    finished_transaction(&make_repository(), &make_entity).await?;
    Ok(())
}

fn ensure(holds: bool, rule: &str) -> Result<()> {
    if holds {
        Ok(())
    } else {
        Err(Error::Other(format!("repository contract violated: {}", rule)))
    }
}

fn hit<T: CacheEntity>(query: &str, entities: &[&T]) -> Hit<T::Id> {
    Hit {
        query_id: HitId::from(query),
        entity_ids: entities.iter().map(|entity| entity.cache_id()).collect(),
        timestamp: Utc::now(),
    }
}

fn ids<T: CacheEntity>(entities: &[T]) -> Vec<T::Id> {
    entities.iter().map(CacheEntity::cache_id).collect()
}

/// Entity store: create/update/find/delete rules.
pub async fn entity_store<T, R>(repository: &R, make_entity: impl Fn(u32) -> T) -> Result<()>
where
    T: CacheEntity,
    R: Repository<T>,
{
    let ctx = Context::new();
    let entities = repository.entities();
    let (first, second, absent) = (make_entity(1), make_entity(2), make_entity(3));

    entities.create(&ctx, &first).await?;
    ensure(
        entities.create(&ctx, &first).await.is_err(),
        "create of a stored ID fails",
    )?;
    ensure(
        entities.update(&ctx, &second).await.is_err(),
        "update of an absent ID fails",
    )?;

    entities
        .upsert(&ctx, &[first.clone(), second.clone()])
        .await?;
    let found = entities
        .find_by_ids(&ctx, &[second.cache_id(), first.cache_id()])
        .await?;
    ensure(
        ids(&found) == vec![second.cache_id(), first.cache_id()],
        "find_by_ids keeps the order of the requested IDs",
    )?;
    ensure(
        entities
            .find_by_ids(&ctx, &[first.cache_id(), absent.cache_id()])
            .await
            .is_err(),
        "find_by_ids fails when an ID is absent",
    )?;
    ensure(
        entities.find_by_id(&ctx, &absent.cache_id()).await?.is_none(),
        "find_by_id of an absent ID is None",
    )?;

    entities.update(&ctx, &first).await?;
    entities.delete_by_id(&ctx, &first.cache_id()).await?;
    ensure(
        entities.delete_by_id(&ctx, &first.cache_id()).await.is_err(),
        "delete_by_id of an absent ID fails",
    )?;
    ensure(
        entities.find_by_id(&ctx, &first.cache_id()).await?.is_none(),
        "a deleted entity is gone",
    )?;

    entities.delete_all(&ctx).await?;
    ensure(
        entities.find_by_id(&ctx, &second.cache_id()).await?.is_none(),
        "delete_all removes every entity",
    )
}

/// Hit store: create replaces, delete of an absent hit fails.
pub async fn hit_store<T, R>(repository: &R, make_entity: impl Fn(u32) -> T) -> Result<()>
where
    T: CacheEntity,
    R: Repository<T>,
{
    let ctx = Context::new();
    let hits = repository.hits();
    let (first, second) = (make_entity(1), make_entity(2));

    hits.create(&ctx, &hit::<T>("q", &[&first])).await?;
    hits.create(&ctx, &hit::<T>("q", &[&second])).await?;
    let stored = hits.find_by_id(&ctx, &HitId::from("q")).await?;
    ensure(
        stored.map(|hit| hit.entity_ids) == Some(vec![second.cache_id()]),
        "create replaces a hit with the same query ID",
    )?;

    hits.create(&ctx, &hit::<T>("empty", &[])).await?;
    ensure(
        hits.find_by_id(&ctx, &HitId::from("empty"))
            .await?
            .is_some_and(|hit| hit.entity_ids.is_empty()),
        "a hit with no entities is stored",
    )?;
    ensure(
        hits.find_all(&ctx).await?.len() == 2,
        "find_all returns every hit",
    )?;

    hits.delete_by_id(&ctx, &HitId::from("q")).await?;
    ensure(
        hits.delete_by_id(&ctx, &HitId::from("q")).await.is_err(),
        "delete_by_id of an absent hit fails",
    )?;

    hits.delete_all(&ctx).await?;
    ensure(
        hits.find_all(&ctx).await?.is_empty(),
        "delete_all removes every hit",
    )
}

/// Writes staged in a transaction are visible inside it, and outside only
/// after commit.
pub async fn commit_publishes<T, R>(repository: &R, make_entity: impl Fn(u32) -> T) -> Result<()>
where
    T: CacheEntity,
    R: Repository<T>,
{
    let ctx = Context::new();
    let entity = make_entity(1);
    let query = HitId::from("staged");

    let tx = repository.begin_tx(&ctx).await?;
    repository.entities().create(&tx, &entity).await?;
    repository.hits().create(&tx, &hit::<T>("staged", &[&entity])).await?;

    ensure(
        repository.hits().find_by_id(&tx, &query).await?.is_some(),
        "a staged hit is visible inside its transaction",
    )?;
    ensure(
        repository.hits().find_by_id(&ctx, &query).await?.is_none(),
        "a staged hit is invisible outside its transaction",
    )?;

    repository.commit_tx(&tx).await?;
    ensure(
        repository.hits().find_by_id(&ctx, &query).await?.is_some(),
        "a committed hit is visible",
    )?;
    ensure(
        repository
            .entities()
            .find_by_id(&ctx, &entity.cache_id())
            .await?
            .is_some(),
        "a committed entity is visible",
    )
}

/// Rollback discards staged writes, deletes and clears included.
pub async fn rollback_discards<T, R>(repository: &R, make_entity: impl Fn(u32) -> T) -> Result<()>
where
    T: CacheEntity,
    R: Repository<T>,
{
    let ctx = Context::new();
    let (kept, staged) = (make_entity(1), make_entity(2));
    repository.entities().create(&ctx, &kept).await?;
    repository.hits().create(&ctx, &hit::<T>("kept", &[&kept])).await?;

    let tx = repository.begin_tx(&ctx).await?;
    repository.entities().delete_by_id(&tx, &kept.cache_id()).await?;
    repository.entities().create(&tx, &staged).await?;
    repository.hits().delete_all(&tx).await?;
    repository.rollback_tx(&tx).await?;

    ensure(
        repository
            .entities()
            .find_by_id(&ctx, &kept.cache_id())
            .await?
            .is_some(),
        "rollback restores a deleted entity",
    )?;
    ensure(
        repository
            .entities()
            .find_by_id(&ctx, &staged.cache_id())
            .await?
            .is_none(),
        "rollback discards a created entity",
    )?;
    ensure(
        repository
            .hits()
            .find_by_id(&ctx, &HitId::from("kept"))
            .await?
            .is_some(),
        "rollback discards a clear",
    )
}

/// A nested commit folds into the parent; a nested rollback discards only
/// the child's writes.
pub async fn nested_commit_folds<T, R>(
    repository: &R,
    make_entity: impl Fn(u32) -> T,
) -> Result<()>
where
    T: CacheEntity,
    R: Repository<T>,
{
    let ctx = Context::new();
    let entity = make_entity(1);
    repository.hits().create(&ctx, &hit::<T>("a", &[&entity])).await?;
    repository.hits().create(&ctx, &hit::<T>("b", &[&entity])).await?;

    let outer = repository.begin_tx(&ctx).await?;
    let inner = repository.begin_tx(&outer).await?;
    repository.hits().delete_by_id(&inner, &HitId::from("a")).await?;
    repository.commit_tx(&inner).await?;

    let discarded = repository.begin_tx(&outer).await?;
    repository.hits().delete_by_id(&discarded, &HitId::from("b")).await?;
    repository.rollback_tx(&discarded).await?;

    ensure(
        repository.hits().find_all(&outer).await?.len() == 1,
        "a committed child is visible to its parent",
    )?;
    ensure(
        repository.hits().find_all(&ctx).await?.len() == 2,
        "a committed child stays invisible until the parent commits",
    )?;

    repository.commit_tx(&outer).await?;
    let remaining = repository.hits().find_all(&ctx).await?;
    ensure(
        remaining.len() == 1 && remaining[0].query_id == HitId::from("b"),
        "the parent commit publishes the folded child",
    )
}

/// A committed or rolled-back transaction cannot be used again.
pub async fn finished_transaction<T, R>(
    repository: &R,
    make_entity: impl Fn(u32) -> T,
) -> Result<()>
where
    T: CacheEntity,
    R: Repository<T>,
{
    let ctx = Context::new();

    let committed = repository.begin_tx(&ctx).await?;
    repository.commit_tx(&committed).await?;
    ensure(
        matches!(
            repository.commit_tx(&committed).await,
            Err(Error::TransactionError(_))
        ),
        "a second commit fails with TransactionError",
    )?;
    ensure(
        matches!(
            repository.entities().upsert(&committed, &[make_entity(1)]).await,
            Err(Error::TransactionError(_))
        ),
        "a write on a committed transaction fails with TransactionError",
    )?;

    let rolled_back = repository.begin_tx(&ctx).await?;
    repository.rollback_tx(&rolled_back).await?;
    ensure(
        matches!(
            repository.rollback_tx(&rolled_back).await,
            Err(Error::TransactionError(_))
        ),
        "a second rollback fails with TransactionError",
    )?;
    ensure(
        repository.begin_tx(&rolled_back).await.is_err(),
        "a finished transaction cannot parent a new one",
    )
}
