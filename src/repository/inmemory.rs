//! In-memory cache repository (default feature, thread-safe, async).
//!
//! Uses DashMap for committed records and a per-transaction journal for
//! staged changes. Entities and hits are stored as encoded envelopes (see
//! `crate::serialization`), so the repository always holds a copy.
//!
//! # Transactions
//!
//! Every open transaction owns an overlay of pending writes. Reads made in a
//! transaction see its overlay, then its parents' overlays, then the committed
//! records. Committing a nested transaction folds its overlay into the parent;
//! committing a top-level transaction applies it to the committed records.
//! Rolling back discards the overlay. A context bound to a finished
//! transaction is rejected with `Error::TransactionError`.

use super::{EntityRepository, HitRepository, Repository};
use crate::context::{Context, TxId};
use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use crate::hit::Hit;
use crate::key::HitId;
use crate::serialization::{deserialize_from_cache, serialize_for_cache};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ============================================================================
// Transactional table
// ============================================================================

/// Pending writes of one transaction. `None` marks a deletion.
struct Overlay {
    parent: Option<TxId>,
    writes: HashMap<String, Option<Vec<u8>>>,
    cleared: bool,
}

impl Overlay {
    fn new(parent: Option<TxId>) -> Self {
        Overlay {
            parent,
            writes: HashMap::new(),
            cleared: false,
        }
    }
}

fn finished(tx: TxId) -> Error {
    Error::TransactionError(format!("{} is already finished", tx))
}

/// Keyed byte records with nested transaction overlays.
struct Table {
    name: &'static str,
    rows: DashMap<String, Vec<u8>>,
    overlays: Mutex<HashMap<TxId, Overlay>>,
    failure: Mutex<Option<Error>>,
}

type Overlays = HashMap<TxId, Overlay>;

impl Table {
    fn new(name: &'static str) -> Self {
        Table {
            name,
            rows: DashMap::new(),
            overlays: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
        }
    }

    fn lock_overlays(&self) -> MutexGuard<'_, Overlays> {
        self.overlays.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_failure(&self, error: Option<Error>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// Fails with the context error or the injected failure.
    fn precheck(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        match &*self.failure.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    /// Overlays from `tx` up to the top-level transaction.
    fn chain(overlays: &Overlays, tx: TxId) -> Result<Vec<&Overlay>> {
        let mut chain = Vec::new();
        let mut cursor = Some(tx);
        while let Some(id) = cursor {
            let overlay = overlays.get(&id).ok_or_else(|| finished(id))?;
            cursor = overlay.parent;
            chain.push(overlay);
        }
        Ok(chain)
    }

    fn begin(&self, tx: TxId, parent: Option<TxId>) -> Result<()> {
        let mut overlays = self.lock_overlays();
        if let Some(parent) = parent {
            if !overlays.contains_key(&parent) {
                return Err(finished(parent));
            }
        }
        overlays.insert(tx, Overlay::new(parent));
        Ok(())
    }

    fn commit(&self, tx: TxId) -> Result<()> {
        let mut overlays = self.lock_overlays();
        let overlay = overlays.remove(&tx).ok_or_else(|| finished(tx))?;
        match overlay.parent {
            Some(parent_id) => {
                let parent = overlays
                    .get_mut(&parent_id)
                    .ok_or_else(|| finished(parent_id))?;
                if overlay.cleared {
                    parent.writes.clear();
                    parent.cleared = true;
                }
                parent.writes.extend(overlay.writes);
            }
            None => {
                if overlay.cleared {
                    self.rows.clear();
                }
                for (key, write) in overlay.writes {
                    match write {
                        Some(bytes) => {
                            self.rows.insert(key, bytes);
                        }
                        None => {
                            self.rows.remove(&key);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn rollback(&self, tx: TxId) -> Result<()> {
        self.lock_overlays()
            .remove(&tx)
            .map(|_| ())
            .ok_or_else(|| finished(tx))
    }

    fn get(&self, ctx: &Context, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(tx) = ctx.tx() {
            let overlays = self.lock_overlays();
            for overlay in Self::chain(&overlays, tx)? {
                if let Some(write) = overlay.writes.get(key) {
                    return Ok(write.clone());
                }
                if overlay.cleared {
                    return Ok(None);
                }
            }
        }
        Ok(self.rows.get(key).map(|entry| entry.value().clone()))
    }

    fn values(&self, ctx: &Context) -> Result<Vec<Vec<u8>>> {
        let Some(tx) = ctx.tx() else {
            return Ok(self.rows.iter().map(|entry| entry.value().clone()).collect());
        };

        let overlays = self.lock_overlays();
        let chain = Self::chain(&overlays, tx)?;
        let mut view: HashMap<String, Vec<u8>> = self
            .rows
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for overlay in chain.into_iter().rev() {
            if overlay.cleared {
                view.clear();
            }
            for (key, write) in &overlay.writes {
                match write {
                    Some(bytes) => {
                        view.insert(key.clone(), bytes.clone());
                    }
                    None => {
                        view.remove(key);
                    }
                }
            }
        }
        Ok(view.into_values().collect())
    }

    fn put(&self, ctx: &Context, key: String, bytes: Vec<u8>) -> Result<()> {
        match ctx.tx() {
            Some(tx) => {
                let mut overlays = self.lock_overlays();
                let overlay = overlays.get_mut(&tx).ok_or_else(|| finished(tx))?;
                overlay.writes.insert(key, Some(bytes));
            }
            None => {
                self.rows.insert(key, bytes);
            }
        }
        Ok(())
    }

    fn remove(&self, ctx: &Context, key: &str) -> Result<()> {
        match ctx.tx() {
            Some(tx) => {
                let mut overlays = self.lock_overlays();
                let overlay = overlays.get_mut(&tx).ok_or_else(|| finished(tx))?;
                overlay.writes.insert(key.to_string(), None);
            }
            None => {
                self.rows.remove(key);
            }
        }
        Ok(())
    }

    fn clear(&self, ctx: &Context) -> Result<()> {
        match ctx.tx() {
            Some(tx) => {
                let mut overlays = self.lock_overlays();
                let overlay = overlays.get_mut(&tx).ok_or_else(|| finished(tx))?;
                overlay.writes.clear();
                overlay.cleared = true;
            }
            None => self.rows.clear(),
        }
        Ok(())
    }
}

// ============================================================================
// Entity store
// ============================================================================

/// Entity store of [`InMemoryRepository`].
pub struct InMemoryEntities<T: CacheEntity> {
    table: Arc<Table>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: CacheEntity> Clone for InMemoryEntities<T> {
    fn clone(&self) -> Self {
        InMemoryEntities {
            table: Arc::clone(&self.table),
            _entity: PhantomData,
        }
    }
}

impl<T: CacheEntity> InMemoryEntities<T> {
    fn new() -> Self {
        InMemoryEntities {
            table: Arc::new(Table::new("entities")),
            _entity: PhantomData,
        }
    }

    fn key(id: &T::Id) -> Result<String> {
        Ok(format!("{}:{}", T::cache_prefix(), serde_json::to_string(id)?))
    }

    /// Make every following entity-store operation fail; `None` heals the store.
    pub fn set_failure(&self, error: Option<Error>) {
        self.table.set_failure(error);
    }

    /// Whether a committed copy of the entity exists.
    pub fn contains(&self, id: &T::Id) -> bool {
        Self::key(id).is_ok_and(|key| self.table.rows.contains_key(&key))
    }

    /// Number of committed entity copies.
    pub fn len(&self) -> usize {
        self.table.rows.len()
    }

    /// Whether no entity copies are committed.
    pub fn is_empty(&self) -> bool {
        self.table.rows.is_empty()
    }

    fn read(&self, ctx: &Context, key: &str) -> Result<Option<T>> {
        match self.table.get(ctx, key)? {
            Some(bytes) => Ok(Some(T::deserialize_from_cache(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<T: CacheEntity> EntityRepository<T> for InMemoryEntities<T> {
    async fn create(&self, ctx: &Context, entity: &T) -> Result<()> {
        self.table.precheck(ctx)?;
        let key = Self::key(&entity.cache_id())?;
        if self.table.get(ctx, &key)?.is_some() {
            return Err(Error::BackendError(format!("{} already exists", key)));
        }
        self.table.put(ctx, key.clone(), entity.serialize_for_cache()?)?;
        debug!("✓ InMemory {} CREATE {}", self.table.name, key);
        Ok(())
    }

    async fn update(&self, ctx: &Context, entity: &T) -> Result<()> {
        self.table.precheck(ctx)?;
        let key = Self::key(&entity.cache_id())?;
        if self.table.get(ctx, &key)?.is_none() {
            return Err(Error::NotFound(key));
        }
        self.table.put(ctx, key.clone(), entity.serialize_for_cache()?)?;
        debug!("✓ InMemory {} UPDATE {}", self.table.name, key);
        Ok(())
    }

    async fn find_by_id(&self, ctx: &Context, id: &T::Id) -> Result<Option<T>> {
        self.table.precheck(ctx)?;
        let key = Self::key(id)?;
        let found = self.read(ctx, &key)?;
        debug!(
            "✓ InMemory {} GET {} -> {}",
            self.table.name,
            key,
            if found.is_some() { "HIT" } else { "MISS" }
        );
        Ok(found)
    }

    async fn find_by_ids(&self, ctx: &Context, ids: &[T::Id]) -> Result<Vec<T>> {
        self.table.precheck(ctx)?;
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            let key = Self::key(id)?;
            match self.read(ctx, &key)? {
                Some(entity) => entities.push(entity),
                None => return Err(Error::NotFound(key)),
            }
        }
        debug!("✓ InMemory {} MGET {} keys", self.table.name, ids.len());
        Ok(entities)
    }

    async fn upsert(&self, ctx: &Context, entities: &[T]) -> Result<()> {
        self.table.precheck(ctx)?;
        for entity in entities {
            let key = Self::key(&entity.cache_id())?;
            self.table.put(ctx, key, entity.serialize_for_cache()?)?;
        }
        debug!("✓ InMemory {} UPSERT {} records", self.table.name, entities.len());
        Ok(())
    }

    async fn delete_by_id(&self, ctx: &Context, id: &T::Id) -> Result<()> {
        self.table.precheck(ctx)?;
        let key = Self::key(id)?;
        if self.table.get(ctx, &key)?.is_none() {
            return Err(Error::NotFound(key));
        }
        self.table.remove(ctx, &key)?;
        debug!("✓ InMemory {} DELETE {}", self.table.name, key);
        Ok(())
    }

    async fn delete_all(&self, ctx: &Context) -> Result<()> {
        self.table.precheck(ctx)?;
        self.table.clear(ctx)?;
        warn!("⚠ InMemory {} CLEAR_ALL executed", self.table.name);
        Ok(())
    }
}

// ============================================================================
// Hit store
// ============================================================================

/// Hit store of [`InMemoryRepository`].
pub struct InMemoryHits<Id> {
    table: Arc<Table>,
    _id: PhantomData<fn() -> Id>,
}

impl<Id> Clone for InMemoryHits<Id> {
    fn clone(&self) -> Self {
        InMemoryHits {
            table: Arc::clone(&self.table),
            _id: PhantomData,
        }
    }
}

impl<Id> InMemoryHits<Id>
where
    Id: Serialize + DeserializeOwned + Send + Sync,
{
    fn new() -> Self {
        InMemoryHits {
            table: Arc::new(Table::new("hits")),
            _id: PhantomData,
        }
    }

    /// Make every following hit-store operation fail; `None` heals the store.
    pub fn set_failure(&self, error: Option<Error>) {
        self.table.set_failure(error);
    }

    /// Whether a committed hit exists for the query.
    pub fn contains(&self, query_id: &HitId) -> bool {
        self.table.rows.contains_key(query_id.as_str())
    }

    /// Committed hit for the query, if any.
    pub fn get(&self, query_id: &HitId) -> Option<Hit<Id>> {
        self.table
            .rows
            .get(query_id.as_str())
            .and_then(|entry| deserialize_from_cache(entry.value()).ok())
    }

    /// Number of committed hits.
    pub fn len(&self) -> usize {
        self.table.rows.len()
    }

    /// Whether no hits are committed.
    pub fn is_empty(&self) -> bool {
        self.table.rows.is_empty()
    }
}

#[async_trait]
impl<Id> HitRepository<Id> for InMemoryHits<Id>
where
    Id: Serialize + DeserializeOwned + Send + Sync,
{
    async fn create(&self, ctx: &Context, hit: &Hit<Id>) -> Result<()> {
        self.table.precheck(ctx)?;
        let bytes = serialize_for_cache(hit)?;
        self.table.put(ctx, hit.query_id.to_string(), bytes)?;
        debug!(
            "✓ InMemory {} SET {} ({} ids)",
            self.table.name,
            hit.query_id,
            hit.entity_ids.len()
        );
        Ok(())
    }

    async fn update(&self, ctx: &Context, hit: &Hit<Id>) -> Result<()> {
        self.table.precheck(ctx)?;
        if self.table.get(ctx, hit.query_id.as_str())?.is_none() {
            return Err(Error::NotFound(hit.query_id.to_string()));
        }
        let bytes = serialize_for_cache(hit)?;
        self.table.put(ctx, hit.query_id.to_string(), bytes)
    }

    async fn find_by_id(&self, ctx: &Context, query_id: &HitId) -> Result<Option<Hit<Id>>> {
        self.table.precheck(ctx)?;
        match self.table.get(ctx, query_id.as_str())? {
            Some(bytes) => Ok(Some(deserialize_from_cache(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_all(&self, ctx: &Context) -> Result<Vec<Hit<Id>>> {
        self.table.precheck(ctx)?;
        self.table
            .values(ctx)?
            .iter()
            .map(|bytes| deserialize_from_cache(bytes))
            .collect()
    }

    async fn delete_by_id(&self, ctx: &Context, query_id: &HitId) -> Result<()> {
        self.table.precheck(ctx)?;
        if self.table.get(ctx, query_id.as_str())?.is_none() {
            return Err(Error::NotFound(query_id.to_string()));
        }
        self.table.remove(ctx, query_id.as_str())?;
        debug!("✓ InMemory {} DELETE {}", self.table.name, query_id);
        Ok(())
    }

    async fn delete_all(&self, ctx: &Context) -> Result<()> {
        self.table.precheck(ctx)?;
        self.table.clear(ctx)?;
        warn!("⚠ InMemory {} CLEAR_ALL executed", self.table.name);
        Ok(())
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Thread-safe in-memory cache repository.
///
/// Cloning is cheap and clones share the same stores, so a test can keep a
/// handle to inspect what the cache wrote.
///
/// # Example
///
/// ```no_run
/// use cache_through::repository::InMemoryRepository;
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Clone, Serialize, Deserialize)]
/// # struct User { id: u64 }
/// # impl cache_through::CacheEntity for User {
/// #     type Id = u64;
/// #     fn cache_id(&self) -> u64 { self.id }
/// #     fn cache_prefix() -> &'static str { "user" }
/// # }
///
/// let repository: InMemoryRepository<User> = InMemoryRepository::new();
/// let handle = repository.clone();
/// assert!(handle.entities().is_empty());
/// ```
pub struct InMemoryRepository<T: CacheEntity> {
    entities: InMemoryEntities<T>,
    hits: InMemoryHits<T::Id>,
    next_tx: Arc<AtomicU64>,
}

impl<T: CacheEntity> Clone for InMemoryRepository<T> {
    fn clone(&self) -> Self {
        InMemoryRepository {
            entities: self.entities.clone(),
            hits: self.hits.clone(),
            next_tx: Arc::clone(&self.next_tx),
        }
    }
}

impl<T: CacheEntity> InMemoryRepository<T> {
    /// Create an empty repository.
    pub fn new() -> Self {
        InMemoryRepository {
            entities: InMemoryEntities::new(),
            hits: InMemoryHits::new(),
            next_tx: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Entity store with its inspection helpers.
    pub fn entities(&self) -> &InMemoryEntities<T> {
        &self.entities
    }

    /// Hit store with its inspection helpers.
    pub fn hits(&self) -> &InMemoryHits<T::Id> {
        &self.hits
    }

    fn require_tx(ctx: &Context) -> Result<TxId> {
        ctx.tx().ok_or_else(|| {
            Error::TransactionError("context is not bound to a transaction".to_string())
        })
    }
}

impl<T: CacheEntity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: CacheEntity> Repository<T> for InMemoryRepository<T> {
    type Entities = InMemoryEntities<T>;
    type Hits = InMemoryHits<T::Id>;

    fn entities(&self) -> &Self::Entities {
        &self.entities
    }

    fn hits(&self) -> &Self::Hits {
        &self.hits
    }

    async fn begin_tx(&self, ctx: &Context) -> Result<Context> {
        ctx.check()?;
        let tx = TxId::new(self.next_tx.fetch_add(1, Ordering::SeqCst) + 1);
        let parent = ctx.tx();
        self.entities.table.begin(tx, parent)?;
        if let Err(e) = self.hits.table.begin(tx, parent) {
            let _ = self.entities.table.rollback(tx);
            return Err(e);
        }
        debug!("» InMemory BEGIN {} (parent: {:?})", tx, parent);
        Ok(ctx.with_tx(tx))
    }

    async fn commit_tx(&self, ctx: &Context) -> Result<()> {
        let tx = Self::require_tx(ctx)?;
        let entities = self.entities.table.commit(tx);
        let hits = self.hits.table.commit(tx);
        debug!("» InMemory COMMIT {}", tx);
        entities.and(hits)
    }

    async fn rollback_tx(&self, ctx: &Context) -> Result<()> {
        let tx = Self::require_tx(ctx)?;
        let entities = self.entities.table.rollback(tx);
        let hits = self.hits.table.rollback(tx);
        debug!("» InMemory ROLLBACK {}", tx);
        entities.and(hits)
    }
}
