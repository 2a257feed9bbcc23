//! In-memory source of record for tests, demos and benchmarks.
//!
//! Implements every capability, counts lookups so tests can prove a call was
//! served from cache, and can be told to fail every operation.

use super::{AllDeleter, AllFinder, ByIdDeleter, Creator, Source, Updater};
use crate::context::Context;
use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Source of record backed by a vector, in insertion order.
///
/// # Example
///
/// ```ignore
/// let source = InMemorySource::new();
/// source.insert(User { id: 1, name: "Alice".into() });
///
/// let cache = Cache::new(source, InMemoryRepository::new());
/// cache.find_by_id(&ctx, &1).await?;
/// cache.find_by_id(&ctx, &1).await?;
/// assert_eq!(cache.source().find_by_id_calls(), 1);
/// ```
pub struct InMemorySource<T: CacheEntity> {
    rows: Mutex<Vec<T>>,
    failure: Mutex<Option<Error>>,
    find_by_id_calls: AtomicUsize,
    find_all_calls: AtomicUsize,
}

impl<T: CacheEntity> InMemorySource<T> {
    /// Create an empty source.
    pub fn new() -> Self {
        InMemorySource {
            rows: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            find_by_id_calls: AtomicUsize::new(0),
            find_all_calls: AtomicUsize::new(0),
        }
    }

    /// Create a source holding the given entities.
    pub fn with_entities(entities: impl IntoIterator<Item = T>) -> Self {
        let source = Self::new();
        source.lock_rows().extend(entities);
        source
    }

    /// Insert or replace an entity without going through the cache.
    pub fn insert(&self, entity: T) {
        let mut rows = self.lock_rows();
        let id = entity.cache_id();
        match rows.iter_mut().find(|row| row.cache_id() == id) {
            Some(row) => *row = entity,
            None => rows.push(entity),
        }
    }

    /// Make every following operation fail with `error`; `None` heals the source.
    pub fn set_failure(&self, error: Option<Error>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// Number of `find_by_id` calls that reached the source.
    pub fn find_by_id_calls(&self) -> usize {
        self.find_by_id_calls.load(Ordering::SeqCst)
    }

    /// Number of `find_all` calls that reached the source.
    pub fn find_all_calls(&self) -> usize {
        self.find_all_calls.load(Ordering::SeqCst)
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.lock_rows().len()
    }

    /// Whether the source holds no entities.
    pub fn is_empty(&self) -> bool {
        self.lock_rows().is_empty()
    }

    fn lock_rows(&self) -> MutexGuard<'_, Vec<T>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn precheck(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        match &*self.failure.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl<T: CacheEntity> Default for InMemorySource<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: CacheEntity> Source<T> for InMemorySource<T> {
    async fn find_by_id(&self, ctx: &Context, id: &T::Id) -> Result<Option<T>> {
        self.find_by_id_calls.fetch_add(1, Ordering::SeqCst);
        self.precheck(ctx)?;
        Ok(self
            .lock_rows()
            .iter()
            .find(|row| &row.cache_id() == id)
            .cloned())
    }

    fn as_creator(&self) -> Option<&dyn Creator<T>> {
        Some(self)
    }

    fn as_updater(&self) -> Option<&dyn Updater<T>> {
        Some(self)
    }

    fn as_by_id_deleter(&self) -> Option<&dyn ByIdDeleter<T::Id>> {
        Some(self)
    }

    fn as_all_deleter(&self) -> Option<&dyn AllDeleter> {
        Some(self)
    }

    fn as_all_finder(&self) -> Option<&dyn AllFinder<T>> {
        Some(self)
    }
}

#[async_trait]
impl<T: CacheEntity> Creator<T> for InMemorySource<T> {
    async fn create(&self, ctx: &Context, entity: &mut T) -> Result<()> {
        self.precheck(ctx)?;
        let mut rows = self.lock_rows();
        let id = entity.cache_id();
        if rows.iter().any(|row| row.cache_id() == id) {
            return Err(Error::SourceError(format!(
                "{} already exists with id {:?}",
                T::cache_prefix(),
                id
            )));
        }
        rows.push(entity.clone());
        Ok(())
    }
}

#[async_trait]
impl<T: CacheEntity> Updater<T> for InMemorySource<T> {
    async fn update(&self, ctx: &Context, entity: &T) -> Result<()> {
        self.precheck(ctx)?;
        let mut rows = self.lock_rows();
        let id = entity.cache_id();
        match rows.iter_mut().find(|row| row.cache_id() == id) {
            Some(row) => {
                *row = entity.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("{} {:?}", T::cache_prefix(), id))),
        }
    }
}

#[async_trait]
impl<T: CacheEntity> ByIdDeleter<T::Id> for InMemorySource<T> {
    async fn delete_by_id(&self, ctx: &Context, id: &T::Id) -> Result<()> {
        self.precheck(ctx)?;
        let mut rows = self.lock_rows();
        let before = rows.len();
        rows.retain(|row| &row.cache_id() != id);
        if rows.len() == before {
            return Err(Error::NotFound(format!("{} {:?}", T::cache_prefix(), id)));
        }
        Ok(())
    }
}

#[async_trait]
impl<T: CacheEntity> AllDeleter for InMemorySource<T> {
    async fn delete_all(&self, ctx: &Context) -> Result<()> {
        self.precheck(ctx)?;
        self.lock_rows().clear();
        Ok(())
    }
}

impl<T: CacheEntity> AllFinder<T> for InMemorySource<T> {
    fn find_all<'a>(&'a self, ctx: &'a Context) -> BoxStream<'a, Result<T>> {
        self.find_all_calls.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.precheck(ctx) {
            return stream::once(async move { Err(e) }).boxed();
        }
        let rows = self.lock_rows().clone();
        stream::iter(rows.into_iter().map(Ok)).boxed()
    }
}
