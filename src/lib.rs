//! # cache-through
//!
//! Read-through/write-through caching for any keyed data source, with
//! query-level result caching and cascading invalidation.
//!
//! ## Features
//!
//! - **Fully Generic:** Cache any type `T` that implements `CacheEntity`
//! - **Query Caching:** Any query result is cached under a stable [`QueryKey`]
//! - **Cascading Invalidation:** Writes remove every cached query that returned the changed entity
//! - **Negative Caching:** "Not found" answers are cached too
//! - **Fail Open:** Cache storage failures are logged and reads fall back to the source
//! - **Capability Based:** Sources opt into create/update/delete/find-all individually
//!
//! ## Concepts
//!
//! - A [`Source`] is the system of record. It must find entities by ID; it may
//!   also create, update, delete or list them (see [`source`]).
//! - A [`Repository`] holds cached data: an entity store, a hit store and
//!   one-phase-commit transactions. [`InMemoryRepository`] is the reference
//!   implementation.
//! - A [`Hit`] records which entity IDs a query returned.
//! - [`Cache`] ties them together; [`CacheService`] shares it across tasks.
//!
//! ## Quick Start
//!
//! ```
//! use cache_through::{Cache, CacheEntity, Context, InMemoryRepository, InMemorySource};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! impl CacheEntity for User {
//!     type Id = u64;
//!     fn cache_id(&self) -> u64 { self.id }
//!     fn cache_prefix() -> &'static str { "user" }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> cache_through::Result<()> {
//! let source = InMemorySource::with_entities(vec![User { id: 1, name: "Alice".into() }]);
//! let cache = Cache::new(source, InMemoryRepository::new());
//! let ctx = Context::new();
//!
//! let user = cache.find_by_id(&ctx, &1).await?;
//! assert_eq!(user.map(|u| u.name), Some("Alice".to_string()));
//!
//! // Served from the entity store this time
//! cache.find_by_id(&ctx, &1).await?;
//! assert_eq!(cache.source().find_by_id_calls(), 1);
//!
//! // Write-through: the source is updated, then the cached copy
//! cache.update(&ctx, &User { id: 1, name: "Alicia".into() }).await?;
//! let user = cache.find_by_id(&ctx, &1).await?;
//! assert_eq!(user.map(|u| u.name), Some("Alicia".to_string()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Queries
//!
//! ```ignore
//! let key = QueryKey::new("FindByEmail").arg("email", &email)?.encode()?;
//! let users = cache
//!     .cached_query_many(&ctx, &key, || user_table.find_by_email(&ctx, &email))
//!     .await?;
//!
//! // After a change the cache cannot see:
//! cache.invalidate_cached_query(&ctx, &key).await?;
//! ```

#[macro_use]
extern crate log;

pub mod cache;
pub mod context;
pub mod entity;
pub mod error;
pub mod hit;
pub mod key;
pub mod observability;
pub mod repository;
pub mod serialization;
pub mod service;
pub mod source;

// Re-exports for convenience
pub use cache::Cache;
pub use context::{Context, TxId};
pub use entity::CacheEntity;
pub use error::{Error, Result};
pub use hit::Hit;
pub use key::{HitId, QueryKey};
pub use observability::{CacheMetrics, NoOpMetrics};
pub use repository::{EntityRepository, HitRepository, Repository};
pub use service::CacheService;
pub use source::{AllDeleter, AllFinder, ByIdDeleter, Capability, Creator, Source, Updater};

#[cfg(feature = "inmemory")]
pub use repository::InMemoryRepository;
#[cfg(feature = "inmemory")]
pub use source::InMemorySource;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
