//! Postcard encoding of cached records with a versioned envelope.
//!
//! Repositories that keep bytes rather than live values (the in-memory
//! repository included) store every cached entity and hit as:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│ VERSION (u32)   │POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "CTHR"
//! ```
//!
//! Storing an encoded copy means the cache never shares memory with the
//! caller's entity: mutating a returned value cannot corrupt the cache.
//!
//! ```rust
//! use cache_through::serialization::{serialize_for_cache, deserialize_from_cache};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! # fn main() -> cache_through::Result<()> {
//! let user = User { id: 1, name: "Alice".to_string() };
//! let bytes = serialize_for_cache(&user)?;
//! let copy: User = deserialize_from_cache(&bytes)?;
//! assert_eq!(user, copy);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Magic header of encoded cache records.
pub const CACHE_MAGIC: [u8; 4] = *b"CTHR";

/// Current schema version.
///
/// Increment when a cached type changes shape. Records written under another
/// version fail to decode with `Error::VersionMismatch`, which the engine
/// treats like any other repository failure: it bypasses the cache.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope wrapped around every encoded record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    /// Magic header: must be `CACHE_MAGIC`
    pub magic: [u8; 4],
    /// Schema version: must match `CURRENT_SCHEMA_VERSION`
    pub version: u32,
    /// The encoded record
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    /// Wrap a payload with the current magic and version.
    pub fn new(payload: T) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Encode a value with its envelope.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn serialize_for_cache<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(&CacheEnvelope::new(value)).map_err(|e| {
        error!("Cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Decode a value, validating magic and schema version.
///
/// # Errors
///
/// - `Error::DeserializationError`: Corrupted Postcard payload
/// - `Error::InvalidCacheEntry`: Invalid magic header
/// - `Error::VersionMismatch`: Schema version mismatch
pub fn deserialize_from_cache<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    let envelope: CacheEnvelope<T> = postcard::from_bytes(bytes).map_err(|e| {
        error!("Cache deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != CACHE_MAGIC {
        warn!("Invalid cache entry magic {:?}", envelope.magic);
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        warn!(
            "Cache version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION, envelope.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}
