//! Query key codec.
//!
//! A cached query is identified by its operation name and its arguments. The
//! pair is encoded into a [`HitId`], the primary key of the hit store.
//!
//! The encoding is canonical JSON of `[operation, args]`. Argument maps are
//! ordered by name at every nesting level, so the order in which arguments are
//! added never changes the key, while any difference in operation or argument
//! value does.
//!
//! ```
//! use cache_through::key::QueryKey;
//!
//! # fn main() -> cache_through::Result<()> {
//! let a = QueryKey::new("FindByName").arg("name", "alice")?.arg("active", &true)?;
//! let b = QueryKey::new("FindByName").arg("active", &true)?.arg("name", "alice")?;
//! assert_eq!(a.encode()?, b.encode()?);
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Operation name of the canonical by-ID query.
pub const FIND_BY_ID: &str = "FindByID";

/// Operation name of the canonical find-all query.
pub const FIND_ALL: &str = "FindAll";

/// Identifier of a cached query result (the hit store primary key).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HitId(String);

impl HitId {
    /// The encoded key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for HitId {
    fn from(s: String) -> Self {
        HitId(s)
    }
}

impl From<&str> for HitId {
    fn from(s: &str) -> Self {
        HitId(s.to_string())
    }
}

impl AsRef<str> for HitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Logical identity of a query: an operation name plus named arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryKey {
    operation: String,
    args: Map<String, Value>,
}

impl QueryKey {
    /// Start a key for the given operation with no arguments.
    pub fn new(operation: impl Into<String>) -> Self {
        QueryKey {
            operation: operation.into(),
            args: Map::new(),
        }
    }

    /// Canonical key of a by-ID lookup.
    ///
    /// # Errors
    ///
    /// Returns `Error::SerializationError` if the ID cannot be serialized.
    pub fn find_by_id<Id: Serialize + ?Sized>(id: &Id) -> Result<Self> {
        QueryKey::new(FIND_BY_ID).arg("ID", id)
    }

    /// Canonical key of the find-all query.
    pub fn find_all() -> Self {
        QueryKey::new(FIND_ALL)
    }

    /// Add a named argument. Adding the same name twice keeps the last value.
    ///
    /// # Errors
    ///
    /// Returns `Error::SerializationError` if the value cannot be serialized
    /// (for example a map with non-string keys).
    pub fn arg<V: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &V) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        self.args.insert(name.into(), value);
        Ok(self)
    }

    /// Operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Encode into the hit identifier.
    ///
    /// # Errors
    ///
    /// Returns `Error::SerializationError` if JSON encoding fails.
    pub fn encode(&self) -> Result<HitId> {
        let encoded = serde_json::to_string(&(&self.operation, &self.args))?;
        Ok(HitId(encoded))
    }
}
