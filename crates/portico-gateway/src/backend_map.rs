//! Resolved backend references keyed by normalized ref

use std::collections::BTreeMap;
use std::fmt;

use crate::gateway_api::BackendObjectReference;
use crate::query::QueryError;

/// Normalized backend reference: every default applied
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendRefKey {
    /// API group, empty for core
    pub group: String,
    /// Kind
    pub kind: String,
    /// Namespace, defaulted to the referencing object's
    pub namespace: String,
    /// Name
    pub name: String,
    /// Port, if the ref carries one
    pub port: Option<u16>,
}

impl BackendRefKey {
    /// Key for a backend ref made from an object in `from_namespace`
    pub fn new(backend: &BackendObjectReference, from_namespace: &str) -> Self {
        Self {
            group: backend.group_or_default().to_string(),
            kind: backend.kind_or_default().to_string(),
            namespace: backend
                .namespace
                .clone()
                .unwrap_or_else(|| from_namespace.to_string()),
            name: backend.name.clone(),
            port: backend.port,
        }
    }
}

impl fmt::Display for BackendRefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let group = if self.group.is_empty() { "core" } else { &self.group };
        write!(f, "{}/{}/{}/{}", group, self.kind, self.namespace, self.name)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// Map from backend ref to its resolution
///
/// Each key holds either a value or the error that prevented resolution,
/// never both. Re-adding a key replaces the previous entry.
#[derive(Clone, Debug)]
pub struct BackendMap<T> {
    entries: BTreeMap<BackendRefKey, Result<T, QueryError>>,
}

impl<T> Default for BackendMap<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> BackendMap<T> {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resolved value
    pub fn add(&mut self, key: BackendRefKey, value: T) {
        self.entries.insert(key, Ok(value));
    }

    /// Record a resolution error
    pub fn add_error(&mut self, key: BackendRefKey, err: QueryError) {
        self.entries.insert(key, Err(err));
    }

    /// Look up a ref; `None` when it was never resolved
    pub fn get(&self, key: &BackendRefKey) -> Option<Result<&T, &QueryError>> {
        self.entries.get(key).map(|entry| entry.as_ref())
    }

    /// Number of refs recorded
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no refs were recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolved values in key order
    pub fn values(&self) -> impl Iterator<Item = (&BackendRefKey, &T)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().ok().map(|v| (k, v)))
    }

    /// Errors in key order
    pub fn errors(&self) -> impl Iterator<Item = (&BackendRefKey, &QueryError)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().err().map(|e| (k, e)))
    }
}
