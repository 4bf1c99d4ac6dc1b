//! Composite keys for discovered resources.
//!
//! A [`ServiceKey`] identifies one workload-like unit across passes by its
//! namespace, kind and name. It is the deduplication key for package-manager
//! releases and the identity downstream consumers use to diff snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `namespace/kind/name` key, displayed and parsed in that form.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceKey {
    namespace: String,
    kind: String,
    name: String,
}

impl ServiceKey {
    /// Create a key from its three parts.
    ///
    /// Cluster-scoped objects use an empty namespace.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// The namespace part (empty for cluster-scoped objects).
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The kind part.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The name part.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceKey({self})")
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

impl FromStr for ServiceKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        let (Some(namespace), Some(kind), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(KeyError::MissingPart(s.to_string()));
        };

        if kind.is_empty() {
            return Err(KeyError::EmptyKind);
        }
        if name.is_empty() {
            return Err(KeyError::EmptyName);
        }

        Ok(Self::new(namespace, kind, name))
    }
}

impl TryFrom<String> for ServiceKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ServiceKey> for String {
    fn from(key: ServiceKey) -> Self {
        key.to_string()
    }
}

/// Errors that can occur when parsing a [`ServiceKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// The input does not have three `/`-separated parts.
    #[error("service key must be namespace/kind/name, got {0:?}")]
    MissingPart(String),

    /// The kind part is empty.
    #[error("service key has an empty kind")]
    EmptyKind,

    /// The name part is empty.
    #[error("service key has an empty name")]
    EmptyName,
}
