//! Structured work-item identifiers.
//!
//! Items coming from a channel are namespaced by the channel folder they were
//! downloaded into (`scope/leaf`); single videos and local files use a flat
//! id. The string form is only used at the store and CLI boundary.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing an item id
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemIdError {
    #[error("Item id cannot be empty")]
    Empty,

    #[error("Malformed item id '{0}': expected 'leaf' or 'scope/leaf'")]
    Malformed(String),
}

/// A flat (`leaf`) or composite (`scope/leaf`) item identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId {
    scope: Option<String>,
    leaf: String,
}

impl ItemId {
    /// Create a flat id
    pub fn flat(leaf: impl Into<String>) -> Self {
        Self {
            scope: None,
            leaf: leaf.into(),
        }
    }

    /// Create a composite id
    pub fn scoped(scope: impl Into<String>, leaf: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            leaf: leaf.into(),
        }
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn leaf(&self) -> &str {
        &self.leaf
    }

    /// Filesystem-safe single-token form (`scope_leaf` or `leaf`)
    pub fn flattened(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}_{}", scope, self.leaf),
            None => self.leaf.clone(),
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}/{}", scope, self.leaf),
            None => write!(f, "{}", self.leaf),
        }
    }
}

impl FromStr for ItemId {
    type Err = ItemIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ItemIdError::Empty);
        }

        match s.split_once('/') {
            None => Ok(Self::flat(s)),
            Some((scope, leaf)) => {
                if scope.is_empty() || leaf.is_empty() || leaf.contains('/') {
                    return Err(ItemIdError::Malformed(s.to_string()));
                }
                Ok(Self::scoped(scope, leaf))
            }
        }
    }
}
