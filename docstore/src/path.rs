use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Address of a document: `collection/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocPath {
    collection: String,
    key: String,
}

impl DocPath {
    /// Build a path, rejecting empty segments and embedded separators.
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Result<Self, StoreError> {
        let collection = collection.into();
        let key = key.into();
        for segment in [&collection, &key] {
            if segment.is_empty() || segment.contains('/') {
                return Err(StoreError::InvalidPath(format!("{collection}/{key}")));
            }
        }
        Ok(Self { collection, key })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

impl FromStr for DocPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((collection, key)) => Self::new(collection, key),
            None => Err(StoreError::InvalidPath(s.to_string())),
        }
    }
}
