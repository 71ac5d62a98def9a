//! Dotted-path option lookup over a JSON document.
//!
//! Option names follow the `group.name.value` convention, e.g.
//! `weight.smooth.value` or `lbfgs.maxits.value`, and resolve against
//! nested JSON objects.

use crate::types::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Config {
    root: Value,
}

impl Config {
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(Self::from_value(serde_json::from_str(text)?))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.root, |node, key| node.get(key))
            .filter(|v| !v.is_null())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    /// Required option.
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value = self
            .lookup(path)
            .ok_or_else(|| Error::MissingOption(path.to_string()))?;
        T::deserialize(value).map_err(|e| Error::InvalidOption {
            key: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Optional option; a present but mistyped value is still an error.
    pub fn get_or<T: DeserializeOwned>(&self, path: &str, default: T) -> Result<T> {
        if self.contains(path) {
            self.get(path)
        } else {
            Ok(default)
        }
    }
}
