use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{Error, Result};

/// Flat, dot-keyed configuration store.
///
/// Keys are case-insensitive (stored lowercased). Writing an object value
/// flattens it into leaves and removes any stale leaves under the same
/// prefix; reading a prefix with no flat value reconstructs the subtree from
/// its leaves.
#[derive(Default, Debug)]
pub struct ConfigStore {
    values: DashMap<String, Value>,
}

impl ConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a value under `key`. Objects are flattened into leaves; any
    /// pre-existing leaves under `key.` that the new value does not produce
    /// are removed.
    pub fn set(&self, key: &str, value: Value) {
        let key = key.to_lowercase();
        let mut leaves = Vec::new();
        flatten(&key, value, &mut leaves);

        let prefix = format!("{key}.");
        let stale: Vec<String> = self
            .values
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| *k == key || k.starts_with(&prefix))
            .filter(|k| !leaves.iter().any(|(lk, _)| lk == k))
            .collect();
        for k in stale {
            self.values.remove(&k);
        }
        for (k, v) in leaves {
            self.values.insert(k, v);
        }
    }

    /// Read the value under `key`: the exact leaf when one exists, otherwise
    /// a subtree reconstructed from all leaves below the key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let key = key.to_lowercase();
        if let Some(v) = self.values.get(&key) {
            return Some(v.clone());
        }
        let prefix = format!("{key}.");
        let mut gathered: BTreeMap<String, Value> = BTreeMap::new();
        for entry in &self.values {
            if let Some(rest) = entry.key().strip_prefix(&prefix) {
                gathered.insert(rest.to_string(), entry.value().clone());
            }
        }
        if gathered.is_empty() {
            return None;
        }
        Some(unflatten(gathered))
    }

    /// Read a subtree and bind it onto a deserializable struct.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the key is missing or the subtree does
    /// not match `T`'s shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.get(key).ok_or_else(|| Error::Config {
            key: key.to_string(),
            reason: "missing".to_string(),
        })?;
        serde_json::from_value(value).map_err(|err| Error::Config {
            key: key.to_string(),
            reason: err.to_string(),
        })
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(&key.to_lowercase())
    }

    /// Snapshot of all leaf keys, for iteration that must not hold the map
    /// locked while working.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.values.iter().map(|e| e.key().clone()).collect()
    }

    /// Raw leaf read, without subtree reconstruction.
    #[must_use]
    pub fn leaf(&self, key: &str) -> Option<Value> {
        self.values.get(&key.to_lowercase()).map(|v| v.clone())
    }

    pub(crate) fn set_leaf(&self, key: &str, value: Value) {
        self.values.insert(key.to_lowercase(), value);
    }

    /// Overlay every leaf of `overrides` onto this store. Objects flatten
    /// the same way [`set`](Self::set) flattens them.
    pub fn apply_overrides(&self, overrides: &serde_json::Map<String, Value>) {
        for (key, value) in overrides {
            self.set(key, value.clone());
        }
    }
}

fn flatten(key: &str, value: Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten(&format!("{key}.{}", k.to_lowercase()), v, out);
            }
        }
        other => out.push((key.to_string(), other)),
    }
}

fn unflatten(leaves: BTreeMap<String, Value>) -> Value {
    let mut root = serde_json::Map::new();
    for (path, value) in leaves {
        let mut node = &mut root;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                node.insert(part.to_string(), value.clone());
            } else {
                let entry = node
                    .entry(part.to_string())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                // a scalar leaf shadowed by deeper leaves loses to them
                if !entry.is_object() {
                    *entry = Value::Object(serde_json::Map::new());
                }
                node = entry
                    .as_object_mut()
                    .expect("intermediate config node is always an object");
            }
        }
    }
    Value::Object(root)
}
