//! Config value providers.
//!
//! A provider resolves `${@PROVIDER:key}` references. `ENV` and `CFG` ship
//! built in; Vault- or cloud-backed providers plug in through
//! [`ConfigProvider`].

use serde_json::Value;

use crate::Result;

use super::ConfigStore;

/// Backend for `${@PROVIDER:key}` references.
pub trait ConfigProvider: Send + Sync {
    /// Resolve `key` to a string value, or `None` when the key is unknown to
    /// this backend.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend itself fails (I/O, auth), as
    /// opposed to a plain miss.
    fn fetch(&self, key: &str) -> Result<Option<String>>;
}

/// Resolves keys from process environment variables.
pub struct EnvProvider;

impl ConfigProvider for EnvProvider {
    fn fetch(&self, key: &str) -> Result<Option<String>> {
        Ok(std::env::var(key.trim()).ok())
    }
}

/// Resolves keys from the local [`ConfigStore`].
///
/// Kept as a unit struct so the store can be handed in per resolution run;
/// the resolver needs the store anyway for cycle tracking.
pub struct CfgProvider;

impl CfgProvider {
    pub(crate) fn fetch_from(store: &ConfigStore, key: &str) -> Option<String> {
        store.leaf(key).map(|v| value_to_string(&v))
    }
}

/// Render a config value as the string a `${...}` expansion splices in.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
