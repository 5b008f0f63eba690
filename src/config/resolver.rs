//! `${...}` expression expansion.
//!
//! Grammar:
//!
//! - `${KEY}` / `${KEY:default}` — resolved by the `ENV` provider first,
//!   falling back to the local config store.
//! - `${@PROVIDER:key}` / `${@PROVIDER:key:default}` — dispatched to the
//!   named provider; `CFG` reads the local store.
//!
//! Defaults may themselves contain `${...}` up to a depth of
//! [`MAX_EXPANSION_DEPTH`]. Resolution runs in two passes: pass 1 resolves
//! everything external (so the store is final), pass 2 resolves store
//! references with cycle detection.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::{Error, Result};

use super::{
    provider::{CfgProvider, EnvProvider},
    ConfigProvider, ConfigStore,
};

/// Hard limit on nested `${...}` expansion.
pub const MAX_EXPANSION_DEPTH: usize = 16;

const ENV: &str = "ENV";
const CFG: &str = "CFG";

/// Registered provider backends, keyed by uppercased name.
pub struct ProviderSet {
    providers: DashMap<String, Arc<dyn ConfigProvider>>,
}

impl ProviderSet {
    /// A set with the built-in `ENV` provider registered.
    #[must_use]
    pub fn new() -> Self {
        let set = Self::empty();
        set.providers.insert(ENV.to_string(), Arc::new(EnvProvider));
        set
    }

    /// A set with no providers at all. Used by [`simple_resolve`], where
    /// only the `CFG` store is consulted.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            providers: DashMap::new(),
        }
    }

    pub fn register(&self, name: &str, provider: Arc<dyn ConfigProvider>) {
        self.providers.insert(name.to_uppercase(), provider);
    }

    fn get(&self, name: &str) -> Option<Arc<dyn ConfigProvider>> {
        self.providers.get(&name.to_uppercase()).map(|p| p.clone())
    }
}

impl Default for ProviderSet {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Resolve external providers only; store references are left verbatim.
    External,
    /// Resolve the remaining store references.
    Store,
}

struct Resolution<'a> {
    store: &'a ConfigStore,
    providers: &'a ProviderSet,
    phase: Phase,
}

/// Run both resolution passes over every declared value. Idempotent: values
/// that contain no `${...}` are left untouched.
///
/// # Errors
///
/// Returns [`Error::Config`] for malformed or unresolvable expressions,
/// [`Error::UnknownProvider`] for an unregistered provider, and
/// [`Error::ConfigCycle`] for circular store references.
pub fn resolve_configs(store: &ConfigStore, providers: &ProviderSet) -> Result<()> {
    for phase in [Phase::External, Phase::Store] {
        let resolution = Resolution {
            store,
            providers,
            phase,
        };
        for key in store.keys() {
            if let Some(Value::String(s)) = store.leaf(&key) {
                if s.contains("${") {
                    let mut visiting = vec![key.clone()];
                    let resolved = expand(&s, &resolution, 0, &mut visiting)
                        .map_err(|err| annotate(err, &key))?;
                    store.set_leaf(&key, Value::String(resolved));
                }
            }
        }
    }
    Ok(())
}

/// Resolve a single expression string against the store only (`CFG`
/// semantics; no external providers).
///
/// # Errors
///
/// Same failure modes as [`resolve_configs`], scoped to one string.
pub fn simple_resolve(store: &ConfigStore, input: &str) -> Result<String> {
    let providers = ProviderSet::empty();
    let resolution = Resolution {
        store,
        providers: &providers,
        phase: Phase::Store,
    };
    expand(input, &resolution, 0, &mut Vec::new())
}

fn annotate(err: Error, key: &str) -> Error {
    match err {
        Error::Config { key: inner, reason } => Error::Config {
            key: format!("{key} -> {inner}"),
            reason,
        },
        other => other,
    }
}

fn expand(
    input: &str,
    resolution: &Resolution<'_>,
    depth: usize,
    visiting: &mut Vec<String>,
) -> Result<String> {
    if depth > MAX_EXPANSION_DEPTH {
        return Err(Error::Config {
            key: input.to_string(),
            reason: format!("expansion deeper than {MAX_EXPANSION_DEPTH} levels"),
        });
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let inner_start = start + 2;
        let end = matching_brace(rest, inner_start).ok_or_else(|| Error::Config {
            key: input.to_string(),
            reason: "unclosed placeholder".to_string(),
        })?;
        let token = &rest[inner_start..end];
        match resolve_token(token, resolution, depth, visiting)? {
            Some(value) => out.push_str(&value),
            // deferred to the store pass: re-emit the token verbatim
            None => {
                out.push_str("${");
                out.push_str(token);
                out.push('}');
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Index of the `}` closing the token whose body starts at `from`,
/// honoring nested `${...}` openers inside defaults.
fn matching_brace(s: &str, from: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 1usize;
    let mut i = from;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"${") {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'}' {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
            i += 1;
        } else {
            i += 1;
        }
    }
    None
}

/// Split `token` at top-level colons (colons inside nested `${...}` do not
/// separate), yielding at most `limit + 1` parts.
fn split_top_level(token: &str, limit: usize) -> Vec<&str> {
    let bytes = token.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut seg_start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"${") {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'}' && depth > 0 {
            depth -= 1;
            i += 1;
        } else if bytes[i] == b':' && depth == 0 && parts.len() < limit {
            parts.push(&token[seg_start..i]);
            seg_start = i + 1;
            i += 1;
        } else {
            i += 1;
        }
    }
    parts.push(&token[seg_start..]);
    parts
}

/// Resolve one token body. `Ok(None)` means "defer to the store pass".
fn resolve_token(
    token: &str,
    resolution: &Resolution<'_>,
    depth: usize,
    visiting: &mut Vec<String>,
) -> Result<Option<String>> {
    if let Some(provider_form) = token.strip_prefix('@') {
        let parts = split_top_level(provider_form, 2);
        let provider_name = parts[0].trim();
        let arg = parts.get(1).copied().unwrap_or_default();
        let default = parts.get(2).copied();
        if arg.is_empty() {
            return Err(Error::Config {
                key: token.to_string(),
                reason: "provider reference without a key".to_string(),
            });
        }
        if provider_name.eq_ignore_ascii_case(CFG) {
            if resolution.phase == Phase::External {
                return Ok(None);
            }
            return lookup_store(arg, default, resolution, depth, visiting, true).map(Some);
        }
        let provider = resolution
            .providers
            .get(provider_name)
            .ok_or_else(|| Error::UnknownProvider(provider_name.to_string()))?;
        let key = expand(arg, resolution, depth + 1, visiting)?;
        match provider.fetch(&key)? {
            Some(value) => Ok(Some(value)),
            None => match default {
                Some(d) => expand(d, resolution, depth + 1, visiting).map(Some),
                None => Err(Error::Config {
                    key: key.clone(),
                    reason: format!("provider '{provider_name}' has no value"),
                }),
            },
        }
    } else {
        let parts = split_top_level(token, 1);
        let key = parts[0].trim();
        let default = parts.get(1).copied();
        if key.is_empty() {
            return Err(Error::Config {
                key: token.to_string(),
                reason: "empty placeholder".to_string(),
            });
        }
        if let Some(env) = resolution.providers.get(ENV) {
            if let Some(value) = env.fetch(key)? {
                return Ok(Some(value));
            }
        }
        if resolution.phase == Phase::External {
            return Ok(None);
        }
        lookup_store(key, default, resolution, depth, visiting, false).map(Some)
    }
}

fn lookup_store(
    key: &str,
    default: Option<&str>,
    resolution: &Resolution<'_>,
    depth: usize,
    visiting: &mut Vec<String>,
    explicit_cfg: bool,
) -> Result<String> {
    let key = expand(key, resolution, depth + 1, visiting)?.to_lowercase();

    if visiting.contains(&key) {
        // explicit @CFG cycles are always fatal; a bare self-reference may
        // still fall back to its default
        if explicit_cfg || default.is_none() {
            let mut chain = visiting.clone();
            chain.push(key);
            return Err(Error::ConfigCycle { chain });
        }
        return expand(
            default.unwrap_or_default(),
            resolution,
            depth + 1,
            visiting,
        );
    }

    match CfgProvider::fetch_from(resolution.store, &key) {
        Some(raw) => {
            if raw.contains("${") {
                visiting.push(key);
                let expanded = expand(&raw, resolution, depth + 1, visiting);
                visiting.pop();
                expanded
            } else {
                Ok(raw)
            }
        }
        None => match default {
            Some(d) => expand(d, resolution, depth + 1, visiting),
            None => Err(Error::Config {
                key: key.clone(),
                reason: "unresolved reference".to_string(),
            }),
        },
    }
}
