//! Path rewrite tables.
//!
//! Rewrites run on the incoming request path before route lookup. Rules are
//! plain regexes with `$1..$n` back-references in the replacement; they are
//! tried in declaration order and the first rule whose pattern matches is
//! applied.

use regex::Regex;

use crate::{Error, Result};

#[derive(Debug, Clone)]
struct RewriteRule {
    pattern: Regex,
    replacement: String,
}

#[derive(Debug, Clone, Default)]
pub struct RewriteTable {
    rules: Vec<RewriteRule>,
}

impl RewriteTable {
    /// Compile an ordered rule list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid regex.
    pub fn compile(rules: &[(String, String)]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (pattern, replacement) in rules {
            let pattern = Regex::new(pattern).map_err(|err| Error::Config {
                key: format!("path rewrite '{pattern}'"),
                reason: err.to_string(),
            })?;
            compiled.push(RewriteRule {
                pattern,
                replacement: replacement.clone(),
            });
        }
        Ok(Self { rules: compiled })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply the first matching rule, or return the path unchanged.
    #[must_use]
    pub fn apply(&self, path: &str) -> String {
        for rule in &self.rules {
            if rule.pattern.is_match(path) {
                return rule
                    .pattern
                    .replace(path, rule.replacement.as_str())
                    .into_owned();
            }
        }
        path.to_string()
    }
}
