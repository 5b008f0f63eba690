//! Path patterns for route matching.
//!
//! Grammar: `/users/{id}` captures one segment as `id`; `*` matches exactly
//! one segment without capturing; a trailing `**` matches the rest of the
//! path (zero or more segments). Rewrite tables use plain regexes instead —
//! the two languages are deliberately separate.

use std::collections::HashMap;

/// Specificity sentinel for a pattern end: anything beats a catch-all tail.
const END: u8 = 4;
const LITERAL: u8 = 3;
const PARAM: u8 = 2;
const WILDCARD: u8 = 1;
const CATCH_ALL: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    catch_all: bool,
}

impl PathPattern {
    /// Parse a pattern. A `**` segment must be last; anything after it is
    /// ignored.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let mut segments = Vec::new();
        let mut catch_all = false;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if part == "**" {
                catch_all = true;
                break;
            }
            segments.push(match part {
                "*" => Segment::Wildcard,
                p if p.starts_with('{') && p.ends_with('}') => {
                    Segment::Param(p[1..p.len() - 1].to_string())
                }
                p => Segment::Literal(p.to_string()),
            });
        }
        Self {
            raw: path.to_string(),
            segments,
            catch_all,
        }
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Match a concrete path, returning captured params on success.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if self.catch_all {
            if parts.len() < self.segments.len() {
                return None;
            }
        } else if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), (*part).to_string());
                }
                Segment::Wildcard => {}
            }
        }
        Some(params)
    }

    /// Per-segment specificity scores: literal > param > wildcard, with a
    /// sentinel so an exact-length pattern beats a catch-all over the same
    /// prefix. Compared lexicographically; ties fall back to registration
    /// order at the call site.
    #[must_use]
    pub fn specificity(&self) -> Vec<u8> {
        let mut scores: Vec<u8> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(_) => LITERAL,
                Segment::Param(_) => PARAM,
                Segment::Wildcard => WILDCARD,
            })
            .collect();
        scores.push(if self.catch_all { CATCH_ALL } else { END });
        scores
    }
}

/// Join a prefix and a sub-path into a single normalized pattern path:
/// one slash between parts, no trailing slash (unless the result is `/`).
#[must_use]
pub fn join_paths(prefix: &str, path: &str) -> String {
    let joined = format!("/{prefix}/{path}");
    let normalized = crate::router::NORMALIZE_URL.replace_all(&joined, "/");
    if normalized == "/" {
        normalized.into_owned()
    } else {
        normalized
            .strip_suffix('/')
            .map_or_else(|| normalized.to_string(), ToString::to_string)
    }
}
