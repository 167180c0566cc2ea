//! Domain-suffix longest-match router shared by the TLS, HTTP and DNS
//! listeners.
//!
//! Keys are stored with a leading `"."` (`register("example.com", h)`
//! stores the key `".example.com"`). A query `q` is matched by forming
//! `"." + q` and finding the longest stored key that is a suffix of it.
//!
//! A naive version of this lookup that iterates an unordered map and
//! returns the first suffix hit makes multi-match behavior
//! order-dependent. This router instead keeps keys sorted by descending
//! length so the match is always the most specific one, deliberately.

use std::sync::RwLock;

/// A domain-suffix router mapping `"." + domain` keys to handlers of type
/// `T`. `T` is expected to be cheaply `Clone`able (an `Arc`, a closure
/// wrapped in `Arc`, or a small value type).
pub struct SuffixRouter<T> {
    // Kept sorted by descending key length so `lookup` always returns the
    // longest (most specific) match rather than the first one registered.
    entries: RwLock<Vec<(String, T)>>,
    default: RwLock<Option<T>>,
}

impl<T: Clone> SuffixRouter<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            default: RwLock::new(None),
        }
    }

    /// Register `pattern` (a bare domain, no leading dot) with `handler`.
    pub fn register(&self, pattern: &str, handler: T) {
        let key = format!(".{}", pattern);
        let mut entries = self.entries.write().unwrap();
        entries.retain(|(k, _)| k != &key);
        entries.push((key, handler));
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    pub fn set_default(&self, handler: T) {
        *self.default.write().unwrap() = Some(handler);
    }

    /// Look up the handler for `query` (a bare domain, no leading dot).
    ///
    /// Returns the longest registered suffix match, or the default
    /// handler if nothing matches.
    pub fn lookup(&self, query: &str) -> Option<T> {
        let formed = format!(".{}", query);
        let entries = self.entries.read().unwrap();
        for (key, handler) in entries.iter() {
            if key.is_empty() || formed.ends_with(key.as_str()) {
                return Some(handler.clone());
            }
        }
        drop(entries);
        self.default.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl<T: Clone> Default for SuffixRouter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_registered_pattern_matches_subdomains() {
        let router: SuffixRouter<&'static str> = SuffixRouter::new();
        router.register("example.com", "handler-a");
        assert_eq!(router.lookup("a.b.example.com"), Some("handler-a"));
        assert_eq!(router.lookup("example.com"), Some("handler-a"));
    }

    #[test]
    fn lookup_unmatched_returns_default() {
        let router: SuffixRouter<&'static str> = SuffixRouter::new();
        router.register("example.com", "handler-a");
        router.set_default("fallback");
        assert_eq!(router.lookup("zzz"), Some("fallback"));
    }

    #[test]
    fn lookup_unmatched_no_default_returns_none() {
        let router: SuffixRouter<&'static str> = SuffixRouter::new();
        router.register("example.com", "handler-a");
        assert_eq!(router.lookup("zzz"), None);
    }

    #[test]
    fn longest_suffix_wins_on_overlap() {
        let router: SuffixRouter<&'static str> = SuffixRouter::new();
        router.register("com", "generic");
        router.register("example.com", "specific");
        assert_eq!(router.lookup("example.com"), Some("specific"));
        assert_eq!(router.lookup("other.com"), Some("generic"));
    }

    #[test]
    fn re_registering_a_pattern_replaces_it() {
        let router: SuffixRouter<&'static str> = SuffixRouter::new();
        router.register("example.com", "first");
        router.register("example.com", "second");
        assert_eq!(router.lookup("example.com"), Some("second"));
        assert_eq!(router.len(), 1);
    }
}
