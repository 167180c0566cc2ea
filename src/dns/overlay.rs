//! Static DNS overlay (component D): a longest-suffix map of
//! `domain -> [Ipv4Addr]`, consulted before any upstream transport.
//!
//! Keys are stored as `"." + domain + "."` (DNS names carry a trailing
//! dot); lookup forms `"." + qname` and scans for the first key that is a
//! suffix of it, picking one address uniformly at random from the hit.
//!
//! Immutable after startup (invariant I4): `register` is only ever called
//! during rule compilation, before any listener starts accepting.

use std::net::Ipv4Addr;
use std::sync::RwLock;

use rand::seq::IndexedRandom;

/// Bootstrap addresses for the DoH/DoT providers themselves, so the
/// resolver can reach its own upstream without a chicken-and-egg lookup.
pub const BUILTIN_OVERLAY: &[(&str, &[Ipv4Addr])] = &[
    (
        "cloudflare-dns.com.",
        &[Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(1, 0, 0, 1)],
    ),
    ("dns.google.", &[Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)]),
    (
        "dns9.quad9.net.",
        &[Ipv4Addr::new(9, 9, 9, 9), Ipv4Addr::new(149, 112, 112, 9)],
    ),
    (
        "dns10.quad9.net.",
        &[Ipv4Addr::new(9, 9, 9, 10), Ipv4Addr::new(149, 112, 112, 10)],
    ),
    (
        "dns11.quad9.net.",
        &[Ipv4Addr::new(9, 9, 9, 11), Ipv4Addr::new(149, 112, 112, 11)],
    ),
];

pub struct StaticOverlay {
    // Sorted by descending key length at registration time so the
    // longest (most specific) suffix always wins, same tightening as the
    // TLS/HTTP suffix router.
    entries: RwLock<Vec<(String, Vec<Ipv4Addr>)>>,
}

impl StaticOverlay {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Construct an overlay pre-seeded with the built-in DoH/DoT provider
    /// addresses.
    pub fn with_builtins() -> Self {
        let overlay = Self::new();
        for (domain, addrs) in BUILTIN_OVERLAY {
            overlay.register(domain, addrs.to_vec());
        }
        overlay
    }

    /// Register `domain` (with or without a trailing dot) with a pool of
    /// IPv4 addresses.
    pub fn register(&self, domain: &str, addrs: Vec<Ipv4Addr>) {
        let domain = domain.trim_end_matches('.');
        let key = format!(".{}.", domain);
        let mut entries = self.entries.write().unwrap();
        entries.retain(|(k, _)| k != &key);
        entries.push((key, addrs));
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    /// Look up `qname` (with or without a trailing dot); returns one
    /// address chosen uniformly at random from the longest matching
    /// suffix's pool.
    pub fn lookup(&self, qname: &str) -> Option<Ipv4Addr> {
        let qname = qname.trim_end_matches('.');
        let formed = format!(".{}.", qname);
        let entries = self.entries.read().unwrap();
        for (key, addrs) in entries.iter() {
            if formed.ends_with(key.as_str()) {
                return addrs.choose(&mut rand::rng()).copied();
            }
        }
        None
    }
}

impl Default for StaticOverlay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_suffix_matches_subdomain() {
        let overlay = StaticOverlay::new();
        overlay.register("github.com", vec![Ipv4Addr::new(1, 2, 3, 4)]);
        assert_eq!(overlay.lookup("api.github.com"), Some(Ipv4Addr::new(1, 2, 3, 4)));
        assert_eq!(overlay.lookup("api.github.com."), Some(Ipv4Addr::new(1, 2, 3, 4)));
    }

    #[test]
    fn unregistered_name_returns_none() {
        let overlay = StaticOverlay::new();
        overlay.register("github.com", vec![Ipv4Addr::new(1, 2, 3, 4)]);
        assert_eq!(overlay.lookup("example.com"), None);
    }

    #[test]
    fn longest_suffix_precedence() {
        let overlay = StaticOverlay::new();
        overlay.register("github.com", vec![Ipv4Addr::new(1, 1, 1, 1)]);
        overlay.register("api.github.com", vec![Ipv4Addr::new(2, 2, 2, 2)]);
        assert_eq!(overlay.lookup("api.github.com"), Some(Ipv4Addr::new(2, 2, 2, 2)));
        assert_eq!(overlay.lookup("other.github.com"), Some(Ipv4Addr::new(1, 1, 1, 1)));
    }

    #[test]
    fn builtins_resolve_doh_providers() {
        let overlay = StaticOverlay::with_builtins();
        assert!(overlay.lookup("cloudflare-dns.com.").is_some());
        assert!(overlay.lookup("dns.google.").is_some());
    }
}
