//! Upstream resolver transport (component E) exposed as a uniform
//! `Resolver` trait, plus the combined `resolve()` capability that
//! consults the static overlay (component D) before falling through to
//! whichever upstream transport is configured.
//!
//! This deliberately avoids a "virtual connection" idiom (wrapping a
//! DoH/DoT transport so a stock resolver could drive it as if it spoke
//! plain UDP) in favor of the simpler shape: one `Resolver` implementer
//! per transport.

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dns::overlay::StaticOverlay;
use crate::error::{ProxyError, Result};

/// Uniform resolution capability implemented once per upstream
/// transport (UDP/53, DoT/853, DoH POST, DoH GET JSON).
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `name` to its `A` records via this transport. Implementers
    /// perform exactly one upstream exchange; there is no retry here —
    /// only `split_pass` in the forwarding engine retries.
    async fn resolve_a(&self, name: &str) -> Result<Vec<Ipv4Addr>>;
}

/// The combined resolution capability: static overlay first, then the
/// configured upstream transport. This is what every other component
/// (`raw_pass`, `proxy_pass`, the HTTP reverse handler, the DNS listener)
/// actually calls.
pub struct Resolve {
    overlay: Arc<StaticOverlay>,
    upstream: Arc<dyn Resolver>,
}

impl Resolve {
    pub fn new(overlay: Arc<StaticOverlay>, upstream: Arc<dyn Resolver>) -> Self {
        Self { overlay, upstream }
    }

    /// Resolve `name` to a single IPv4 address: the static overlay wins
    /// on any hit (one address chosen at random from its pool); otherwise
    /// issue one upstream `A` query and return its first answer.
    pub async fn resolve(&self, name: &str) -> Result<Ipv4Addr> {
        let qname = format!("{}.", name.trim_end_matches('.'));
        if let Some(addr) = self.overlay.lookup(&qname) {
            return Ok(addr);
        }

        let answers = self.upstream.resolve_a(name).await?;
        answers
            .into_iter()
            .next()
            .ok_or_else(|| ProxyError::Resolution(format!("no A record for '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingUpstream;

    #[async_trait]
    impl Resolver for FailingUpstream {
        async fn resolve_a(&self, name: &str) -> Result<Vec<Ipv4Addr>> {
            Err(ProxyError::Resolution(format!("no upstream configured for '{}'", name)))
        }
    }

    #[tokio::test]
    async fn static_overlay_short_circuits_upstream() {
        let overlay = Arc::new(StaticOverlay::new());
        overlay.register("github.com", vec![Ipv4Addr::new(1, 2, 3, 4)]);
        let resolve = Resolve::new(overlay, Arc::new(FailingUpstream));

        let ip = resolve.resolve("api.github.com").await.unwrap();
        assert_eq!(ip, Ipv4Addr::new(1, 2, 3, 4));
    }

    #[tokio::test]
    async fn falls_through_to_upstream_error_when_no_overlay_hit() {
        let overlay = Arc::new(StaticOverlay::new());
        let resolve = Resolve::new(overlay, Arc::new(FailingUpstream));

        let err = resolve.resolve("example.com").await.unwrap_err();
        assert!(matches!(err, ProxyError::Resolution(_)));
    }
}
