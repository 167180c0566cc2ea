//! DNS-over-HTTPS upstream transports: RFC 8484 POST (raw wire format)
//! and the Google-style GET JSON API.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::dns::resolver::Resolver;
use crate::dns::wire;
use crate::error::{ProxyError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// RFC 8484 `POST application/dns-message`.
pub struct DohPostResolver {
    url: String,
    client: reqwest::Client,
}

impl DohPostResolver {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Resolver for DohPostResolver {
    async fn resolve_a(&self, name: &str) -> Result<Vec<Ipv4Addr>> {
        let query = wire::build_a_query(&format!("{}.", name.trim_end_matches('.')), rand::random())?;

        let response = self
            .client
            .post(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .header("Content-Type", "application/dns-message")
            .header("Accept", "application/dns-message")
            .body(query)
            .send()
            .await
            .map_err(|e| ProxyError::Resolution(format!("DoH POST to '{}' failed: {}", self.url, e)))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::Resolution(format!("DoH POST body read failed: {}", e)))?;

        wire::parse_a_answers(&body)
    }
}

/// Google-style `GET application/dns-json`.
pub struct DohJsonResolver {
    base_url: String,
    client: reqwest::Client,
}

impl DohJsonResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DohJsonResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<DohJsonAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohJsonAnswer {
    #[serde(rename = "type")]
    rtype: u16,
    data: String,
}

/// DNS RR type A.
const RTYPE_A: u16 = 1;

#[async_trait]
impl Resolver for DohJsonResolver {
    async fn resolve_a(&self, name: &str) -> Result<Vec<Ipv4Addr>> {
        let ascii_name = idna::domain_to_ascii(name)
            .map_err(|e| ProxyError::Resolution(format!("invalid IDN hostname '{}': {:?}", name, e)))?;

        let response = self
            .client
            .get(&self.base_url)
            .timeout(REQUEST_TIMEOUT)
            .query(&[("name", ascii_name.as_str()), ("type", "A")])
            .header("Accept", "application/dns-json")
            .send()
            .await
            .map_err(|e| ProxyError::Resolution(format!("DoH GET to '{}' failed: {}", self.base_url, e)))?;

        let parsed: DohJsonResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::Resolution(format!("DoH GET JSON decode failed: {}", e)))?;

        Ok(parsed
            .answer
            .into_iter()
            .filter(|a| a.rtype == RTYPE_A)
            .filter_map(|a| a.data.parse::<Ipv4Addr>().ok())
            .collect())
    }
}

/// Named DoH providers recognized by the `doh provider NAME` action verb.
pub fn provider_post_url(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "cloudflare" => Some("https://cloudflare-dns.com/dns-query"),
        "google" => Some("https://dns.google/dns-query"),
        "quad9" => Some("https://dns9.quad9.net/dns-query"),
        _ => None,
    }
}

/// Named DoH JSON API endpoints (only Google and Cloudflare speak the
/// JSON dialect; Quad9 does not).
pub fn provider_json_url(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "cloudflare" => Some("https://cloudflare-dns.com/dns-query"),
        "google" => Some("https://dns.google/resolve"),
        _ => None,
    }
}

/// Build a DoH upstream from a `doh` action's params. `provider` resolves
/// through the built-in table above; `server` is a literal endpoint URL.
/// `format json` selects the GET JSON dialect (`DohJsonResolver`);
/// anything else defaults to RFC 8484 POST (`DohPostResolver`).
pub fn build_resolver(
    provider: Option<&str>,
    server: Option<&str>,
    format: Option<&str>,
) -> Result<Arc<dyn Resolver>> {
    let json = format.map(|f| f.eq_ignore_ascii_case("json")).unwrap_or(false);

    if let Some(provider) = provider {
        if json {
            let url = provider_json_url(provider)
                .ok_or_else(|| ProxyError::Config(format!("doh provider '{provider}' has no JSON endpoint")))?;
            Ok(Arc::new(DohJsonResolver::new(url)))
        } else {
            let url = provider_post_url(provider)
                .ok_or_else(|| ProxyError::Config(format!("unknown doh provider '{provider}'")))?;
            Ok(Arc::new(DohPostResolver::new(url)))
        }
    } else if let Some(url) = server {
        if json {
            Ok(Arc::new(DohJsonResolver::new(url.to_string())))
        } else {
            Ok(Arc::new(DohPostResolver::new(url.to_string())))
        }
    } else {
        Err(ProxyError::Config("'doh' action requires 'provider' or 'server'".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_providers_resolve_to_post_urls() {
        assert_eq!(
            provider_post_url("cloudflare"),
            Some("https://cloudflare-dns.com/dns-query")
        );
        assert_eq!(provider_post_url("unknown"), None);
    }

    #[test]
    fn build_resolver_defaults_to_post() {
        assert!(build_resolver(Some("cloudflare"), None, None).is_ok());
    }

    #[test]
    fn build_resolver_honors_json_format() {
        assert!(build_resolver(Some("google"), None, Some("json")).is_ok());
    }

    #[test]
    fn build_resolver_rejects_json_for_quad9() {
        let err = build_resolver(Some("quad9"), None, Some("json")).unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn build_resolver_requires_provider_or_server() {
        assert!(build_resolver(None, None, None).is_err());
    }
}
