//! HTTP reverse handler (component I): serves everything the intercepting
//! proxy listener (component H) doesn't hand off as a raw `CONNECT`
//! tunnel — `redirect`, `raw_pass`, `proxy_pass` against the `Host`
//! header's suffix-routed rule.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::dns::resolver::Resolve;
use crate::error::{ProxyError, Result};
use crate::http::connect::ParsedRequest;
use crate::rule::compiler::ProxyPassSpec;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// A compiled HTTP rule action.
#[derive(Clone)]
pub enum HttpAction {
    Redirect { scheme: String, code: u16 },
    RawPass { host: Option<String>, port: u16, resolve: Arc<Resolve> },
    ProxyPass(ProxyPassSpec),
}

/// A response ready to be serialized back over the client's raw socket.
pub struct OutboundResponse {
    pub status: u16,
    pub reason: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl OutboundResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).into_bytes();
        for (k, v) in &self.headers {
            out.extend_from_slice(format!("{k}: {v}\r\n").as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", self.body.len()).as_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

fn status_reason(code: u16) -> &'static str {
    match code {
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        _ => "Redirect",
    }
}

/// Run the compiled action against a parsed request, producing the
/// response to stream back verbatim. Any resolution or upstream-dial
/// failure is logged and folds into a dropped connection upstream — this
/// function returns `Err` in that case rather than synthesizing an error
/// page; there is no retry at this layer.
pub async fn handle_request(action: &HttpAction, req: &ParsedRequest) -> Result<OutboundResponse> {
    match action {
        HttpAction::Redirect { scheme, code } => Ok(build_redirect(req, scheme, *code)),
        HttpAction::RawPass { host, port, resolve } => {
            let target_host = host.as_deref().unwrap_or(&req.host);
            let ip = resolve.resolve(target_host).await?;
            run_round_trip(req, &ip.to_string(), *port, None).await
        }
        HttpAction::ProxyPass(spec) => {
            if req.is_https_target() {
                // Rewriting URL.Host to a bare IP for an HTTPS upstream
                // would break SNI. Refuse rather than silently corrupt
                // the handshake.
                return Err(ProxyError::Protocol(
                    "proxy_pass is not supported for HTTPS targets over the HTTP reverse handler".into(),
                ));
            }
            run_round_trip(req, &spec.host.clone(), spec.port, Some(spec)).await
        }
    }
    .map_err(|e| {
        warn!(host = %req.host, error = %e, "HTTP reverse handler failed");
        e
    })
}

fn build_redirect(req: &ParsedRequest, scheme: &str, code: u16) -> OutboundResponse {
    let location = format!("{scheme}://{}{}", req.host, req.path);
    OutboundResponse {
        status: code,
        reason: status_reason(code),
        headers: vec![("Location".to_string(), location)],
        body: Vec::new(),
    }
}

/// `raw_pass`/`proxy_pass`: resolve `target_host` (unless we're dialing
/// through an upstream HTTP proxy, which resolves it itself), rewrite the
/// request's destination while preserving the original `Host` header,
/// run one round trip, and copy the response back verbatim.
async fn run_round_trip(
    req: &ParsedRequest,
    target_host: &str,
    port: u16,
    proxy: Option<&ProxyPassSpec>,
) -> Result<OutboundResponse> {
    let mut builder = reqwest::Client::builder().timeout(UPSTREAM_TIMEOUT);

    let url = if let Some(spec) = proxy {
        let proxy_url = format!("http://{}:{}", spec.host, spec.port);
        let mut proxy_cfg = reqwest::Proxy::http(&proxy_url)
            .map_err(|e| ProxyError::Config(format!("invalid proxy_pass upstream '{proxy_url}': {e}")))?;
        if let (Some(user), Some(pass)) = (&spec.username, &spec.password) {
            proxy_cfg = proxy_cfg.basic_auth(user, pass);
        }
        builder = builder.proxy(proxy_cfg);
        format!("http://{}{}", req.host, req.path)
    } else {
        // Resolution happened at the caller (`HttpAction::RawPass`); here
        // we just point the client straight at the already-resolved host
        // while preserving the original Host header value below.
        format!("http://{target_host}:{port}{}", req.path)
    };

    let client = builder
        .build()
        .map_err(|e| ProxyError::Network(std::io::Error::other(e)))?;

    let mut request = client.request(req.method.parse().unwrap_or(reqwest::Method::GET), &url);
    for (k, v) in &req.headers {
        if k.eq_ignore_ascii_case("host") {
            continue;
        }
        request = request.header(k, v);
    }
    request = request.header("Host", &req.host);
    if !req.body.is_empty() {
        request = request.body(req.body.clone());
    }

    let response = request
        .send()
        .await
        .map_err(|e| ProxyError::Network(std::io::Error::other(e)))?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter(|(k, _)| !k.as_str().eq_ignore_ascii_case("transfer-encoding"))
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    let body = response
        .bytes()
        .await
        .map_err(|e| ProxyError::Network(std::io::Error::other(e)))?
        .to_vec();

    debug!(host = %req.host, status = status, bytes = body.len(), "HTTP round trip complete");

    let reason = http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("");

    Ok(OutboundResponse { status, reason, headers, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(host: &str, path: &str) -> ParsedRequest {
        ParsedRequest {
            method: "GET".to_string(),
            path: path.to_string(),
            host: host.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            https_target: false,
        }
    }

    #[test]
    fn redirect_builds_location_with_overridden_scheme() {
        let request = req("example.com", "/foo");
        let resp = build_redirect(&request, "https", 301);
        assert_eq!(resp.status, 301);
        assert_eq!(resp.headers[0], ("Location".to_string(), "https://example.com/foo".to_string()));
    }

    #[test]
    fn default_redirect_code_has_a_reason_phrase() {
        // The compiler defaults `code` to 307 when absent; this test just
        // documents the reason string lookup is exhaustive for it.
        assert_eq!(status_reason(307), "Temporary Redirect");
    }
}
