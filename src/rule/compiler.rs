//! Rule compiler (component J): turns a parsed `Action` (component B)
//! into the handler value the TLS/HTTP/DNS suffix routers actually store.
//!
//! Unknown verbs or missing required params produce `ProxyError::Config`;
//! the caller logs a `warn!` and skips that one rule rather than failing
//! the whole configuration load.

use std::sync::Arc;

use crate::dns::listener::DnsAction;
use crate::dns::overlay::StaticOverlay;
use crate::dns::resolver::Resolve;
use crate::dns::transport::{doh, DotResolver, UdpResolver};
use crate::error::{ProxyError, Result};
use crate::http::reverse::HttpAction;
use crate::rule::action::Action;
use crate::tls::listener::TlsAction;

/// Compile a TLS-listener action: `raw_pass`, `proxy_pass`, `split_pass`.
pub fn compile_tls_action(action: &Action, resolve: Arc<Resolve>) -> Result<TlsAction> {
    match action.verb.as_str() {
        "raw_pass" => Ok(TlsAction::raw_pass(
            action.get("host").map(str::to_string),
            parse_port(action, 443)?,
            resolve,
        )),
        "proxy_pass" => compile_proxy_pass(action).map(TlsAction::from_proxy_pass),
        "split_pass" => Ok(TlsAction::split_pass()),
        other => Err(ProxyError::Config(format!("unknown tls action verb '{other}'"))),
    }
}

/// Compile an HTTP-listener action: everything `compile_tls_action`
/// recognizes, plus `redirect`.
pub fn compile_http_action(action: &Action, resolve: Arc<Resolve>) -> Result<HttpAction> {
    match action.verb.as_str() {
        "redirect" => {
            let scheme = action.require("scheme")?.to_string();
            let code = match action.get("code") {
                Some(c) => c
                    .parse::<u16>()
                    .map_err(|_| ProxyError::Config(format!("redirect code '{c}' is not a valid status code")))?,
                None => 307,
            };
            Ok(HttpAction::Redirect { scheme, code })
        }
        "raw_pass" => Ok(HttpAction::RawPass {
            host: action.get("host").map(str::to_string),
            port: parse_port(action, 443)?,
            resolve,
        }),
        "proxy_pass" => compile_proxy_pass(action).map(HttpAction::ProxyPass),
        other => Err(ProxyError::Config(format!("unknown http action verb '{other}'"))),
    }
}

/// Compile a DNS-listener action: `static`, `dns` (plain UDP upstream),
/// `doh`, `dot`.
pub fn compile_dns_action(action: &Action, overlay: Arc<StaticOverlay>) -> Result<DnsAction> {
    match action.verb.as_str() {
        "static" => {
            let addrs: Vec<_> = action
                .get_all("address")
                .iter()
                .map(|a| {
                    a.parse().map_err(|_| ProxyError::Config(format!("invalid static address '{a}'")))
                })
                .collect::<Result<_>>()?;
            if addrs.is_empty() {
                return Err(ProxyError::Config("'static' action requires at least one 'address'".into()));
            }
            Ok(DnsAction::Static(Arc::new(addrs)))
        }
        "dns" => {
            let server = action.require("server")?.to_string();
            Ok(DnsAction::Forward(Arc::new(Resolve::new(overlay, Arc::new(UdpResolver::new(server))))))
        }
        "dot" => {
            let server = action.require("server")?.to_string();
            let sni = action.get("sni").unwrap_or(&server).to_string();
            Ok(DnsAction::Forward(Arc::new(Resolve::new(overlay, Arc::new(DotResolver::new(server, sni))))))
        }
        "doh" => {
            let upstream = doh::build_resolver(action.get("provider"), action.get("server"), action.get("format"))?;
            Ok(DnsAction::Forward(Arc::new(Resolve::new(overlay, upstream))))
        }
        other => Err(ProxyError::Config(format!("unknown dns action verb '{other}'"))),
    }
}

/// Compiled `proxy_pass` parameters shared between the TLS and HTTP
/// compilers: a plain HTTP-CONNECT upstream, or one with `type socks5`.
#[derive(Clone)]
pub struct ProxyPassSpec {
    pub host: String,
    pub port: u16,
    pub socks5: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn compile_proxy_pass(action: &Action) -> Result<ProxyPassSpec> {
    let host = action.require("host")?.to_string();
    let port = action
        .require("port")?
        .parse::<u16>()
        .map_err(|_| ProxyError::Config(format!("proxy_pass port '{}' is not a valid port", action.get("port").unwrap_or(""))))?;
    let socks5 = action.get("type").map(|t| t.eq_ignore_ascii_case("socks5")).unwrap_or(false);

    Ok(ProxyPassSpec {
        host,
        port,
        socks5,
        username: action.get("username").map(str::to_string),
        password: action.get("password").map(str::to_string),
    })
}

fn parse_port(action: &Action, default: u16) -> Result<u16> {
    match action.get("port") {
        Some(p) => p.parse().map_err(|_| ProxyError::Config(format!("'{p}' is not a valid port"))),
        None => Ok(default),
    }
}

/// A DNS overlay pre-seeded with bootstrap addresses for the DoH/DoT
/// provider hostnames themselves, so the resolver can reach its own
/// upstream without a chicken-and-egg lookup.
pub fn builtin_dns_overlay() -> StaticOverlay {
    StaticOverlay::with_builtins()
}
