//! pnproxy
//!
//! A policy-driven, SNI-aware forwarding proxy for HTTP/TLS with a
//! recursive DNS resolver (static overlay + UDP/DoT/DoH upstreams).
//!
//! This binary:
//! - Loads a YAML rule configuration (`--config`, default `pnproxy.yaml`)
//! - Binds a TLS listener that sniffs SNI and dispatches per suffix rule
//! - Binds an HTTP/CONNECT intercepting proxy and a plain HTTP reverse
//!   handler, sharing the same dispatch logic
//! - Binds a DNS listener answering from the static overlay or an
//!   upstream resolver
//! - Shuts down gracefully on SIGINT/SIGTERM

use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pnproxy::config::RootConfig;
use pnproxy::dns::listener::DnsAction;
use pnproxy::dns::overlay::StaticOverlay;
use pnproxy::dns::resolver::Resolve;
use pnproxy::dns::transport::{doh, DotResolver, UdpResolver};
use pnproxy::dns::DnsListener;
use pnproxy::http::connect::HttpListener;
use pnproxy::http::reverse::HttpAction;
use pnproxy::rule::action::parse_action;
use pnproxy::rule::compiler::{compile_dns_action, compile_http_action, compile_tls_action};
use pnproxy::rule::suffix::SuffixRouter;
use pnproxy::tls::listener::TlsAction;
use pnproxy::tls::TlsListener;

#[derive(Parser)]
#[command(name = "pnproxy", about = "SNI-aware forwarding proxy with a recursive DNS resolver")]
struct Cli {
    #[arg(long, default_value = "pnproxy.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RootConfig::load(&cli.config).context("loading configuration")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log.level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(config = %cli.config, "pnproxy starting");

    let overlay = Arc::new(StaticOverlay::with_builtins());
    let resolve = Arc::new(build_default_resolve(&config, Arc::clone(&overlay)));

    let dns_router = Arc::new(build_dns_router(&config, Arc::clone(&overlay)));
    let tls_router = Arc::new(build_tls_router(&config, Arc::clone(&resolve)));
    let http_router = Arc::new(build_http_router(&config, Arc::clone(&resolve)));

    let mut tasks = Vec::new();

    if let Some(dns_cfg) = &config.dns {
        let listener = DnsListener::bind(&dns_cfg.listen, Arc::clone(&dns_router))
            .await
            .with_context(|| format!("binding DNS listener on {}", dns_cfg.listen))?;
        info!(addr = %dns_cfg.listen, "DNS listener bound");
        tasks.push(tokio::spawn(async move { listener.run().await }));
    }

    if let Some(tls_cfg) = &config.tls {
        let listener = TlsListener::bind(&tls_cfg.listen, Arc::clone(&tls_router))
            .await
            .with_context(|| format!("binding TLS listener on {}", tls_cfg.listen))?;
        info!(addr = %tls_cfg.listen, "TLS listener bound");
        tasks.push(tokio::spawn(async move { listener.run().await }));
    }

    if let Some(http_cfg) = &config.http {
        let listener = HttpListener::bind(&http_cfg.listen, Arc::clone(&tls_router), Arc::clone(&http_router))
            .await
            .with_context(|| format!("binding HTTP listener on {}", http_cfg.listen))?;
        info!(addr = %http_cfg.listen, "HTTP reverse listener bound");
        tasks.push(tokio::spawn(async move { listener.run().await }));
    }

    if let Some(proxy_cfg) = &config.proxy {
        let listener = HttpListener::bind(&proxy_cfg.listen, Arc::clone(&tls_router), Arc::clone(&http_router))
            .await
            .with_context(|| format!("binding HTTP/CONNECT proxy on {}", proxy_cfg.listen))?;
        info!(addr = %proxy_cfg.listen, "HTTP/CONNECT proxy bound");
        tasks.push(tokio::spawn(async move { listener.run().await }));
    }

    wait_for_shutdown().await;
    info!("shutdown signal received, exiting");

    for task in tasks {
        task.abort();
    }

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Component E's combined "Resolve(name)" capability, shared by every
/// listener that needs to turn a hostname into an IPv4 address:
/// `raw_pass`, the HTTP reverse handler's `raw_pass`, and the DNS
/// listener's own `dns.default` fallback.
fn build_default_resolve(config: &RootConfig, overlay: Arc<StaticOverlay>) -> Resolve {
    let upstream = config
        .dns
        .as_ref()
        .and_then(|d| d.default.as_ref())
        .map(|d| build_upstream_resolver(&d.action))
        .transpose()
        .unwrap_or_else(|e| {
            warn!(error = %e, "dns.default action invalid, falling back to 8.8.8.8");
            None
        })
        .unwrap_or_else(|| Arc::new(UdpResolver::new("8.8.8.8".to_string())));

    Resolve::new(overlay, upstream)
}

fn build_upstream_resolver(raw_action: &str) -> pnproxy::error::Result<Arc<dyn pnproxy::dns::resolver::Resolver>> {
    let action = parse_action(raw_action)?;
    match action.verb.as_str() {
        "dns" => {
            let server = action.require("server")?.to_string();
            Ok(Arc::new(UdpResolver::new(server)))
        }
        "dot" => {
            let server = action.require("server")?.to_string();
            let sni = action.get("sni").unwrap_or(&server).to_string();
            Ok(Arc::new(DotResolver::new(server, sni)))
        }
        "doh" => doh::build_resolver(action.get("provider"), action.get("server"), action.get("format")),
        other => Err(pnproxy::error::ProxyError::Config(format!(
            "unknown dns.default action verb '{other}'"
        ))),
    }
}

fn build_dns_router(config: &RootConfig, overlay: Arc<StaticOverlay>) -> SuffixRouter<DnsAction> {
    let router = SuffixRouter::new();
    let Some(dns_cfg) = &config.dns else {
        return router;
    };

    for rule in &dns_cfg.rules {
        let action = match parse_action(&rule.action) {
            Ok(a) => a,
            Err(e) => {
                warn!(rule = %rule.name, error = %e, "skipping unparseable dns rule");
                continue;
            }
        };
        let compiled = match compile_dns_action(&action, Arc::clone(&overlay)) {
            Ok(c) => c,
            Err(e) => {
                warn!(rule = %rule.name, error = %e, "skipping invalid dns rule");
                continue;
            }
        };
        if action.verb == "static" {
            register_static_overlay(&overlay, &rule.name, &action);
        }
        for domain in config.expand_hosts(&rule.name) {
            router.register(&domain, compiled.clone());
        }
    }

    if let Some(default) = &dns_cfg.default {
        match parse_action(&default.action).and_then(|a| compile_dns_action(&a, Arc::clone(&overlay))) {
            Ok(compiled) => router.set_default(compiled),
            Err(e) => warn!(error = %e, "skipping invalid dns default action"),
        }
    }

    router
}

fn register_static_overlay(overlay: &StaticOverlay, name: &str, action: &pnproxy::rule::action::Action) {
    let addrs: Vec<Ipv4Addr> = action
        .get_all("address")
        .iter()
        .filter_map(|a| a.parse().ok())
        .collect();
    if addrs.is_empty() {
        return;
    }
    for domain in name.split_whitespace() {
        overlay.register(domain, addrs.clone());
    }
}

fn build_tls_router(config: &RootConfig, resolve: Arc<Resolve>) -> SuffixRouter<TlsAction> {
    let router = SuffixRouter::new();
    let Some(tls_cfg) = &config.tls else {
        return router;
    };

    for rule in &tls_cfg.rules {
        let action = match parse_action(&rule.action) {
            Ok(a) => a,
            Err(e) => {
                warn!(rule = %rule.name, error = %e, "skipping unparseable tls rule");
                continue;
            }
        };
        let compiled = match compile_tls_action(&action, Arc::clone(&resolve)) {
            Ok(c) => c,
            Err(e) => {
                warn!(rule = %rule.name, error = %e, "skipping invalid tls rule");
                continue;
            }
        };
        for domain in config.expand_hosts(&rule.name) {
            router.register(&domain, compiled.clone());
        }
    }

    match &tls_cfg.default {
        Some(default) => {
            match parse_action(&default.action).and_then(|a| compile_tls_action(&a, Arc::clone(&resolve))) {
                Ok(compiled) => router.set_default(compiled),
                Err(e) => warn!(error = %e, "skipping invalid tls default action"),
            }
        }
        None => {
            // raw_pass is the normative default when no tls.default is
            // configured: unmatched SNI still gets forwarded rather than
            // silently dropped.
            router.set_default(TlsAction::raw_pass(None, 443, resolve));
        }
    }

    router
}

fn build_http_router(config: &RootConfig, resolve: Arc<Resolve>) -> SuffixRouter<HttpAction> {
    let router = SuffixRouter::new();
    let Some(http_cfg) = &config.http else {
        return router;
    };

    for rule in &http_cfg.rules {
        let action = match parse_action(&rule.action) {
            Ok(a) => a,
            Err(e) => {
                warn!(rule = %rule.name, error = %e, "skipping unparseable http rule");
                continue;
            }
        };
        let compiled = match compile_http_action(&action, Arc::clone(&resolve)) {
            Ok(c) => c,
            Err(e) => {
                warn!(rule = %rule.name, error = %e, "skipping invalid http rule");
                continue;
            }
        };
        for domain in config.expand_hosts(&rule.name) {
            router.register(&domain, compiled.clone());
        }
    }

    if let Some(default) = &http_cfg.default {
        match parse_action(&default.action).and_then(|a| compile_http_action(&a, Arc::clone(&resolve))) {
            Ok(compiled) => router.set_default(compiled),
            Err(e) => warn!(error = %e, "skipping invalid http default action"),
        }
    }

    router
}
