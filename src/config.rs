//! Configuration schema and YAML loading.
//!
//! Top-level keys: `log`, `hosts`, `dns`, `tls`, `http`, `proxy`. Loaded
//! via the `config` crate (`Config::builder()` + `File::with_name(path)`).
//! Schema validation stays out of scope: deserialization failures surface
//! as `ProxyError::Config` and the caller decides whether to abort.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct RootConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub hosts: HashMap<String, String>,
    pub dns: Option<ListenerSection>,
    pub tls: Option<ListenerSection>,
    pub http: Option<ListenerSection>,
    pub proxy: Option<ProxySection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerSection {
    pub listen: String,
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
    pub default: Option<RuleDefault>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleEntry {
    pub name: String,
    pub action: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleDefault {
    pub action: String,
}

/// The intercepting HTTP/CONNECT proxy port has no rules of its own — it
/// only binds and hands off into the TLS/HTTP listeners' dispatch logic.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxySection {
    pub listen: String,
}

impl RootConfig {
    /// Load and parse `path` as YAML via the `config` crate, with
    /// `PNPROXY_`-prefixed environment variables able to override scalar
    /// fields (e.g. `PNPROXY_LOG_LEVEL=debug`), matching the
    /// `config`+`Environment` layering used elsewhere in the pack.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("PNPROXY").separator("_"))
            .build()
            .map_err(|e| ProxyError::Config(format!("failed to load config '{path}': {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| ProxyError::Config(format!("failed to parse config '{path}': {e}")))
    }

    /// Expand every rule's `name` field through the `hosts:` alias table.
    /// Deliberately trivial: whitespace-split substitution, recursive up
    /// to a depth cap to guard against alias cycles.
    pub fn expand_hosts(&self, raw: &str) -> Vec<String> {
        expand_hosts_rec(raw, &self.hosts, 0)
    }
}

const MAX_ALIAS_DEPTH: u32 = 8;

fn expand_hosts_rec(raw: &str, hosts: &HashMap<String, String>, depth: u32) -> Vec<String> {
    if depth >= MAX_ALIAS_DEPTH {
        return raw.split_whitespace().map(str::to_string).collect();
    }

    raw.split_whitespace()
        .flat_map(|token| match hosts.get(token) {
            Some(expansion) => expand_hosts_rec(expansion, hosts, depth + 1),
            None => vec![token.to_string()],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_hosts_substitutes_aliases() {
        let mut hosts = HashMap::new();
        hosts.insert("web".to_string(), "example.com www.example.com".to_string());
        let cfg = RootConfig {
            log: LogConfig::default(),
            hosts,
            dns: None,
            tls: None,
            http: None,
            proxy: None,
        };
        assert_eq!(cfg.expand_hosts("web"), vec!["example.com", "www.example.com"]);
    }

    #[test]
    fn expand_hosts_passes_through_plain_domains() {
        let cfg = RootConfig {
            log: LogConfig::default(),
            hosts: HashMap::new(),
            dns: None,
            tls: None,
            http: None,
            proxy: None,
        };
        assert_eq!(cfg.expand_hosts("example.com other.com"), vec!["example.com", "other.com"]);
    }

    #[test]
    fn expand_hosts_recurses_through_nested_aliases() {
        let mut hosts = HashMap::new();
        hosts.insert("all".to_string(), "web api".to_string());
        hosts.insert("web".to_string(), "example.com".to_string());
        hosts.insert("api".to_string(), "api.example.com".to_string());
        let cfg = RootConfig {
            log: LogConfig::default(),
            hosts,
            dns: None,
            tls: None,
            http: None,
            proxy: None,
        };
        assert_eq!(cfg.expand_hosts("all"), vec!["example.com", "api.example.com"]);
    }

    #[test]
    fn expand_hosts_depth_cap_breaks_cycles() {
        let mut hosts = HashMap::new();
        hosts.insert("a".to_string(), "b".to_string());
        hosts.insert("b".to_string(), "a".to_string());
        let cfg = RootConfig {
            log: LogConfig::default(),
            hosts,
            dns: None,
            tls: None,
            http: None,
            proxy: None,
        };
        // Must terminate rather than looping forever; exact output at the
        // depth cap isn't load-bearing.
        let _ = cfg.expand_hosts("a");
    }
}
