//! Action grammar: `"<verb> <k> <v> <k> <v> ..."` -> `(verb, multi-map)`.
//!
//! Tokenization is whitespace-split. The first token is the verb; the
//! remaining tokens are paired `(k, v)`. Repeated keys are preserved in
//! insertion order (e.g. multiple `server` or `address` values), which is
//! why `params` is a `Vec<(String, String)>` rather than a `HashMap`.

use crate::error::{ProxyError, Result};

/// A parsed action: a verb plus an ordered multi-map of parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Action {
    pub verb: String,
    params: Vec<(String, String)>,
}

impl Action {
    /// First value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &str) -> Vec<&'a str> {
        self.params
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// `true` if `key` is present with value `"true"` (case-insensitive).
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            ProxyError::Config(format!("action '{}' missing required param '{}'", self.verb, key))
        })
    }
}

/// Parse a raw action string into `(verb, multi-map)`.
///
/// An odd number of trailing tokens (a key with no value) is rejected as a
/// configuration error rather than silently defaulted.
pub fn parse_action(raw: &str) -> Result<Action> {
    let mut tokens = raw.split_whitespace();

    let verb = match tokens.next() {
        Some(v) => v.to_string(),
        None => return Ok(Action::default()),
    };

    let mut params = Vec::new();
    loop {
        let key = match tokens.next() {
            Some(k) => k,
            None => break,
        };
        let value = tokens.next().ok_or_else(|| {
            ProxyError::Config(format!(
                "action '{}' has a trailing key '{}' with no value",
                verb, key
            ))
        })?;
        params.push((key.to_string(), value.to_string()));
    }

    Ok(Action { verb, params })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_action() {
        let a = parse_action("").unwrap();
        assert_eq!(a.verb, "");
        assert_eq!(a.get_all("anything"), Vec::<&str>::new());
    }

    #[test]
    fn single_verb_no_params() {
        let a = parse_action("raw_pass").unwrap();
        assert_eq!(a.verb, "raw_pass");
    }

    #[test]
    fn repeated_keys_preserve_order() {
        let a = parse_action("dns server A server B cache true").unwrap();
        assert_eq!(a.verb, "dns");
        assert_eq!(a.get_all("server"), vec!["A", "B"]);
        assert_eq!(a.get_all("cache"), vec!["true"]);
        assert!(a.get_bool("cache"));
    }

    #[test]
    fn proxy_pass_full_example() {
        let a = parse_action("proxy_pass host h port 8080 username u password p").unwrap();
        assert_eq!(a.verb, "proxy_pass");
        assert_eq!(a.get("host"), Some("h"));
        assert_eq!(a.get("port"), Some("8080"));
        assert_eq!(a.get("username"), Some("u"));
        assert_eq!(a.get("password"), Some("p"));
    }

    #[test]
    fn odd_trailing_key_is_rejected() {
        let err = parse_action("raw_pass host").unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn require_missing_param_errors() {
        let a = parse_action("proxy_pass port 8080").unwrap();
        assert!(a.require("host").is_err());
        assert_eq!(a.require("port").unwrap(), "8080");
    }
}
