//! Runner configuration loading.
//!
//! The config source may be a filesystem path or an inline JSON/YAML
//! string. String values support `${env.VAR}` and `${env.VAR|default}`
//! placeholders, resolved from the process environment before
//! deserialisation; a mandatory variable that is unset is a hard error.

use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub destinations: Vec<DestinationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    pub id: String,
    /// Token accepted for events going to this destination.
    pub token: String,
    /// Target table for streamed events.
    pub table_name: String,
    /// `/`-separated path of the unique event id inside raw events.
    #[serde(default = "default_unique_id_field")]
    pub unique_id_field: String,
    #[serde(default)]
    pub pk_fields: BTreeSet<String>,
    #[serde(default)]
    pub max_columns: usize,
}

fn default_unique_id_field() -> String {
    "event_id".to_string()
}

/// Loads the config from a path or an inline document, with env
/// placeholders expanded.
pub fn load(source: &str) -> Result<AppConfig> {
    let raw = if source.trim_start().starts_with('{') || source.contains('\n') {
        source.to_string()
    } else {
        std::fs::read_to_string(source).with_context(|| format!("can't read config {source}"))?
    };

    let expanded = expand_env_placeholders(&raw)?;
    serde_yaml::from_str(&expanded).context("can't parse config")
}

/// Replaces every `${env.VAR}` / `${env.VAR|default}` occurrence with the
/// environment variable's value, falling back to the default when given.
pub fn expand_env_placeholders(raw: &str) -> Result<String> {
    let pattern = Regex::new(r"\$\{env\.([A-Za-z0-9_]+)(?:\|([^}]*))?\}").expect("valid pattern");

    let mut result = String::with_capacity(raw.len());
    let mut last = 0;
    for captures in pattern.captures_iter(raw) {
        let whole = captures.get(0).expect("match");
        let name = &captures[1];
        let default = captures.get(2).map(|m| m.as_str());

        let value = match std::env::var(name) {
            Ok(value) if !value.is_empty() => value,
            _ => match default {
                Some(default) => default.to_string(),
                None => bail!("mandatory env variable was not found: {name}"),
            },
        };

        result.push_str(&raw[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }
    result.push_str(&raw[last..]);

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_env_values_and_defaults() {
        std::env::set_var("EDP_TEST_TOKEN", "s3cret");
        std::env::remove_var("EDP_TEST_MISSING");

        let expanded =
            expand_env_placeholders("token: ${env.EDP_TEST_TOKEN}\nport: ${env.EDP_TEST_MISSING|5000}\n")
                .unwrap();
        assert_eq!(expanded, "token: s3cret\nport: 5000\n");
    }

    #[test]
    fn missing_mandatory_variable_is_an_error() {
        std::env::remove_var("EDP_TEST_ABSENT");

        let err = expand_env_placeholders("token: ${env.EDP_TEST_ABSENT}").unwrap_err();
        assert!(err.to_string().contains("EDP_TEST_ABSENT"));
    }

    #[test]
    fn loads_inline_yaml() {
        let config = load(
            "destinations:\n  - id: dest-1\n    token: t1\n    table_name: events\n",
        )
        .unwrap();

        assert_eq!(config.destinations.len(), 1);
        assert_eq!(config.destinations[0].id, "dest-1");
        assert_eq!(config.destinations[0].unique_id_field, "event_id");
    }
}
