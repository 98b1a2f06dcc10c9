//! Configuration module for Tunn
//!
//! This module provides configuration types and parsing for the client.
//! Configuration files are JSON (or TOML when the path ends in `.toml`);
//! `$VAR` and `${VAR}` references are expanded from the environment first.

mod client;

pub use client::{
    Config, ListenerConfig, Mode, SshConfig, DEFAULT_CONNECTION_TIMEOUT_SECS,
    DEFAULT_LISTENER_PORT, DEFAULT_PROXY_TYPE, DEFAULT_SSH_PORT,
};

use anyhow::{Context, Result};
use std::path::Path;

/// Load, validate and default a configuration file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let content = expand_env(&content, |name| std::env::var(name).ok());

    let is_toml = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        parse_toml_config(&content)
    } else {
        parse_config(&content)
    }
}

/// Parse configuration from a JSON string
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config =
        serde_json::from_str(content).with_context(|| "Failed to parse configuration")?;
    finish(config)
}

/// Parse configuration from a TOML string
pub fn parse_toml_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse configuration")?;
    finish(config)
}

fn finish(mut config: Config) -> Result<Config> {
    config.validate()?;
    config.apply_defaults();
    Ok(config)
}

/// Expand `$NAME` and `${NAME}` using `lookup`; unknown names expand to nothing.
///
/// A `$` that does not start a valid reference is kept as is.
pub fn expand_env<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                let name = &braced[..end];
                if is_var_name(name) {
                    out.push_str(&lookup(name).unwrap_or_default());
                    rest = &braced[end + 1..];
                    continue;
                }
            }
        } else {
            let len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            if len > 0 {
                out.push_str(&lookup(&after[..len]).unwrap_or_default());
                rest = &after[len..];
                continue;
            }
        }

        out.push('$');
        rest = after;
    }

    out.push_str(rest);
    out
}

fn is_var_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
