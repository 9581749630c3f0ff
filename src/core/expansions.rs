//! `${name}` expansion handling.
//!
//! Supported forms:
//! - `${name}`: value of `name`, empty when unset
//! - `${name|default}`: literal fallback when `name` is unset or empty
//! - `${name|*other}`: fallback to the value of expansion `other`
//!
//! Expansion is single pass: substituted values are never re-expanded.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

pub mod keys {
    pub const WORKDIR: &str = "workdir";
    pub const TASK_NAME: &str = "task_name";
    pub const BUILD_VARIANT: &str = "build_variant";
    pub const REQUESTER: &str = "requester";
    pub const REVISION: &str = "revision";
    pub const IS_PATCH: &str = "is_patch";
    pub const RUN_ID: &str = "run_id";
}

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z0-9_.\-]+)(?:\|([^}]*))?\}").expect("expansion pattern is valid")
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Expansions {
    values: BTreeMap<String, String>,
}

impl Expansions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn extend<K, V, I>(&mut self, values: I)
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in values {
            self.put(key, value);
        }
    }

    /// Merge YAML-sourced values, stringifying scalars.
    pub fn extend_values(&mut self, values: &BTreeMap<String, Value>) {
        for (key, value) in values {
            self.put(key.clone(), stringify(value));
        }
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// New layer with function `vars` bound on top of `self`.
    ///
    /// Each var value is expanded against the outer layer before binding.
    pub fn with_vars(&self, vars: &BTreeMap<String, Value>) -> Self {
        let mut layered = self.clone();
        for (key, value) in vars {
            layered.put(key.clone(), self.expand(&stringify(value)));
        }
        layered
    }

    pub fn expand(&self, template: &str) -> String {
        pattern()
            .replace_all(template, |caps: &Captures| self.resolve(caps))
            .into_owned()
    }

    /// Expand every string inside a params value, recursively.
    pub fn expand_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.expand(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.expand_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.expand_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve(&self, caps: &Captures) -> String {
        let key = &caps[1];
        if let Some(value) = self.get(key).filter(|v| !v.is_empty()) {
            return value.to_string();
        }

        match caps.get(2).map(|m| m.as_str()) {
            Some(fallback) => match fallback.strip_prefix('*') {
                Some(other) => self.get(other).unwrap_or_default().to_string(),
                None => fallback.to_string(),
            },
            None => self.get(key).unwrap_or_default().to_string(),
        }
    }
}

/// Render a YAML scalar as an expansion value. Null is empty.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Parse a `key=value` CLI assignment.
pub fn parse_assignment(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(Error::validation_invalid_argument(
            "expansion",
            format!("Expected KEY=VALUE, got '{}'", raw),
            None,
            None,
        )),
    }
}

/// Load a YAML mapping of expansions (the `--expansions-file` format).
pub fn load_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let raw: BTreeMap<String, Value> = serde_yml::from_str(&content)
        .map_err(|e| Error::config_invalid_yaml(path.display().to_string(), e))?;

    Ok(raw.iter().map(|(k, v)| (k.clone(), stringify(v))).collect())
}
