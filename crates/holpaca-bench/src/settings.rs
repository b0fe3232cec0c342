use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;

/// Flat dotted-key settings for the benchmark harness.
///
/// Any key may be overridden per thread by defining `"<key>.<threadId>"`;
/// the override wins over the plain key. Nested TOML tables flatten into
/// dotted keys, so `[cachelib] size = "1"` and `"cachelib.size" = "1"` are
/// equivalent.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: HashMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let value: toml::Value = toml::from_str(raw).context("parsing settings TOML")?;
        let mut values = HashMap::new();
        flatten("", &value, &mut values);
        Ok(Self { values })
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str, thread_id: usize) -> Option<&str> {
        self.values
            .get(&format!("{key}.{thread_id}"))
            .or_else(|| self.values.get(key))
            .map(String::as_str)
    }

    pub fn get_or(&self, key: &str, thread_id: usize, default: &str) -> String {
        self.get(key, thread_id).unwrap_or(default).to_string()
    }

    /// Typed lookup; an unparsable value is a configuration error.
    pub fn parsed<T>(&self, key: &str, thread_id: usize, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key, thread_id) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("bad value for {key}: '{raw}': {e}")),
            None => Ok(default),
        }
    }
}

fn flatten(prefix: &str, value: &toml::Value, out: &mut HashMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let full = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&full, child, out);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}
