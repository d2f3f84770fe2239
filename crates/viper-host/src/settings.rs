//! Rendering settings shared with the engine.
//!
//! The store is seeded once from the engine's property file plus two built-in
//! defaults. Its content hash feeds every snapshot dedup key, so changing any
//! value makes previously scheduled snapshots distinct units of work.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::VisualizerError;

/// Number of bases shown on each side of a snapshot position.
pub const VIEW_RANGE_KEY: &str = "VIPER.VIEW_RANGE";
/// Maximum height of an engine track panel, in pixels.
pub const PANEL_HEIGHT_KEY: &str = "VIPER.PANEL_HEIGHT";

pub const DEFAULT_VIEW_RANGE: i64 = 25;
pub const DEFAULT_PANEL_HEIGHT: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl SettingValue {
    /// Coerce a raw property value: `true`/`false`, then a base-10 integer,
    /// otherwise the text as given.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => raw
                .parse::<i64>()
                .map(Self::Int)
                .unwrap_or_else(|_| Self::Text(raw.to_string())),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for SettingValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    values: HashMap<String, SettingValue>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding only the built-in defaults.
    pub fn with_defaults() -> Self {
        let mut store = Self::new();
        store.apply_defaults();
        store
    }

    /// Seed from the engine's property file. A missing or unreadable file is
    /// logged and yields a store with only the built-in defaults.
    pub fn load(path: &Path) -> Self {
        let mut store = match Self::read_properties(path) {
            Ok(store) => store,
            Err(err) => {
                tracing::error!("{err}; continuing with built-in settings only");
                Self::new()
            }
        };
        store.apply_defaults();
        tracing::info!(
            path = %path.display(),
            settings = store.len(),
            hash = %store.hash(),
            "loaded engine settings"
        );
        store
    }

    /// Read a `key=value` property file without applying defaults.
    pub fn read_properties(path: &Path) -> Result<Self, VisualizerError> {
        let text = std::fs::read_to_string(path).map_err(|source| VisualizerError::PropertyFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse_properties(&text))
    }

    pub fn parse_properties(text: &str) -> Self {
        let values = text
            .lines()
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, raw)| (key.to_string(), SettingValue::parse(raw)))
            .collect();
        Self { values }
    }

    /// Built-in defaults always win over same-named property file entries.
    pub fn apply_defaults(&mut self) {
        self.set(PANEL_HEIGHT_KEY, DEFAULT_PANEL_HEIGHT);
        self.set(VIEW_RANGE_KEY, DEFAULT_VIEW_RANGE);
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Option<SettingValue> {
        self.values.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(SettingValue::as_int)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All settings sorted by name.
    pub fn entries(&self) -> Vec<(String, SettingValue)> {
        let mut entries: Vec<_> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Hex SHA-256 over every `name+value` string, concatenated in sorted order.
    pub fn hash(&self) -> String {
        let mut parts: Vec<String> = self
            .values
            .iter()
            .map(|(key, value)| format!("{key}{value}"))
            .collect();
        parts.sort();
        hex::encode(Sha256::digest(parts.concat().as_bytes()))
    }
}
