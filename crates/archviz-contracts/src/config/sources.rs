use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::providers::{NamedProvider, ProviderRegistry};

pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &str;
    fn try_get(&self, key: &str) -> Option<String>;
}

impl NamedProvider for Box<dyn ConfigSource> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }
}

impl fmt::Debug for dyn ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigSource({})", self.name())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

#[derive(Debug, Clone, Default)]
pub struct MapSource {
    name: String,
    values: BTreeMap<String, String>,
}

impl MapSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }
}

impl ConfigSource for MapSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_get(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(|value| non_empty(value))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn name(&self) -> &str {
        "env"
    }

    fn try_get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().and_then(|value| non_empty(&value))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DotenvSource {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl DotenvSource {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        Self {
            values: parse_dotenv(&content),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ConfigSource for DotenvSource {
    fn name(&self) -> &str {
        "dotenv"
    }

    fn try_get(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(|value| non_empty(value))
    }
}

pub fn parse_dotenv(content: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim().to_string();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
            {
                value = value[1..value.len() - 1].to_string();
            }
        }
        vars.insert(key.to_string(), value);
    }
    vars
}

#[derive(Debug, Default)]
pub struct ConfigChain {
    sources: ProviderRegistry<Box<dyn ConfigSource>>,
}

impl ConfigChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard(overrides: MapSource, dotenv_path: impl Into<PathBuf>) -> Self {
        Self::new()
            .with_source(overrides)
            .with_source(EnvSource)
            .with_source(DotenvSource::load(dotenv_path))
    }

    pub fn with_source<S: ConfigSource + 'static>(mut self, source: S) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .providers()
            .iter()
            .map(|source| source.name().to_string())
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lookup(key).map(|(_, value)| value)
    }

    pub fn lookup(&self, key: &str) -> Option<(String, String)> {
        self.sources.first_some(|source| source.try_get(key))
    }

    /// Tries each key in turn across the whole chain, so an aliased key in
    /// the highest-priority source does not beat the primary key elsewhere.
    pub fn lookup_any(&self, keys: &[&str]) -> Option<ConfigHit> {
        keys.iter().find_map(|key| {
            self.lookup(key).map(|(source, value)| ConfigHit {
                key: (*key).to_string(),
                source,
                value,
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigHit {
    pub key: String,
    pub source: String,
    pub value: String,
}
