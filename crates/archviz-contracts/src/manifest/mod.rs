mod fallback;
mod template;

use std::fmt;
use std::path::Path;

use anyhow::{bail, Context};
use indexmap::IndexMap;
use serde_json::Value;

use crate::location::ImageType;

pub use fallback::{fallback_config, FALLBACK_MODEL, FALLBACK_RESPONSE_FORMAT};
pub use template::{PromptTemplate, TemplateVars, TEMPLATE_VARIABLES};

pub const GENERATOR_KEY_SUFFIX: &str = "_generator";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationConfig {
    pub model: String,
    pub prompt_template: PromptTemplate,
    pub response_format: String,
    pub n: Option<u32>,
    pub size: Option<String>,
}

impl GenerationConfig {
    fn from_value(key: &str, value: &Value) -> anyhow::Result<Self> {
        let Some(obj) = value.as_object() else {
            bail!("generator '{key}' must be a JSON object");
        };
        let model = obj
            .get("model")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .with_context(|| format!("generator '{key}' is missing 'model'"))?
            .to_string();
        let raw_template = obj
            .get("prompt_template")
            .and_then(Value::as_str)
            .with_context(|| format!("generator '{key}' is missing 'prompt_template'"))?;
        let prompt_template = PromptTemplate::compile(raw_template)
            .with_context(|| format!("generator '{key}' has an invalid prompt_template"))?;
        let response_format = obj
            .get("response_format")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(FALLBACK_RESPONSE_FORMAT)
            .to_string();
        let n = match obj.get("n") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                raw.as_u64()
                    .filter(|value| *value > 0 && *value <= u32::MAX as u64)
                    .with_context(|| format!("generator '{key}' has an invalid 'n'"))?
                    as u32,
            ),
        };
        let size = obj
            .get("size")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        Ok(Self {
            model,
            prompt_template,
            response_format,
            n,
            size,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    generators: IndexMap<String, GenerationConfig>,
}

impl Manifest {
    pub fn new(generators: IndexMap<String, GenerationConfig>) -> Self {
        Self { generators }
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let parsed: Value = serde_json::from_str(raw).context("manifest is not valid JSON")?;
        Self::from_value(&parsed)
    }

    pub fn from_value(value: &Value) -> anyhow::Result<Self> {
        let Some(obj) = value.as_object() else {
            bail!("manifest must be a JSON object");
        };
        let mut generators = IndexMap::new();
        for (key, row) in obj {
            if !key.ends_with(GENERATOR_KEY_SUFFIX) {
                continue;
            }
            generators.insert(key.clone(), GenerationConfig::from_value(key, row)?);
        }
        Ok(Self { generators })
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading manifest {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("failed loading manifest {}", path.display()))
    }

    pub fn get(&self, key: &str) -> Option<&GenerationConfig> {
        self.generators.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.generators.keys().map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<GenerationConfig> {
        self.generators.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    Manifest,
    LegacyAlias,
    Fallback,
}

impl ConfigOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigOrigin::Manifest => "manifest",
            ConfigOrigin::LegacyAlias => "legacy_alias",
            ConfigOrigin::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub image_type: ImageType,
    pub config: GenerationConfig,
    pub origin: ConfigOrigin,
    pub fallback_reason: Option<String>,
}

impl ResolvedConfig {
    pub fn render_prompt(&self, vars: &TemplateVars) -> String {
        self.config.prompt_template.render(vars)
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorResolver {
    manifest: Manifest,
    use_fallback: bool,
}

impl GeneratorResolver {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            use_fallback: true,
        }
    }

    pub fn without_fallback(mut self) -> Self {
        self.use_fallback = false;
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn resolve(&self, image_type: ImageType) -> Result<ResolvedConfig, String> {
        let primary = image_type.generator_key();
        if let Some(config) = self.manifest.get(&primary) {
            return Ok(ResolvedConfig {
                image_type,
                config: config.clone(),
                origin: ConfigOrigin::Manifest,
                fallback_reason: None,
            });
        }

        let mut looked_up = vec![primary.clone()];
        if let Some(alias) = image_type.legacy_generator_key() {
            if let Some(config) = self.manifest.get(alias) {
                return Ok(ResolvedConfig {
                    image_type,
                    config: config.clone(),
                    origin: ConfigOrigin::LegacyAlias,
                    fallback_reason: Some(format!(
                        "Manifest has no '{primary}'; using legacy '{alias}'."
                    )),
                });
            }
            looked_up.push(alias.to_string());
        }

        if self.use_fallback {
            let config = fallback_config(image_type).map_err(|err| format!("{err:#}"))?;
            return Ok(ResolvedConfig {
                image_type,
                config,
                origin: ConfigOrigin::Fallback,
                fallback_reason: Some(format!(
                    "Manifest has no '{primary}'; using built-in generator."
                )),
            });
        }

        Err(format!(
            "configuration not found for '{}' (looked up: {})",
            image_type.label(),
            looked_up.join(", ")
        ))
    }
}
