use std::time::Duration;

use anyhow::{bail, Context};

use super::sources::{ConfigChain, ConfigHit};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub const API_KEY_KEYS: &[&str] = &["ARCHVIZ_API_KEY", "OPENAI_API_KEY"];
pub const API_BASE_KEYS: &[&str] = &["ARCHVIZ_API_BASE", "OPENAI_API_BASE"];
pub const MAPS_API_KEY_KEYS: &[&str] = &["ARCHVIZ_MAPS_API_KEY", "GOOGLE_MAPS_API_KEY"];
pub const IMAGE_SIZE_KEYS: &[&str] = &["ARCHVIZ_IMAGE_SIZE"];
pub const STEP_DELAY_KEYS: &[&str] = &["ARCHVIZ_STEP_DELAY_MS"];
pub const TIMEOUT_KEYS: &[&str] = &["ARCHVIZ_TIMEOUT_SECS"];

pub const SETTING_GROUPS: &[(&str, &[&str])] = &[
    ("api_key", API_KEY_KEYS),
    ("api_base", API_BASE_KEYS),
    ("maps_api_key", MAPS_API_KEY_KEYS),
    ("image_size", IMAGE_SIZE_KEYS),
    ("step_delay_ms", STEP_DELAY_KEYS),
    ("timeout_secs", TIMEOUT_KEYS),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioSettings {
    pub api_base: String,
    pub api_key: Option<String>,
    pub maps_api_key: Option<String>,
    pub image_size: String,
    pub step_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for StudioSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            maps_api_key: None,
            image_size: DEFAULT_IMAGE_SIZE.to_string(),
            step_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl StudioSettings {
    pub fn resolve(chain: &ConfigChain) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let api_base = chain
            .lookup_any(API_BASE_KEYS)
            .map(|hit| normalize_api_base(&hit.value))
            .unwrap_or(defaults.api_base);
        let image_size = match chain.lookup_any(IMAGE_SIZE_KEYS) {
            Some(hit) => {
                validate_size(&hit.value).with_context(|| origin(&hit))?;
                hit.value
            }
            None => defaults.image_size,
        };
        let step_delay = match chain.lookup_any(STEP_DELAY_KEYS) {
            Some(hit) => Duration::from_millis(parse_u64(&hit)?),
            None => defaults.step_delay,
        };
        let request_timeout = match chain.lookup_any(TIMEOUT_KEYS) {
            Some(hit) => {
                let secs = parse_u64(&hit)?;
                if secs == 0 {
                    bail!("{} must be positive", origin(&hit));
                }
                Duration::from_secs(secs)
            }
            None => defaults.request_timeout,
        };

        Ok(Self {
            api_base,
            api_key: chain.lookup_any(API_KEY_KEYS).map(|hit| hit.value),
            maps_api_key: chain.lookup_any(MAPS_API_KEY_KEYS).map(|hit| hit.value),
            image_size,
            step_delay,
            request_timeout,
        })
    }
}

fn origin(hit: &ConfigHit) -> String {
    format!("{} (from {})", hit.key, hit.source)
}

fn parse_u64(hit: &ConfigHit) -> anyhow::Result<u64> {
    hit.value
        .trim()
        .parse::<u64>()
        .with_context(|| format!("{} is not a non-negative integer: '{}'", origin(hit), hit.value))
}

pub fn normalize_api_base(raw: &str) -> String {
    let base = raw.trim().trim_end_matches('/').to_string();
    if let Some(rest) = base
        .strip_prefix("https://")
        .or_else(|| base.strip_prefix("http://"))
    {
        if !rest.contains('/') {
            return format!("{base}/v1");
        }
    }
    base
}

pub fn validate_size(raw: &str) -> anyhow::Result<(u32, u32)> {
    let Some((width, height)) = raw.trim().split_once('x') else {
        bail!("image size '{raw}' must look like WIDTHxHEIGHT");
    };
    let width = width
        .parse::<u32>()
        .with_context(|| format!("invalid width in image size '{raw}'"))?;
    let height = height
        .parse::<u32>()
        .with_context(|| format!("invalid height in image size '{raw}'"))?;
    if width == 0 || height == 0 {
        bail!("image size '{raw}' must be non-zero");
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{normalize_api_base, validate_size, StudioSettings, DEFAULT_API_BASE};
    use crate::config::sources::{ConfigChain, MapSource};

    #[test]
    fn empty_chain_resolves_defaults() -> anyhow::Result<()> {
        let settings = StudioSettings::resolve(&ConfigChain::new())?;
        assert_eq!(settings, StudioSettings::default());
        assert_eq!(settings.api_base, DEFAULT_API_BASE);
        Ok(())
    }

    #[test]
    fn resolves_typed_values_and_aliases() -> anyhow::Result<()> {
        let chain = ConfigChain::new().with_source(
            MapSource::new("overrides")
                .with("OPENAI_API_KEY", "sk-legacy")
                .with("ARCHVIZ_API_BASE", "https://proxy.example.com/")
                .with("GOOGLE_MAPS_API_KEY", "maps-key")
                .with("ARCHVIZ_IMAGE_SIZE", "512x768")
                .with("ARCHVIZ_STEP_DELAY_MS", "250")
                .with("ARCHVIZ_TIMEOUT_SECS", "30"),
        );
        let settings = StudioSettings::resolve(&chain)?;
        assert_eq!(settings.api_key.as_deref(), Some("sk-legacy"));
        assert_eq!(settings.api_base, "https://proxy.example.com/v1");
        assert_eq!(settings.maps_api_key.as_deref(), Some("maps-key"));
        assert_eq!(settings.image_size, "512x768");
        assert_eq!(settings.step_delay, Duration::from_millis(250));
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn malformed_number_names_key_and_source() {
        let chain = ConfigChain::new()
            .with_source(MapSource::new("overrides").with("ARCHVIZ_STEP_DELAY_MS", "soon"));
        let err = StudioSettings::resolve(&chain)
            .err()
            .map(|err| format!("{err:#}"))
            .unwrap_or_default();
        assert!(err.contains("ARCHVIZ_STEP_DELAY_MS (from overrides)"), "{err}");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let chain = ConfigChain::new()
            .with_source(MapSource::new("overrides").with("ARCHVIZ_TIMEOUT_SECS", "0"));
        assert!(StudioSettings::resolve(&chain).is_err());
    }

    #[test]
    fn api_base_normalization() {
        assert_eq!(normalize_api_base("https://api.example.com"), "https://api.example.com/v1");
        assert_eq!(normalize_api_base("https://api.example.com/v2/"), "https://api.example.com/v2");
    }

    #[test]
    fn size_validation() {
        assert_eq!(validate_size("1024x1024").ok(), Some((1024, 1024)));
        assert!(validate_size("1024").is_err());
        assert!(validate_size("0x10").is_err());
    }
}
