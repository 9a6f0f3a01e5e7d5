use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use archviz_contracts::config::{ConfigChain, StudioSettings, SETTING_GROUPS};
use archviz_contracts::location::{ImageType, Location};
use archviz_contracts::manifest::{ConfigOrigin, GeneratorResolver};
use archviz_contracts::providers::{NamedProvider, ProviderRegistry};
use chrono::{SecondsFormat, Utc};
use reqwest::blocking::Client as HttpClient;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::capture::{MapImageSource, StaticMapSource};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_API_KEY_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

impl ProbeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeStatus::Pass => "pass",
            ProbeStatus::Warn => "warn",
            ProbeStatus::Fail => "fail",
            ProbeStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub name: String,
    pub status: ProbeStatus,
    pub detail: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl ProbeResult {
    pub fn new(name: &str, status: ProbeStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }
}

pub trait Probe: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self) -> ProbeResult;
}

impl NamedProvider for Box<dyn Probe> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsReport {
    pub generated_at: String,
    pub results: Vec<ProbeResult>,
}

impl DiagnosticsReport {
    pub fn has_failures(&self) -> bool {
        self.results
            .iter()
            .any(|result| result.status == ProbeStatus::Fail)
    }

    pub fn render_text(&self) -> String {
        let mut out = format!("diagnostics @ {}\n", self.generated_at);
        for result in &self.results {
            out.push_str(&format!(
                "  [{:<7}] {:<18} {}\n",
                result.status, result.name, result.detail
            ));
        }
        out
    }
}

#[derive(Default)]
pub struct DiagnosticsBundle {
    probes: ProviderRegistry<Box<dyn Probe>>,
}

impl DiagnosticsBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe<P: Probe + 'static>(mut self, probe: P) -> Self {
        self.probes.push(Box::new(probe));
        self
    }

    pub fn standard(
        chain: &ConfigChain,
        settings: &StudioSettings,
        resolver: GeneratorResolver,
    ) -> Self {
        Self::new()
            .with_probe(EnvironmentProbe::from_chain(chain))
            .with_probe(ApiKeyFormatProbe::new(settings.api_key.clone()))
            .with_probe(ApiAuthorizationProbe::new(
                &settings.api_base,
                settings.api_key.clone(),
            ))
            .with_probe(MapsReachabilityProbe::new(settings.maps_api_key.clone()))
            .with_probe(ManifestProbe::new(resolver))
    }

    pub fn names(&self) -> Vec<String> {
        self.probes
            .providers()
            .iter()
            .map(|probe| probe.name().to_string())
            .collect()
    }

    pub fn run_all(&self) -> DiagnosticsReport {
        let results = self
            .probes
            .providers()
            .iter()
            .map(|probe| {
                catch_unwind(AssertUnwindSafe(|| probe.run())).unwrap_or_else(|_| {
                    ProbeResult::new(probe.name(), ProbeStatus::Fail, "probe panicked")
                })
            })
            .collect();
        DiagnosticsReport {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            results,
        }
    }
}

/// `sk-a…wxyz` style preview; short secrets are fully hidden.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len().max(4));
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(digest)[..12].to_string()
}

pub struct EnvironmentProbe {
    sources: Vec<String>,
    resolved: Vec<(String, Option<(String, String, String)>)>,
}

impl EnvironmentProbe {
    pub fn from_chain(chain: &ConfigChain) -> Self {
        let resolved = SETTING_GROUPS
            .iter()
            .map(|(group, keys)| {
                let hit = chain.lookup_any(keys).map(|hit| {
                    let shown = if group.contains("key") {
                        mask_secret(&hit.value)
                    } else {
                        hit.value.clone()
                    };
                    (hit.key, hit.source, shown)
                });
                (group.to_string(), hit)
            })
            .collect();
        Self {
            sources: chain.source_names(),
            resolved,
        }
    }
}

impl Probe for EnvironmentProbe {
    fn name(&self) -> &str {
        "environment"
    }

    fn run(&self) -> ProbeResult {
        let mut settings = Map::new();
        for (group, hit) in &self.resolved {
            let value = match hit {
                Some((key, source, shown)) => json!({"key": key, "source": source, "value": shown}),
                None => Value::Null,
            };
            settings.insert(group.clone(), value);
        }
        let found = self.resolved.iter().filter(|(_, hit)| hit.is_some()).count();
        ProbeResult::new(
            self.name(),
            ProbeStatus::Pass,
            format!(
                "{} {} archviz {}; {found}/{} settings resolved",
                std::env::consts::OS,
                std::env::consts::ARCH,
                env!("CARGO_PKG_VERSION"),
                self.resolved.len()
            ),
        )
        .with_field("os", json!(std::env::consts::OS))
        .with_field("arch", json!(std::env::consts::ARCH))
        .with_field("version", json!(env!("CARGO_PKG_VERSION")))
        .with_field("sources", json!(self.sources))
        .with_field("settings", Value::Object(settings))
    }
}

pub struct ApiKeyFormatProbe {
    api_key: Option<String>,
}

impl ApiKeyFormatProbe {
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key }
    }
}

impl Probe for ApiKeyFormatProbe {
    fn name(&self) -> &str {
        "api_key_format"
    }

    fn run(&self) -> ProbeResult {
        let Some(key) = self.api_key.as_deref() else {
            return ProbeResult::new(self.name(), ProbeStatus::Fail, "API key not configured");
        };
        let chars = key.chars().count();
        let (status, detail) = if key.chars().any(char::is_whitespace) {
            (ProbeStatus::Fail, "API key contains whitespace".to_string())
        } else if chars < MIN_API_KEY_CHARS {
            (
                ProbeStatus::Warn,
                format!("API key is unusually short ({chars} chars)"),
            )
        } else {
            (ProbeStatus::Pass, "API key looks well-formed".to_string())
        };
        ProbeResult::new(self.name(), status, detail)
            .with_field("length", json!(chars))
            .with_field("preview", json!(mask_secret(key)))
            .with_field("sha256_prefix", json!(fingerprint(key)))
    }
}

pub struct ApiAuthorizationProbe {
    api_base: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ApiAuthorizationProbe {
    pub fn new(api_base: &str, api_key: Option<String>) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Probe for ApiAuthorizationProbe {
    fn name(&self) -> &str {
        "api_authorization"
    }

    fn run(&self) -> ProbeResult {
        let Some(key) = self.api_key.as_deref() else {
            return ProbeResult::new(self.name(), ProbeStatus::Skipped, "no API key");
        };
        let endpoint = format!("{}/models", self.api_base);
        let client = match HttpClient::builder().timeout(self.timeout).build() {
            Ok(client) => client,
            Err(err) => {
                return ProbeResult::new(
                    self.name(),
                    ProbeStatus::Fail,
                    format!("HTTP client unavailable: {err}"),
                )
            }
        };
        match client.get(&endpoint).bearer_auth(key).send() {
            Ok(response) => {
                let status = response.status().as_u16();
                let verdict = match status {
                    200..=299 => ProbeStatus::Pass,
                    401 | 403 => ProbeStatus::Fail,
                    _ => ProbeStatus::Warn,
                };
                ProbeResult::new(
                    self.name(),
                    verdict,
                    format!("GET {endpoint} returned {status}"),
                )
                .with_field("status", json!(status))
            }
            Err(err) => ProbeResult::new(
                self.name(),
                ProbeStatus::Fail,
                format!("GET {endpoint} failed: {err}"),
            ),
        }
    }
}

pub struct MapsReachabilityProbe {
    maps_api_key: Option<String>,
    endpoint: Option<String>,
    timeout: Duration,
}

impl MapsReachabilityProbe {
    pub fn new(maps_api_key: Option<String>) -> Self {
        Self {
            maps_api_key,
            endpoint: None,
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

impl Probe for MapsReachabilityProbe {
    fn name(&self) -> &str {
        "maps_reachability"
    }

    fn run(&self) -> ProbeResult {
        let Some(key) = self.maps_api_key.as_deref() else {
            return ProbeResult::new(self.name(), ProbeStatus::Skipped, "no maps API key");
        };
        let source = match StaticMapSource::new(key, self.timeout) {
            Ok(source) => match &self.endpoint {
                Some(endpoint) => source.with_endpoint(endpoint.clone()),
                None => source,
            },
            Err(err) => return ProbeResult::new(self.name(), ProbeStatus::Fail, format!("{err:#}")),
        };
        let probe_location = match Location::new(0.0, 0.0, "") {
            Ok(location) => location,
            Err(err) => return ProbeResult::new(self.name(), ProbeStatus::Fail, format!("{err:#}")),
        };
        match source.fetch(&probe_location) {
            Ok(image) => ProbeResult::new(
                self.name(),
                ProbeStatus::Pass,
                format!("static map returned {} bytes of {}", image.bytes.len(), image.mime),
            ),
            Err(err) => ProbeResult::new(self.name(), ProbeStatus::Fail, format!("{err:#}")),
        }
    }
}

pub struct ManifestProbe {
    resolver: GeneratorResolver,
}

impl ManifestProbe {
    pub fn new(resolver: GeneratorResolver) -> Self {
        Self { resolver }
    }
}

impl Probe for ManifestProbe {
    fn name(&self) -> &str {
        "manifest"
    }

    fn run(&self) -> ProbeResult {
        let mut origins = Map::new();
        let mut missing = Vec::new();
        let mut fallbacks = Vec::new();
        for image_type in ImageType::ALL {
            match self.resolver.resolve(image_type) {
                Ok(resolved) => {
                    if resolved.origin != ConfigOrigin::Manifest {
                        fallbacks.push(image_type.label());
                    }
                    origins.insert(
                        image_type.slug().to_string(),
                        json!({
                            "origin": resolved.origin.as_str(),
                            "model": resolved.config.model,
                        }),
                    );
                }
                Err(message) => {
                    missing.push(message.clone());
                    origins.insert(image_type.slug().to_string(), json!({"error": message}));
                }
            }
        }

        let (status, detail) = if !missing.is_empty() {
            (ProbeStatus::Fail, missing.join("; "))
        } else if !fallbacks.is_empty() {
            (
                ProbeStatus::Warn,
                format!("not configured by the manifest: {}", fallbacks.join(", ")),
            )
        } else {
            (
                ProbeStatus::Pass,
                format!("{} generators configured", self.resolver.manifest().len()),
            )
        };
        ProbeResult::new(self.name(), status, detail).with_field("types", Value::Object(origins))
    }
}
