use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use anyhow::Context;
use archviz_contracts::config::StudioSettings;
use archviz_contracts::log::Logger;
use archviz_contracts::log_fields;
use image::{ImageFormat, Rgba, RgbaImage};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::datauri;
use crate::error::GenerationError;

const ERROR_BODY_MAX_CHARS: usize = 512;
const DRYRUN_MAX_EDGE: u32 = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageGenerationRequest {
    pub model: String,
    pub prompt: String,
    pub response_format: String,
    pub size: String,
    pub n: Option<u32>,
}

impl ImageGenerationRequest {
    pub fn payload(&self) -> Value {
        let mut payload = json!({
            "model": self.model,
            "prompt": self.prompt,
            "response_format": self.response_format,
            "size": self.size,
        });
        if let (Some(n), Some(obj)) = (self.n, payload.as_object_mut()) {
            obj.insert("n".to_string(), json!(n));
        }
        payload
    }
}

pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &ImageGenerationRequest) -> Result<String, GenerationError>;
}

#[derive(Default)]
pub struct ImageBackendRegistry {
    backends: BTreeMap<String, Arc<dyn ImageBackend>>,
}

impl ImageBackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: ImageBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Arc::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub fn default_backend_registry(
    settings: &StudioSettings,
    logger: &Logger,
) -> anyhow::Result<ImageBackendRegistry> {
    let mut backends = ImageBackendRegistry::new();
    backends.register(DryrunBackend);
    backends.register(HttpImageBackend::new(settings, logger.clone())?);
    Ok(backends)
}

pub struct HttpImageBackend {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
    logger: Logger,
}

impl HttpImageBackend {
    pub fn new(settings: &StudioSettings, logger: Logger) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("failed building HTTP client")?;
        Ok(Self {
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            http,
            logger,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/images/generations", self.api_base)
    }
}

impl ImageBackend for HttpImageBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn generate(&self, request: &ImageGenerationRequest) -> Result<String, GenerationError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(GenerationError::MissingApiKey);
        };
        let endpoint = self.endpoint();
        self.logger.debug(
            "http",
            "image_request",
            log_fields! {
                "endpoint": endpoint,
                "model": request.model,
                "size": request.size,
                "response_format": request.response_format,
                "prompt_chars": request.prompt.chars().count(),
            },
        );

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(&request.payload())
            .send()?;
        let status = response.status().as_u16();
        let body = response.text()?;

        let parsed_for_log = serde_json::from_str::<Value>(&body)
            .map(|value| sanitize_payload(&value))
            .unwrap_or_else(|_| Value::String(truncate_text(&body, 256)));
        self.logger.debug(
            "http",
            "image_response",
            log_fields! {
                "endpoint": endpoint,
                "status": status,
                "body_bytes": body.len(),
                "body": parsed_for_log,
            },
        );

        parse_generation_response(status, &body)
    }
}

pub fn parse_generation_response(status: u16, body: &str) -> Result<String, GenerationError> {
    if !(200..300).contains(&status) {
        return Err(GenerationError::Http {
            status,
            message: error_message_from_body(body),
        });
    }

    let parsed: Value = serde_json::from_str(body).map_err(|_| {
        GenerationError::InvalidResponse("response body is not JSON".to_string())
    })?;
    let first = parsed
        .get("data")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(Value::as_object);
    let Some(first) = first else {
        return Err(GenerationError::InvalidResponse(
            "response has no data[0] entry".to_string(),
        ));
    };

    if let Some(b64) = non_empty_str(first.get("b64_json")) {
        return Ok(datauri::png_from_base64(b64));
    }
    if let Some(url) = non_empty_str(first.get("url")) {
        return Ok(url.to_string());
    }
    Err(GenerationError::InvalidResponse(
        "data[0] has neither b64_json nor url".to_string(),
    ))
}

pub fn error_message_from_body(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        let error = parsed.get("error");
        let message = error
            .and_then(|error| non_empty_str(error.get("message")))
            .or_else(|| non_empty_str(error))
            .or_else(|| non_empty_str(parsed.get("message")));
        if let Some(message) = message {
            let code = error.and_then(|error| error.get("code")).and_then(|code| match code {
                Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            });
            return match code {
                Some(code) => format!("{message} (code {code})"),
                None => message.to_string(),
            };
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    truncate_text(trimmed, ERROR_BODY_MAX_CHARS)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(lowered.as_str(), "b64_json" | "image" | "image_bytes") {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunBackend;

impl ImageBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ImageGenerationRequest) -> Result<String, GenerationError> {
        let (width, height) = parse_dims(&request.size);
        let (r, g, b) = color_from_prompt(&request.prompt, &request.model);
        let image = RgbaImage::from_pixel(width, height, Rgba([r, g, b, 255]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| {
                GenerationError::InvalidResponse(format!("dryrun encode failed: {err}"))
            })?;
        Ok(datauri::encode(datauri::PNG_MIME, &bytes))
    }
}

fn parse_dims(size: &str) -> (u32, u32) {
    let mut parts = size.split('x');
    let width = parts.next().and_then(|value| value.trim().parse::<u32>().ok());
    let height = parts.next().and_then(|value| value.trim().parse::<u32>().ok());
    match (width, height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => (
            width.min(DRYRUN_MAX_EDGE),
            height.min(DRYRUN_MAX_EDGE),
        ),
        _ => (256, 256),
    }
}

fn color_from_prompt(prompt: &str, model: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(model.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use archviz_contracts::config::StudioSettings;
    use archviz_contracts::log::{Logger, MemorySink};
    use serde_json::json;

    use super::{
        error_message_from_body, parse_dims, parse_generation_response, sanitize_payload,
        DryrunBackend, HttpImageBackend, ImageBackend, ImageGenerationRequest,
    };
    use crate::datauri;
    use crate::error::GenerationError;
    use crate::test_http::{refused_origin, serve_once};

    const JSON: &str = "application/json";

    fn request() -> ImageGenerationRequest {
        ImageGenerationRequest {
            model: "nano-banana".to_string(),
            prompt: "Create a precise 3D isometric rendering".to_string(),
            response_format: "b64_json".to_string(),
            size: "1024x1024".to_string(),
            n: None,
        }
    }

    #[test]
    fn payload_includes_n_only_when_set() {
        let mut req = request();
        assert!(req.payload().get("n").is_none());
        req.n = Some(2);
        assert_eq!(req.payload()["n"], json!(2));
        assert_eq!(req.payload()["response_format"], json!("b64_json"));
    }

    #[test]
    fn success_prefers_base64_over_url() {
        let body = r#"{"data":[{"b64_json":"QUJD","url":"https://cdn/x.png"}]}"#;
        assert_eq!(
            parse_generation_response(200, body),
            Ok("data:image/png;base64,QUJD".to_string())
        );
    }

    #[test]
    fn success_falls_back_to_hosted_url() {
        let body = r#"{"data":[{"url":"https://cdn/x.png"}]}"#;
        assert_eq!(
            parse_generation_response(200, body),
            Ok("https://cdn/x.png".to_string())
        );
    }

    #[test]
    fn neither_b64_nor_url_is_invalid_response_format() {
        let err = parse_generation_response(200, r#"{"data":[{"revised_prompt":"x"}]}"#)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("invalid response format"), "{err}");

        let empty = parse_generation_response(200, r#"{"data":[{"b64_json":""}]}"#);
        assert!(matches!(empty, Err(GenerationError::InvalidResponse(_))));
        let no_data = parse_generation_response(200, r#"{"created":1}"#);
        assert!(matches!(no_data, Err(GenerationError::InvalidResponse(_))));
        let not_json = parse_generation_response(200, "<html>");
        assert!(matches!(not_json, Err(GenerationError::InvalidResponse(_))));
    }

    #[test]
    fn non_2xx_parses_error_body() {
        let err = parse_generation_response(
            401,
            r#"{"error":{"message":"Invalid credentials","code":40101}}"#,
        );
        assert_eq!(
            err,
            Err(GenerationError::Http {
                status: 401,
                message: "Invalid credentials (code 40101)".to_string(),
            })
        );
    }

    #[test]
    fn error_body_falls_back_to_raw_text() {
        assert_eq!(error_message_from_body("Bad Gateway"), "Bad Gateway");
        assert_eq!(error_message_from_body(""), "empty response body");
        assert_eq!(error_message_from_body(r#"{"error":"quota"}"#), "quota");
        assert_eq!(error_message_from_body(r#"{"message":"slow down"}"#), "slow down");
        let long = "x".repeat(600);
        assert_eq!(error_message_from_body(&long).chars().count(), 513);
    }

    #[test]
    fn sanitize_omits_inline_images() {
        let cleaned = sanitize_payload(&json!({"data":[{"b64_json":"QUJD","url":"u"}]}));
        assert_eq!(cleaned["data"][0]["b64_json"], json!("<omitted>"));
        assert_eq!(cleaned["data"][0]["url"], json!("u"));
    }

    #[test]
    fn dryrun_is_deterministic_png() -> anyhow::Result<()> {
        let first = DryrunBackend.generate(&request())?;
        let second = DryrunBackend.generate(&request())?;
        assert_eq!(first, second);
        let (mime, bytes) = datauri::decode(&first)?;
        assert_eq!(mime, "image/png");
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (512, 512));
        Ok(())
    }

    #[test]
    fn dims_are_clamped_and_defaulted() {
        assert_eq!(parse_dims("64x32"), (64, 32));
        assert_eq!(parse_dims("4096x4096"), (512, 512));
        assert_eq!(parse_dims("auto"), (256, 256));
    }

    #[test]
    fn http_backend_without_key_fails_before_network() -> anyhow::Result<()> {
        let backend = HttpImageBackend::new(&StudioSettings::default(), Logger::new())?;
        assert_eq!(
            backend.generate(&request()),
            Err(GenerationError::MissingApiKey)
        );
        Ok(())
    }

    #[test]
    fn http_backend_posts_bearer_json_and_parses_image() -> anyhow::Result<()> {
        let (origin, handle) =
            serve_once("HTTP/1.1 200 OK", JSON, br#"{"data":[{"b64_json":"QUJD"}]}"#)?;
        let settings = StudioSettings {
            api_base: format!("{origin}/v1"),
            api_key: Some("sk-test-key".to_string()),
            ..StudioSettings::default()
        };
        let sink = MemorySink::new();
        let backend = HttpImageBackend::new(&settings, Logger::new().with_sink(sink.clone()))?;

        let image = backend.generate(&request())?;
        let raw_request = handle.join().unwrap_or_default();

        assert_eq!(image, "data:image/png;base64,QUJD");
        assert!(raw_request.starts_with("POST /v1/images/generations"), "{raw_request}");
        assert!(raw_request.to_ascii_lowercase().contains("authorization: bearer sk-test-key"));
        assert!(raw_request.contains(r#""model":"nano-banana""#));
        assert_eq!(
            sink.messages("http"),
            vec!["image_request".to_string(), "image_response".to_string()]
        );
        Ok(())
    }

    #[test]
    fn http_backend_surfaces_upstream_error() -> anyhow::Result<()> {
        let (origin, handle) = serve_once(
            "HTTP/1.1 401 Unauthorized",
            JSON,
            br#"{"error":{"message":"Invalid credentials","code":40101}}"#,
        )?;
        let settings = StudioSettings {
            api_base: format!("{origin}/v1"),
            api_key: Some("sk-bad".to_string()),
            ..StudioSettings::default()
        };
        let backend = HttpImageBackend::new(&settings, Logger::new())?;
        let err = backend.generate(&request()).err();
        let _ = handle.join();

        assert_eq!(err.as_ref().and_then(GenerationError::status), Some(401));
        assert!(err
            .map(|err| err.to_string())
            .unwrap_or_default()
            .contains("Invalid credentials"));
        Ok(())
    }

    #[test]
    fn refused_connection_is_a_network_error() -> anyhow::Result<()> {
        let settings = StudioSettings {
            api_base: format!("{}/v1", refused_origin()?),
            api_key: Some("sk-test-key".to_string()),
            request_timeout: Duration::from_secs(2),
            ..StudioSettings::default()
        };
        let backend = HttpImageBackend::new(&settings, Logger::new())?;
        let err = backend.generate(&request()).err();
        assert!(matches!(err, Some(GenerationError::Network(_))), "{err:?}");
        assert_eq!(err.map(|err| err.kind()), Some("network"));
        Ok(())
    }
}
