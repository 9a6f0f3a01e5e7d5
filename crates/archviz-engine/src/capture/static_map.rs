use std::time::Duration;

use anyhow::{bail, Context, Result};
use archviz_contracts::location::Location;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;

use crate::backend::truncate_text;

pub const STATIC_MAP_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/staticmap";
const DEFAULT_ZOOM: u8 = 18;
const DEFAULT_SIZE: &str = "640x640";
const DEFAULT_MAPTYPE: &str = "satellite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

pub trait MapImageSource: Send + Sync {
    fn name(&self) -> &str;
    fn fetch(&self, location: &Location) -> Result<MapImage>;
}

pub struct StaticMapSource {
    endpoint: String,
    api_key: String,
    zoom: u8,
    size: String,
    maptype: String,
    http: HttpClient,
}

impl StaticMapSource {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed building static map HTTP client")?;
        Ok(Self {
            endpoint: STATIC_MAP_ENDPOINT.to_string(),
            api_key: api_key.into(),
            zoom: DEFAULT_ZOOM,
            size: DEFAULT_SIZE.to_string(),
            maptype: DEFAULT_MAPTYPE.to_string(),
            http,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn request_url(&self, location: &Location) -> Result<Url> {
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("center", format!("{:.6},{:.6}", location.lat, location.lng)),
                ("zoom", self.zoom.to_string()),
                ("size", self.size.clone()),
                ("maptype", self.maptype.clone()),
                ("key", self.api_key.clone()),
            ],
        )
        .with_context(|| format!("invalid static map endpoint '{}'", self.endpoint))
    }
}

impl MapImageSource for StaticMapSource {
    fn name(&self) -> &str {
        "static_map"
    }

    fn fetch(&self, location: &Location) -> Result<MapImage> {
        let url = self.request_url(location)?;
        let response = self
            .http
            .get(url)
            .send()
            .context("static map request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!(
                "static map request failed ({}): {}",
                status.as_u16(),
                truncate_text(body.trim(), 256)
            );
        }
        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "image/png".to_string());
        if !mime.starts_with("image/") {
            bail!("static map returned non-image content type '{mime}'");
        }
        let bytes = response
            .bytes()
            .context("failed reading static map bytes")?
            .to_vec();
        if bytes.is_empty() {
            bail!("static map returned an empty body");
        }
        Ok(MapImage { mime, bytes })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use archviz_contracts::location::Location;

    use super::{MapImageSource, StaticMapSource};
    use crate::test_http::{refused_origin, serve_once};

    fn origin_source(origin: &str) -> anyhow::Result<StaticMapSource> {
        Ok(StaticMapSource::new("maps-key", Duration::from_secs(2))?
            .with_endpoint(format!("{origin}/maps/api/staticmap")))
    }

    #[test]
    fn request_url_carries_center_zoom_and_key() -> anyhow::Result<()> {
        let source = StaticMapSource::new("maps-key", Duration::from_secs(5))?.with_zoom(17);
        let url = source.request_url(&Location::new(35.6812, 139.6712, "Tokyo Station")?)?;
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        assert_eq!(url.host_str(), Some("maps.googleapis.com"));
        assert!(query.contains(&("center".to_string(), "35.681200,139.671200".to_string())));
        assert!(query.contains(&("zoom".to_string(), "17".to_string())));
        assert!(query.contains(&("maptype".to_string(), "satellite".to_string())));
        assert!(query.contains(&("key".to_string(), "maps-key".to_string())));
        Ok(())
    }

    #[test]
    fn image_body_becomes_map_image_with_header_mime() -> anyhow::Result<()> {
        let (origin, handle) =
            serve_once("HTTP/1.1 200 OK", "image/jpeg; charset=binary", b"\xFF\xD8\xFF")?;
        let image = origin_source(&origin)?.fetch(&Location::new(35.6812, 139.6712, "Tokyo")?)?;
        let raw_request = handle.join().unwrap_or_default();

        assert_eq!(image.mime, "image/jpeg");
        assert_eq!(image.bytes, vec![0xFF, 0xD8, 0xFF]);
        assert!(raw_request.starts_with("GET /maps/api/staticmap?center=35.681200%2C139.671200"));
        Ok(())
    }

    #[test]
    fn non_2xx_status_is_an_error() -> anyhow::Result<()> {
        let (origin, handle) = serve_once(
            "HTTP/1.1 403 Forbidden",
            "application/json",
            br#"{"error_message":"REQUEST_DENIED"}"#,
        )?;
        let err = origin_source(&origin)?
            .fetch(&Location::new(0.0, 0.0, "")?)
            .err()
            .map(|err| format!("{err:#}"))
            .unwrap_or_default();
        let _ = handle.join();
        assert!(err.contains("(403)"), "{err}");
        assert!(err.contains("REQUEST_DENIED"), "{err}");
        Ok(())
    }

    #[test]
    fn non_image_content_type_is_an_error() -> anyhow::Result<()> {
        let (origin, handle) = serve_once("HTTP/1.1 200 OK", "text/html", b"<html></html>")?;
        let err = origin_source(&origin)?
            .fetch(&Location::new(0.0, 0.0, "")?)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        let _ = handle.join();
        assert!(err.contains("non-image content type 'text/html'"), "{err}");
        Ok(())
    }

    #[test]
    fn empty_body_is_an_error() -> anyhow::Result<()> {
        let (origin, handle) = serve_once("HTTP/1.1 200 OK", "image/png", b"")?;
        let err = origin_source(&origin)?
            .fetch(&Location::new(0.0, 0.0, "")?)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        let _ = handle.join();
        assert!(err.contains("empty body"), "{err}");
        Ok(())
    }

    #[test]
    fn refused_connection_is_an_error() -> anyhow::Result<()> {
        let source = origin_source(&refused_origin()?)?;
        assert!(source.fetch(&Location::new(0.0, 0.0, "nowhere")?).is_err());
        Ok(())
    }
}
