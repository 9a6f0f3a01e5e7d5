mod placeholder;
mod procedural;
mod static_map;

use std::fmt;

use archviz_contracts::location::Location;
use archviz_contracts::log::Logger;
use archviz_contracts::log_fields;

use crate::datauri;

pub use placeholder::{placeholder_data_uri, placeholder_svg, SVG_MIME};
pub use procedural::{
    plan_terrain, procedural_data_uri, render_terrain, seed_for, Feature, FeatureKind,
    SeededRandom, TerrainPlan, CANVAS_EDGE,
};
pub use static_map::{MapImage, MapImageSource, StaticMapSource, STATIC_MAP_ENDPOINT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    StaticMap,
    Procedural,
    Placeholder,
}

impl CaptureSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureSource::StaticMap => "static_map",
            CaptureSource::Procedural => "procedural",
            CaptureSource::Placeholder => "placeholder",
        }
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedMap {
    pub data_uri: String,
    pub source: CaptureSource,
}

pub struct MapCapture {
    source: Option<Box<dyn MapImageSource>>,
    logger: Logger,
}

impl MapCapture {
    pub fn new(source: Option<Box<dyn MapImageSource>>, logger: Logger) -> Self {
        Self { source, logger }
    }

    pub fn offline(logger: Logger) -> Self {
        Self::new(None, logger)
    }

    pub fn capture(&self, location: &Location) -> CapturedMap {
        self.capture_with(location, procedural_data_uri)
    }

    fn capture_with(
        &self,
        location: &Location,
        procedural: impl Fn(&Location) -> anyhow::Result<String>,
    ) -> CapturedMap {
        match &self.source {
            Some(source) => match source.fetch(location) {
                Ok(image) => {
                    self.logger.info(
                        "capture",
                        "capture_finished",
                        log_fields! {
                            "source": CaptureSource::StaticMap.as_str(),
                            "provider": source.name(),
                            "mime": image.mime,
                            "bytes": image.bytes.len(),
                        },
                    );
                    return CapturedMap {
                        data_uri: datauri::encode(&image.mime, &image.bytes),
                        source: CaptureSource::StaticMap,
                    };
                }
                Err(err) => self.logger.warn(
                    "capture",
                    "static_map_failed",
                    log_fields! {
                        "provider": source.name(),
                        "error": format!("{err:#}"),
                    },
                ),
            },
            None => self.logger.debug(
                "capture",
                "static_map_skipped",
                log_fields! { "reason": "no map image source configured" },
            ),
        }

        match procedural(location) {
            Ok(data_uri) => {
                self.logger.info(
                    "capture",
                    "capture_finished",
                    log_fields! {
                        "source": CaptureSource::Procedural.as_str(),
                        "seed": seed_for(location),
                    },
                );
                CapturedMap {
                    data_uri,
                    source: CaptureSource::Procedural,
                }
            }
            Err(err) => {
                self.logger.warn(
                    "capture",
                    "procedural_failed",
                    log_fields! { "error": format!("{err:#}") },
                );
                CapturedMap {
                    data_uri: placeholder_data_uri(location),
                    source: CaptureSource::Placeholder,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use archviz_contracts::location::Location;
    use archviz_contracts::log::{Logger, MemorySink};

    use super::{
        procedural_data_uri, CaptureSource, MapCapture, MapImage, MapImageSource,
    };

    struct FixedSource;

    impl MapImageSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        fn fetch(&self, _location: &Location) -> anyhow::Result<MapImage> {
            Ok(MapImage {
                mime: "image/jpeg".to_string(),
                bytes: vec![0xFF, 0xD8, 0xFF],
            })
        }
    }

    struct FailingSource;

    impl MapImageSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        fn fetch(&self, _location: &Location) -> anyhow::Result<MapImage> {
            bail!("static map request failed (403): REQUEST_DENIED")
        }
    }

    fn tokyo() -> anyhow::Result<Location> {
        Location::new(35.6812, 139.6712, "Tokyo Station")
    }

    #[test]
    fn upstream_image_wins_when_available() -> anyhow::Result<()> {
        let capture = MapCapture::new(Some(Box::new(FixedSource)), Logger::new());
        let captured = capture.capture(&tokyo()?);
        assert_eq!(captured.source, CaptureSource::StaticMap);
        assert_eq!(captured.data_uri, "data:image/jpeg;base64,/9j/");
        Ok(())
    }

    #[test]
    fn failed_upstream_degrades_to_deterministic_procedural() -> anyhow::Result<()> {
        let sink = MemorySink::new();
        let capture = MapCapture::new(
            Some(Box::new(FailingSource)),
            Logger::new().with_sink(sink.clone()),
        );
        let first = capture.capture(&tokyo()?);
        let second = capture.capture(&tokyo()?);

        assert_eq!(first.source, CaptureSource::Procedural);
        assert_eq!(first, second);
        assert_eq!(first.data_uri, procedural_data_uri(&tokyo()?)?);
        assert!(sink
            .messages("capture")
            .contains(&"static_map_failed".to_string()));
        Ok(())
    }

    #[test]
    fn total_failure_yields_placeholder() -> anyhow::Result<()> {
        let capture = MapCapture::offline(Logger::new());
        let captured = capture.capture_with(&tokyo()?, |_| bail!("canvas unavailable"));
        assert_eq!(captured.source, CaptureSource::Placeholder);
        assert!(captured.data_uri.starts_with("data:image/svg+xml;base64,"));
        Ok(())
    }

    #[test]
    fn offline_capture_starts_at_procedural_tier() -> anyhow::Result<()> {
        let captured = MapCapture::offline(Logger::new()).capture(&tokyo()?);
        assert_eq!(captured.source, CaptureSource::Procedural);
        Ok(())
    }
}
