use std::sync::Arc;
use std::thread;
use std::time::Instant;

use archviz_contracts::config::StudioSettings;
use archviz_contracts::location::{GeneratedImages, ImageType, Location};
use archviz_contracts::log::Logger;
use archviz_contracts::log_fields;
use archviz_contracts::manifest::{GeneratorResolver, TemplateVars};

use crate::backend::{ImageBackend, ImageGenerationRequest};
use crate::board::{SlotBoard, SlotState};
use crate::error::GenerationError;

pub struct Studio {
    location: Location,
    vars: TemplateVars,
    resolver: GeneratorResolver,
    backend: Arc<dyn ImageBackend>,
    settings: StudioSettings,
    board: SlotBoard,
    logger: Logger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub image_type: ImageType,
    pub result: Result<String, GenerationError>,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub steps: Vec<StepOutcome>,
}

impl GenerationReport {
    pub fn succeeded(&self) -> usize {
        self.steps.iter().filter(|step| step.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.steps.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

impl Studio {
    pub fn new(
        location: Location,
        resolver: GeneratorResolver,
        backend: Arc<dyn ImageBackend>,
        settings: StudioSettings,
        logger: Logger,
    ) -> Self {
        let vars = TemplateVars::from_location(&location);
        Self {
            location,
            vars,
            resolver,
            backend,
            settings,
            board: SlotBoard::new(),
            logger,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn set_location(&mut self, location: Location) {
        let from_location = TemplateVars::from_location(&location);
        self.vars.address = from_location.address;
        self.vars.lat = from_location.lat;
        self.vars.lng = from_location.lng;
        self.vars.location_context = from_location.location_context;
        self.location = location;
        self.board.reset();
        self.logger.info(
            "studio",
            "location_changed",
            log_fields! {
                "lat": self.location.lat,
                "lng": self.location.lng,
                "address": self.location.address,
            },
        );
    }

    pub fn vars(&self) -> &TemplateVars {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut TemplateVars {
        &mut self.vars
    }

    pub fn resolver(&self) -> &GeneratorResolver {
        &self.resolver
    }

    pub fn board(&self) -> &SlotBoard {
        &self.board
    }

    pub fn images(&self) -> GeneratedImages {
        self.board.images()
    }

    pub fn state(&self, image_type: ImageType) -> SlotState {
        self.board.state(image_type)
    }

    pub fn generate(&self, image_type: ImageType) -> Result<String, GenerationError> {
        let claim = self.board.try_begin(image_type)?;

        let resolved = match self.resolver.resolve(image_type) {
            Ok(resolved) => resolved,
            Err(message) => {
                let err = GenerationError::ConfigMissing(message);
                self.logger.error(
                    "generation",
                    "generation_failed",
                    log_fields! {
                        "image_type": image_type.slug(),
                        "error_kind": err.kind(),
                        "error": err.to_string(),
                    },
                );
                claim.fail(err.to_string());
                return Err(err);
            }
        };
        if let Some(reason) = &resolved.fallback_reason {
            self.logger.warn(
                "generation",
                "config_fallback",
                log_fields! {
                    "image_type": image_type.slug(),
                    "config_origin": resolved.origin.as_str(),
                    "reason": reason,
                },
            );
        }

        let request = ImageGenerationRequest {
            model: resolved.config.model.clone(),
            prompt: resolved.render_prompt(&self.vars),
            response_format: resolved.config.response_format.clone(),
            size: resolved
                .config
                .size
                .clone()
                .unwrap_or_else(|| self.settings.image_size.clone()),
            n: resolved.config.n,
        };
        self.logger.info(
            "generation",
            "generation_started",
            log_fields! {
                "image_type": image_type.slug(),
                "model": request.model,
                "config_origin": resolved.origin.as_str(),
                "backend": self.backend.name(),
                "size": request.size,
            },
        );

        let started = Instant::now();
        let outcome = self.backend.generate(&request);
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(image) => {
                self.logger.info(
                    "generation",
                    "generation_succeeded",
                    log_fields! {
                        "image_type": image_type.slug(),
                        "model": request.model,
                        "config_origin": resolved.origin.as_str(),
                        "latency_ms": latency_ms,
                        "inline": image.starts_with("data:"),
                    },
                );
                claim.succeed(image.clone());
                Ok(image)
            }
            Err(err) => {
                self.logger.error(
                    "generation",
                    "generation_failed",
                    log_fields! {
                        "image_type": image_type.slug(),
                        "model": request.model,
                        "config_origin": resolved.origin.as_str(),
                        "latency_ms": latency_ms,
                        "error_kind": err.kind(),
                        "status": err.status(),
                        "error": err.to_string(),
                    },
                );
                claim.fail(err.to_string());
                Err(err)
            }
        }
    }

    pub fn generate_all(&self) -> GenerationReport {
        self.generate_types(&ImageType::ALL)
    }

    pub fn generate_types(&self, image_types: &[ImageType]) -> GenerationReport {
        let mut report = GenerationReport::default();
        for (index, image_type) in image_types.iter().copied().enumerate() {
            let result = self.generate(image_type);
            report.steps.push(StepOutcome { image_type, result });
            let more = index + 1 < image_types.len();
            if more && !self.settings.step_delay.is_zero() {
                thread::sleep(self.settings.step_delay);
            }
        }
        self.logger.info(
            "generation",
            "generation_batch_finished",
            log_fields! {
                "requested": image_types.iter().map(|t| t.slug()).collect::<Vec<_>>(),
                "succeeded": report.succeeded(),
                "failed": report.failed(),
            },
        );
        report
    }
}
