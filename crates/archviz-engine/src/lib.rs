pub mod backend;
pub mod board;
pub mod capture;
pub mod datauri;
pub mod diagnostics;
pub mod error;
pub mod manifest_source;
pub mod studio;

#[cfg(test)]
mod test_http;

use uuid::Uuid;

pub use backend::{
    default_backend_registry, DryrunBackend, HttpImageBackend, ImageBackend,
    ImageBackendRegistry, ImageGenerationRequest,
};
pub use board::{SlotBoard, SlotClaim, SlotState};
pub use capture::{CaptureSource, CapturedMap, MapCapture, MapImageSource, StaticMapSource};
pub use diagnostics::{DiagnosticsBundle, DiagnosticsReport, Probe, ProbeResult, ProbeStatus};
pub use error::GenerationError;
pub use manifest_source::load_manifest;
pub use studio::{GenerationReport, StepOutcome, Studio};

pub fn new_session_id() -> String {
    format!("session-{}", Uuid::new_v4().simple())
}
