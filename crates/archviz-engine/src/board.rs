use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use archviz_contracts::location::{GeneratedImages, ImageType};
use serde::Serialize;

use crate::error::GenerationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SlotState {
    Idle,
    Generating,
    Succeeded(String),
    Failed(String),
}

impl SlotState {
    pub fn is_generating(&self) -> bool {
        matches!(self, SlotState::Generating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Idle => "idle",
            SlotState::Generating => "generating",
            SlotState::Succeeded(_) => "succeeded",
            SlotState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Default)]
struct BoardInner {
    slots: BTreeMap<ImageType, SlotState>,
    images: GeneratedImages,
}

impl BoardInner {
    fn slot(&self, image_type: ImageType) -> SlotState {
        self.slots
            .get(&image_type)
            .cloned()
            .unwrap_or(SlotState::Idle)
    }
}

/// Cloning shares the same board. At most one claim per type is live at a time.
#[derive(Debug, Clone, Default)]
pub struct SlotBoard {
    inner: Arc<Mutex<BoardInner>>,
}

impl SlotBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BoardInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn try_begin(&self, image_type: ImageType) -> Result<SlotClaim, GenerationError> {
        let mut inner = self.lock();
        if inner.slot(image_type).is_generating() {
            return Err(GenerationError::AlreadyGenerating(image_type));
        }
        inner.slots.insert(image_type, SlotState::Generating);
        Ok(SlotClaim {
            board: self.clone(),
            image_type,
            done: false,
        })
    }

    pub fn state(&self, image_type: ImageType) -> SlotState {
        self.lock().slot(image_type)
    }

    pub fn images(&self) -> GeneratedImages {
        self.lock().images.clone()
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        let generating: Vec<ImageType> = inner
            .slots
            .iter()
            .filter(|(_, state)| state.is_generating())
            .map(|(image_type, _)| *image_type)
            .collect();
        inner.slots.clear();
        inner.images = GeneratedImages::default();
        for image_type in generating {
            inner.slots.insert(image_type, SlotState::Generating);
        }
    }

    pub fn snapshot(&self) -> Vec<(ImageType, SlotState)> {
        let inner = self.lock();
        ImageType::ALL
            .iter()
            .map(|image_type| (*image_type, inner.slot(*image_type)))
            .collect()
    }

    fn finish(&self, image_type: ImageType, state: SlotState) {
        let mut inner = self.lock();
        let image = match &state {
            SlotState::Succeeded(image) => Some(image.clone()),
            _ => None,
        };
        inner.images.set(image_type, image);
        inner.slots.insert(image_type, state);
    }
}

#[derive(Debug)]
pub struct SlotClaim {
    board: SlotBoard,
    image_type: ImageType,
    done: bool,
}

impl SlotClaim {
    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn succeed(mut self, image: String) {
        self.done = true;
        self.board
            .finish(self.image_type, SlotState::Succeeded(image));
    }

    pub fn fail(mut self, message: impl Into<String>) {
        self.done = true;
        self.board
            .finish(self.image_type, SlotState::Failed(message.into()));
    }
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        if !self.done {
            self.board
                .finish(self.image_type, SlotState::Failed("abandoned".to_string()));
        }
    }
}
