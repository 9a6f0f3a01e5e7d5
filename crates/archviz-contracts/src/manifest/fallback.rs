use anyhow::Context;

use super::{GenerationConfig, PromptTemplate};
use crate::location::ImageType;

pub const FALLBACK_MODEL: &str = "nano-banana";
pub const FALLBACK_RESPONSE_FORMAT: &str = "b64_json";

const ISOMETRIC_PROMPT: &str = "Create a precise 3D isometric architectural rendering of the \
    ${building_type} at ${address}. Clean white background, 30-degree isometric projection, \
    accurate massing and roof geometry, subtle ambient occlusion, scale ${scale}. \
    ${dimensions} Context: ${location_context}.";

const HOLOGRAM_PROMPT: &str = "Create a futuristic holographic projection of the \
    ${building_type} at ${address}. Glowing cyan wireframe edges on a dark background, \
    translucent floors, floating data labels, scanline shimmer. ${dimensions} \
    Context: ${location_context}.";

const LINE_DRAWING_PROMPT: &str = "Create a clean architectural line drawing of the \
    ${building_type} at ${address}. Black ink on white paper, orthographic elevation with \
    construction lines, hatching for depth, dimension annotations at scale ${scale}. \
    ${dimensions} Context: ${location_context}.";

pub fn fallback_config(image_type: ImageType) -> anyhow::Result<GenerationConfig> {
    let source = match image_type {
        ImageType::Isometric => ISOMETRIC_PROMPT,
        ImageType::Hologram => HOLOGRAM_PROMPT,
        ImageType::LineDrawing => LINE_DRAWING_PROMPT,
    };
    let prompt_template = PromptTemplate::compile(source)
        .with_context(|| format!("built-in {image_type} template is invalid"))?;
    Ok(GenerationConfig {
        model: FALLBACK_MODEL.to_string(),
        prompt_template,
        response_format: FALLBACK_RESPONSE_FORMAT.to_string(),
        n: None,
        size: None,
    })
}

#[cfg(test)]
mod tests {
    use super::{fallback_config, FALLBACK_MODEL};
    use crate::location::ImageType;
    use crate::manifest::PromptTemplate;

    #[test]
    fn every_builtin_template_compiles() -> anyhow::Result<()> {
        for image_type in ImageType::ALL {
            let config = fallback_config(image_type)?;
            PromptTemplate::compile(config.prompt_template.source())?;
            assert_eq!(config.model, FALLBACK_MODEL);
            assert!(!config.prompt_template.variables().is_empty());
        }
        Ok(())
    }
}
