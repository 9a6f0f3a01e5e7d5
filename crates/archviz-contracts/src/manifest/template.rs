use std::fmt;

use anyhow::bail;

use crate::location::Location;

pub const TEMPLATE_VARIABLES: &[&str] = &[
    "building_type",
    "address",
    "scale",
    "dimensions",
    "location_context",
    "lat",
    "lng",
];

const DEFAULT_BUILDING_TYPE: &str = "building";
const DEFAULT_SCALE: &str = "1:200";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(&'static str),
}

/// A `${var}` template compiled at manifest load time. Rendering is pure.
#[derive(Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn compile(source: &str) -> anyhow::Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(start) = rest.find("${") {
            literal.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                let offset = source.len() - rest.len() + start;
                bail!("unterminated '${{' in prompt template at byte {offset}");
            };
            let name = after[..end].trim();
            let Some(known) = TEMPLATE_VARIABLES.iter().find(|known| **known == name) else {
                bail!(
                    "unknown template variable '{name}' (known: {})",
                    TEMPLATE_VARIABLES.join(", ")
                );
            };
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Variable(known));
            rest = &after[end + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn variables(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        for segment in &self.segments {
            if let Segment::Variable(name) = segment {
                if !names.contains(name) {
                    names.push(*name);
                }
            }
        }
        names
    }

    pub fn render(&self, vars: &TemplateVars) -> String {
        let mut out = String::with_capacity(self.source.len() + 64);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => out.push_str(&vars.value(name)),
            }
        }
        out
    }
}

impl fmt::Debug for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PromptTemplate").field(&self.source).finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateVars {
    pub building_type: Option<String>,
    pub address: String,
    pub scale: Option<String>,
    pub dimensions: Option<String>,
    pub location_context: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl TemplateVars {
    pub fn from_location(location: &Location) -> Self {
        Self {
            address: location.address.clone(),
            lat: Some(location.lat),
            lng: Some(location.lng),
            location_context: Some(format!(
                "{} ({:.6}, {:.6})",
                location.address, location.lat, location.lng
            )),
            ..Self::default()
        }
    }

    pub fn value(&self, name: &str) -> String {
        match name {
            "building_type" => self
                .building_type
                .clone()
                .unwrap_or_else(|| DEFAULT_BUILDING_TYPE.to_string()),
            "address" => self.address.clone(),
            "scale" => self
                .scale
                .clone()
                .unwrap_or_else(|| DEFAULT_SCALE.to_string()),
            "dimensions" => self.dimensions.clone().unwrap_or_default(),
            "location_context" => self.location_context.clone().unwrap_or_default(),
            "lat" => self.lat.map(|lat| format!("{lat:.6}")).unwrap_or_default(),
            "lng" => self.lng.map(|lng| format!("{lng:.6}")).unwrap_or_default(),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PromptTemplate, TemplateVars};
    use crate::location::Location;

    #[test]
    fn renders_variables_and_defaults() -> anyhow::Result<()> {
        let template = PromptTemplate::compile(
            "Create a ${building_type} at ${address}, scale ${scale}, cost $5.",
        )?;
        let vars = TemplateVars {
            address: "Tokyo Station".to_string(),
            ..TemplateVars::default()
        };
        assert_eq!(
            template.render(&vars),
            "Create a building at Tokyo Station, scale 1:200, cost $5."
        );
        assert_eq!(template.variables(), vec!["building_type", "address", "scale"]);
        Ok(())
    }

    #[test]
    fn from_location_fills_context() -> anyhow::Result<()> {
        let location = Location::new(35.6812, 139.6712, "Tokyo Station")?;
        let template = PromptTemplate::compile("${location_context} / ${lat},${lng}")?;
        assert_eq!(
            template.render(&TemplateVars::from_location(&location)),
            "Tokyo Station (35.681200, 139.671200) / 35.681200,139.671200"
        );
        Ok(())
    }

    #[test]
    fn unknown_variable_is_a_compile_error() {
        let err = PromptTemplate::compile("Draw ${colour}")
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("unknown template variable 'colour'"), "{err}");
    }

    #[test]
    fn unterminated_placeholder_is_a_compile_error() {
        assert!(PromptTemplate::compile("Draw ${address").is_err());
    }

    #[test]
    fn template_without_placeholders_renders_verbatim() -> anyhow::Result<()> {
        let template = PromptTemplate::compile("A plain prompt")?;
        assert_eq!(template.render(&TemplateVars::default()), "A plain prompt");
        assert!(template.variables().is_empty());
        Ok(())
    }
}
