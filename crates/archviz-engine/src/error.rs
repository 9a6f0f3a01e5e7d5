use archviz_contracts::location::ImageType;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("{0}")]
    ConfigMissing(String),
    #[error("API key not configured (set ARCHVIZ_API_KEY or OPENAI_API_KEY)")]
    MissingApiKey,
    #[error("upstream request failed ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("invalid response format: {0}")]
    InvalidResponse(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("{0} generation already in progress")]
    AlreadyGenerating(ImageType),
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::ConfigMissing(_) => "config_missing",
            GenerationError::MissingApiKey => "missing_api_key",
            GenerationError::Http { .. } => "http",
            GenerationError::InvalidResponse(_) => "invalid_response",
            GenerationError::Network(_) => "network",
            GenerationError::AlreadyGenerating(_) => "already_generating",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GenerationError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        let mut text = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            let cause_text = cause.to_string();
            if !text.contains(&cause_text) {
                text.push_str(" | caused by: ");
                text.push_str(&cause_text);
            }
            source = cause.source();
        }
        GenerationError::Network(text)
    }
}

#[cfg(test)]
mod tests {
    use archviz_contracts::location::ImageType;

    use super::GenerationError;

    #[test]
    fn display_carries_status_and_message() {
        let err = GenerationError::Http {
            status: 401,
            message: "Invalid credentials (code 40101)".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "upstream request failed (401): Invalid credentials (code 40101)"
        );
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.kind(), "http");
    }

    #[test]
    fn already_generating_names_the_type() {
        let err = GenerationError::AlreadyGenerating(ImageType::LineDrawing);
        assert_eq!(err.to_string(), "line-drawing generation already in progress");
    }
}
