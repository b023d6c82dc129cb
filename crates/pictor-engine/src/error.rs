use pictor_contracts::config::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Precondition(String),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("No images returned from API")]
    EmptyResult,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("API returned an unreadable payload: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Validation(_) => "validation",
            GenerationError::Precondition(_) => "precondition",
            GenerationError::Api { .. } => "api",
            GenerationError::EmptyResult => "empty_result",
            GenerationError::Transport(_) => "transport",
            GenerationError::InvalidResponse(_) => "invalid_response",
        }
    }

    /// Failures detected before anything was sent.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            GenerationError::Validation(_) | GenerationError::Precondition(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaskError {
    #[error("no image loaded into the mask editor")]
    NotReady,
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("could not encode image: {0}")]
    Encode(String),
}
