use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    /// A request field is missing or out of range.
    #[error("invalid training job spec: {field}: {reason}")]
    InvalidSpec { field: String, reason: String },
}

impl TrainingError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec { field: field.into(), reason: reason.into() }
    }

    /// The offending field.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::InvalidSpec { field, .. } => field,
        }
    }
}
