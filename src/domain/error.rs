use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    /// Caller-supplied input rejected before any write.
    #[error("invalid input: {message}")]
    Validation { message: String },
    /// An assembled snapshot refers to an entity it does not carry.
    #[error("snapshot reference broken: {message}")]
    Invariant { message: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}
