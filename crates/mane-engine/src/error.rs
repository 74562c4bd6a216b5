use mane_contracts::payload::PayloadError;
use thiserror::Error;

/// Failure classes the orchestration logic branches on.
///
/// Only `TransientServer` is eligible for transport retry, and only
/// `NoImageReturned` triggers the generation client's fallback tier.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidImage(#[from] PayloadError),

    /// The remote service signaled an internal fault (5xx, timeout, or a
    /// connection-level failure).
    #[error("model service fault: {0}")]
    TransientServer(String),

    /// Rejected request or malformed reply; retrying will not help.
    #[error("model request failed: {0}")]
    Request(String),

    /// The model replied without image content, commonly a safety refusal
    /// expressed as prose.
    #[error("model returned text instead of an image: {}", .detail.as_deref().unwrap_or("no detail returned"))]
    NoImageReturned { detail: Option<String> },

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("remix failed: {0}")]
    RemixFailed(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientServer(_))
    }
}

#[cfg(test)]
mod tests {
    use super::EngineError;

    #[test]
    fn only_server_faults_are_transient() {
        assert!(EngineError::TransientServer("502".to_string()).is_transient());
        assert!(!EngineError::Request("400".to_string()).is_transient());
        assert!(!EngineError::NoImageReturned { detail: None }.is_transient());
    }

    #[test]
    fn no_image_message_carries_the_model_text() {
        let err = EngineError::NoImageReturned {
            detail: Some("I can't edit this photo.".to_string()),
        };
        assert!(err.to_string().contains("I can't edit this photo."));

        let bare = EngineError::NoImageReturned { detail: None };
        assert!(bare.to_string().contains("no detail returned"));
    }
}
