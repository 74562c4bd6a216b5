//! Generation client with the two-tier instruction strategy.

use std::sync::Arc;

use mane_contracts::catalog;
use mane_contracts::payload::ImagePayload;

use crate::error::EngineError;
use crate::transport::{call_with_retry, image_from_response, ModelTransport, RetryPolicy};

/// Turns one source photo plus an instruction into one generated image.
///
/// When the primary instruction is refused (text instead of an image, the
/// usual safety-filter symptom) a softened templated instruction gets one
/// more try before the failure is surfaced.
pub struct GenerationClient {
    transport: Arc<dyn ModelTransport>,
    policy: RetryPolicy,
}

impl GenerationClient {
    pub fn new(transport: Arc<dyn ModelTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn generate(
        &self,
        source: &ImagePayload,
        instruction: &str,
        fallback_label: &str,
        category: &str,
    ) -> Result<ImagePayload, EngineError> {
        match self.attempt(source, instruction) {
            Ok(image) => Ok(image),
            Err(EngineError::NoImageReturned { detail }) => {
                if fallback_label.trim().is_empty() || category.trim().is_empty() {
                    return Err(EngineError::NoImageReturned { detail });
                }
                let fallback = catalog::fallback_instruction(fallback_label, category);
                self.attempt(source, &fallback)
                    .map_err(|err| EngineError::GenerationFailed(err.to_string()))
            }
            Err(err) => Err(EngineError::GenerationFailed(err.to_string())),
        }
    }

    /// One instruction tier: a retried transport call plus image extraction.
    fn attempt(&self, source: &ImagePayload, instruction: &str) -> Result<ImagePayload, EngineError> {
        let response = call_with_retry(self.transport.as_ref(), self.policy, source, instruction)?;
        image_from_response(response)
    }
}
