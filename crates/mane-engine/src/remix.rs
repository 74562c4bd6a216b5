//! One-shot remix of an already-generated image. No fallback tier.

use std::sync::Arc;

use mane_contracts::payload::ImagePayload;

use crate::error::EngineError;
use crate::transport::{call_with_retry, image_from_response, ModelTransport, RetryPolicy};

pub struct RemixClient {
    transport: Arc<dyn ModelTransport>,
    policy: RetryPolicy,
}

impl RemixClient {
    pub fn new(transport: Arc<dyn ModelTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn remix(
        &self,
        source: &ImagePayload,
        instruction: &str,
    ) -> Result<ImagePayload, EngineError> {
        call_with_retry(self.transport.as_ref(), self.policy, source, instruction)
            .and_then(image_from_response)
            .map_err(|err| EngineError::RemixFailed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::RemixClient;
    use crate::error::EngineError;
    use crate::transport::tests::{image_reply, source_image, text_reply, ScriptedTransport};
    use crate::transport::RetryPolicy;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> RemixClient {
        RemixClient::new(transport, fast_policy())
    }

    #[test]
    fn remix_returns_the_new_image() {
        let transport = Arc::new(ScriptedTransport::new([Ok(image_reply("cmVtaXhlZA=="))]));
        let client = client(Arc::clone(&transport));

        let image = client
            .remix(&source_image(), "add sunglasses")
            .expect("succeeds");

        assert_eq!(image.data, "cmVtaXhlZA==");
        let instructions = transport.instructions.lock().expect("lock").clone();
        assert_eq!(instructions, vec!["add sunglasses".to_string()]);
    }

    #[test]
    fn refusals_are_wrapped_as_remix_failures_without_fallback() {
        let transport = Arc::new(ScriptedTransport::new([Ok(text_reply("Not doing that."))]));
        let client = client(Arc::clone(&transport));

        let err = client
            .remix(&source_image(), "add sunglasses")
            .expect_err("fails");

        assert_eq!(transport.calls(), 1);
        match err {
            EngineError::RemixFailed(message) => assert!(message.contains("Not doing that.")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn transient_faults_still_use_the_retry_budget() {
        let transport = Arc::new(ScriptedTransport::new([
            Err(EngineError::TransientServer("503".to_string())),
            Ok(image_reply("cmVtaXhlZA==")),
        ]));
        let client = client(Arc::clone(&transport));

        let image = client
            .remix(&source_image(), "add sunglasses")
            .expect("succeeds");
        assert_eq!(image.data, "cmVtaXhlZA==");
        assert_eq!(transport.calls(), 2);
    }
}
