pub mod error;
pub mod generate;
pub mod orchestrator;
pub mod remix;
pub mod transport;

pub use error::EngineError;
pub use generate::GenerationClient;
pub use orchestrator::{Orchestrator, RunHandle, DEFAULT_WORKERS};
pub use remix::RemixClient;
pub use transport::{
    call_with_retry, HttpTransport, ModelResponse, ModelTransport, RetryPolicy, DEFAULT_MODEL,
};
