pub mod orchestrator;
pub mod processor;
pub mod reader;
pub mod simulator;
pub mod sse;
pub mod writer;

pub use orchestrator::{run_pipeline, PipelineOutcome};
pub use processor::{CanonicalEventEncoder, PassthroughProcessor, Processor, TranscodingProcessor};
pub use reader::{Reader, UpstreamReader};
pub use simulator::StreamSimulator;
pub use writer::{ChunkedWriter, ConnectionState};

/// A single parsed SSE frame: event name (if any), data payload, id, retry.
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}
