use crate::error::CanonicalError;

use super::{Processor, Reader, Writer};

/// Outcome of draining a pipeline to completion. `Complete` and
/// `ClientDisconnected` are expected terminations, not failures: neither is
/// logged as an error by the caller.
#[derive(Debug)]
pub enum PipelineOutcome {
    Complete,
    ClientDisconnected,
    Failed(CanonicalError),
}

/// Drives `read -> process -> write -> flush` until EOF, disconnect, or
/// failure. Always closes the reader and writer on exit.
pub async fn run_pipeline(
    mut reader: Box<dyn Reader>,
    mut processor: Box<dyn Processor>,
    mut writer: Box<dyn Writer>,
) -> PipelineOutcome {
    let outcome = loop {
        let chunk = match reader.read().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break PipelineOutcome::Complete,
            Err(err) => break PipelineOutcome::Failed(err),
        };

        let processed = match processor.process(chunk).await {
            Ok(bytes) => bytes,
            Err(err) => break PipelineOutcome::Failed(err),
        };

        if processed.is_empty() {
            continue;
        }

        if let Err(err) = writer.write(processed).await {
            break classify_write_error(err);
        }

        if let Err(err) = writer.flush().await {
            break classify_write_error(err);
        }
    };

    reader.close().await;
    writer.close().await;
    outcome
}

fn classify_write_error(err: CanonicalError) -> PipelineOutcome {
    match &err {
        CanonicalError::Transport(message) if message.contains("disconnect") => PipelineOutcome::ClientDisconnected,
        _ => PipelineOutcome::Failed(err),
    }
}
