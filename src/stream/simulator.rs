use std::time::Duration;

use crate::protocol::canonical::{CanonicalRole, CanonicalStopReason, CanonicalStreamEvent, CanonicalUsage, IngressApi};

use super::processor::CanonicalEventEncoder;
use super::Writer;

/// Deterministic chunk-size cycle (words per chunk), 3..=6. No randomness in
/// boundaries — only the inter-chunk delay is jittered.
const CHUNK_SIZES: [usize; 4] = [3, 4, 5, 6];

/// Replays a cached response as a synthetic stream: word-group chunks with
/// realistic inter-chunk delays, framed through the same encoder used for
/// live upstream traffic so cached and live responses are
/// byte-for-byte-indistinguishable on the wire.
pub struct StreamSimulator {
    encoder: CanonicalEventEncoder,
    delay_min_ms: u64,
    delay_max_ms: u64,
}

impl StreamSimulator {
    #[must_use]
    pub fn new(ingress: IngressApi, model: String, response_id: String, delay_min_ms: u64, delay_max_ms: u64) -> Self {
        Self {
            encoder: CanonicalEventEncoder::new(ingress, model, response_id),
            delay_min_ms,
            delay_max_ms,
        }
    }

    /// Drives `writer` through the full synthetic stream. Caller closes the
    /// writer afterward, same as the live pipeline orchestrator.
    pub async fn run(
        mut self,
        text: &str,
        stop_reason: CanonicalStopReason,
        usage: CanonicalUsage,
        writer: &mut dyn Writer,
    ) -> Result<(), crate::error::CanonicalError> {
        self.emit(CanonicalStreamEvent::MessageStart { role: CanonicalRole::Assistant }, writer)
            .await?;

        for (index, chunk) in word_groups(text).enumerate() {
            if index > 0 {
                let delay = fastrand::u64(self.delay_min_ms..=self.delay_max_ms);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            self.emit(CanonicalStreamEvent::TextDelta(chunk), writer).await?;
        }

        self.emit(CanonicalStreamEvent::Usage(usage), writer).await?;
        self.emit(CanonicalStreamEvent::MessageEnd { stop_reason }, writer).await?;
        self.emit(CanonicalStreamEvent::Done, writer).await
    }

    async fn emit(&mut self, event: CanonicalStreamEvent, writer: &mut dyn Writer) -> Result<(), crate::error::CanonicalError> {
        let mut out = String::new();
        self.encoder.encode(&event, &mut out);
        if !out.is_empty() {
            writer.write(bytes::Bytes::from(out.into_bytes())).await?;
            writer.flush().await?;
        }
        Ok(())
    }
}

/// Groups words into chunks of deterministically-cycling size (3..=6),
/// preserving the original whitespace between words within a chunk.
fn word_groups(text: &str) -> impl Iterator<Item = String> + '_ {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut position = 0usize;
    let mut cycle = 0usize;
    std::iter::from_fn(move || {
        if position >= words.len() {
            return None;
        }
        let size = CHUNK_SIZES[cycle % CHUNK_SIZES.len()];
        cycle += 1;
        let end = (position + size).min(words.len());
        let chunk = words[position..end].join(" ");
        position = end;
        Some(if position < words.len() { format!("{chunk} ") } else { chunk })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_groups_covers_all_words() {
        let text = "the quick brown fox jumps over the lazy dog and then some more words follow";
        let total: usize = word_groups(text).map(|chunk| chunk.split_whitespace().count()).sum();
        assert_eq!(total, text.split_whitespace().count());
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert_eq!(word_groups("").count(), 0);
    }
}
