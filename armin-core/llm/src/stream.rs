//! Cancellable, single-pass consumption of a streamed completion.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{ChatStream, GenerationError, Source, dedup_sources};

/// One step of a streamed completion.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamStep {
    /// New text, in arrival order
    Delta(String),
    /// Upstream ended normally
    Finished,
    /// The cancel token fired; upstream has been dropped
    Cancelled,
    Failed(GenerationError),
}

/// Accumulated result of a finished stream
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub sources: Vec<Source>,
}

/// A finite, non-restartable sequence of text deltas.
///
/// Once a terminal step (`Finished`, `Cancelled`, `Failed`) has been
/// returned the upstream is released and every later call repeats
/// `Finished` without producing text.
pub struct CompletionStream {
    upstream: Option<ChatStream>,
    text: String,
    sources: Vec<Source>,
}

impl CompletionStream {
    pub fn new(upstream: ChatStream) -> Self {
        Self {
            upstream: Some(upstream),
            text: String::new(),
            sources: Vec::new(),
        }
    }

    /// Wait for the next step, giving `cancel` priority over pending data.
    pub async fn next_step(&mut self, cancel: &CancellationToken) -> StreamStep {
        loop {
            let Some(upstream) = self.upstream.as_mut() else {
                return StreamStep::Finished;
            };

            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Completion stream cancelled");
                    self.upstream = None;
                    return StreamStep::Cancelled;
                }
                item = upstream.next() => item,
            };

            match item {
                None => {
                    self.upstream = None;
                    return StreamStep::Finished;
                }
                Some(Ok(chunk)) => {
                    self.sources.extend(chunk.sources.iter().cloned());
                    let text = chunk.get_text();
                    if text.is_empty() {
                        continue;
                    }
                    self.text.push_str(&text);
                    return StreamStep::Delta(text);
                }
                Some(Err(error)) => {
                    self.upstream = None;
                    return StreamStep::Failed(error);
                }
            }
        }
    }

    /// Text received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_completion(self) -> Completion {
        Completion {
            text: self.text,
            sources: dedup_sources(self.sources),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChatChunk, ChatPayload};
    use futures::stream;

    fn chunk(text: &str) -> Result<ChatChunk, GenerationError> {
        Ok(ChatChunk::assistant(ChatPayload::text(text)))
    }

    #[tokio::test]
    async fn test_deltas_in_order_then_finished() {
        let upstream = stream::iter(vec![chunk("Hel"), chunk(""), chunk("lo")]);
        let mut stream = CompletionStream::new(Box::pin(upstream));
        let cancel = CancellationToken::new();

        assert_eq!(stream.next_step(&cancel).await, StreamStep::Delta("Hel".into()));
        assert_eq!(stream.next_step(&cancel).await, StreamStep::Delta("lo".into()));
        assert_eq!(stream.next_step(&cancel).await, StreamStep::Finished);
        assert_eq!(stream.next_step(&cancel).await, StreamStep::Finished);
        assert_eq!(stream.into_completion().text, "Hello");
    }

    #[tokio::test]
    async fn test_cancel_wins_over_ready_data() {
        let upstream = stream::iter(vec![chunk("a"), chunk("b")]);
        let mut stream = CompletionStream::new(Box::pin(upstream));
        let cancel = CancellationToken::new();

        assert_eq!(stream.next_step(&cancel).await, StreamStep::Delta("a".into()));
        cancel.cancel();
        assert_eq!(stream.next_step(&cancel).await, StreamStep::Cancelled);
        assert_eq!(stream.next_step(&cancel).await, StreamStep::Finished);
        assert_eq!(stream.text(), "a");
    }

    #[tokio::test]
    async fn test_failure_ends_stream() {
        let upstream = stream::iter(vec![chunk("a"), Err(GenerationError::SafetyBlocked), chunk("b")]);
        let mut stream = CompletionStream::new(Box::pin(upstream));
        let cancel = CancellationToken::new();

        stream.next_step(&cancel).await;
        assert_eq!(
            stream.next_step(&cancel).await,
            StreamStep::Failed(GenerationError::SafetyBlocked)
        );
        assert_eq!(stream.next_step(&cancel).await, StreamStep::Finished);
        assert_eq!(stream.text(), "a");
    }

    #[tokio::test]
    async fn test_sources_deduplicated_at_completion() {
        let with_sources = |text: &str, sources: Vec<Source>| -> Result<ChatChunk, GenerationError> {
            Ok(ChatChunk::assistant(ChatPayload::text(text)).with_sources(sources))
        };
        let upstream = stream::iter(vec![
            with_sources("x", vec![Source::new("a", "X")]),
            with_sources("", vec![Source::new("a", "Y"), Source::new("b", "Z")]),
        ]);
        let mut stream = CompletionStream::new(Box::pin(upstream));
        let cancel = CancellationToken::new();
        while stream.next_step(&cancel).await != StreamStep::Finished {}

        let completion = stream.into_completion();
        assert_eq!(
            completion.sources,
            vec![Source::new("a", "X"), Source::new("b", "Z")]
        );
    }
}
