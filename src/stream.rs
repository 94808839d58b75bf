//! Pull-based view over a streaming generation.
//!
//! Each `stream_text` call spawns one background worker that pushes
//! [`StreamEvent`]s into a bounded channel; the [`StreamIterator`] is the
//! consumer end. Delta events appear zero or more times in arbitrary
//! interleaving, then exactly one terminal event (`MessageDone` or `Error`),
//! then the channel closes. A cancelled stream closes without a terminal
//! event; nothing is delivered after cancellation completes.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::entities::{StopReason, Usage};
use crate::providers::ProviderError;

/// Bound on the worker-to-consumer event channel. A consumer that stops
/// pulling blocks the worker (backpressure) instead of dropping events.
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

/// One unit of a generation stream, normalized across vendors.
#[derive(Debug)]
pub enum StreamEvent {
    /// A fragment of assistant text.
    ContentDelta { text: String },
    /// A fragment of a tool call. `id`/`name` arrive on the first fragment
    /// for a given index; later fragments extend the arguments JSON.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },
    /// Terminal: the generation finished, with final accounting.
    MessageDone {
        usage: Usage,
        stop_reason: StopReason,
    },
    /// Terminal: the stream broke mid-flight.
    Error { error: ProviderError },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::MessageDone { .. } | StreamEvent::Error { .. }
        )
    }
}

/// Consumer handle for a streaming generation.
///
/// Owns the event channel and the cancellation token for the worker that
/// feeds it. Dropping the iterator cancels the worker.
pub struct StreamIterator {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
}

impl StreamIterator {
    pub(crate) fn new(rx: mpsc::Receiver<StreamEvent>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Wait for the next event. `None` means the channel is closed and no
    /// more events will ever arrive.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Stop the stream early. Idempotent; the only sanctioned way to end a
    /// stream before its terminal event. The worker observes the token at
    /// its next suspension point, exits, and closes the channel.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the rest of the stream into a list. Mostly for tests and
    /// short responses.
    pub async fn collect_events(mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Some(ev) = self.next().await {
            out.push(ev);
        }
        out
    }
}

impl futures_util::Stream for StreamIterator {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for StreamIterator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (mpsc::Sender<StreamEvent>, StreamIterator) {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        (tx, StreamIterator::new(rx, CancellationToken::new()))
    }

    #[tokio::test]
    async fn yields_events_then_none_after_close() {
        let (tx, mut iter) = pair();
        tx.send(StreamEvent::ContentDelta { text: "Hel".into() })
            .await
            .unwrap();
        tx.send(StreamEvent::ContentDelta { text: "lo".into() })
            .await
            .unwrap();
        tx.send(StreamEvent::MessageDone {
            usage: Usage::default(),
            stop_reason: StopReason::EndTurn,
        })
        .await
        .unwrap();
        drop(tx);

        assert!(matches!(
            iter.next().await,
            Some(StreamEvent::ContentDelta { text }) if text == "Hel"
        ));
        assert!(matches!(
            iter.next().await,
            Some(StreamEvent::ContentDelta { text }) if text == "lo"
        ));
        assert!(matches!(
            iter.next().await,
            Some(StreamEvent::MessageDone { stop_reason: StopReason::EndTurn, .. })
        ));
        assert!(iter.next().await.is_none());
        assert!(iter.next().await.is_none());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_unblocks_worker() {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let worker_token = cancel.clone();
        let worker = tokio::spawn(async move {
            // Worker parks on the token the way an adapter pump does
            // between vendor chunks.
            worker_token.cancelled().await;
            drop(tx);
        });

        let mut iter = StreamIterator::new(rx, cancel);
        iter.cancel();
        iter.cancel();
        iter.cancel();

        assert!(iter.next().await.is_none());
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn drop_cancels_worker() {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let worker_token = cancel.clone();
        let worker = tokio::spawn(async move {
            worker_token.cancelled().await;
            drop(tx);
        });

        drop(StreamIterator::new(rx, cancel));
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn works_as_futures_stream() {
        use futures_util::StreamExt;

        let (tx, iter) = pair();
        tx.send(StreamEvent::ContentDelta { text: "a".into() })
            .await
            .unwrap();
        drop(tx);

        let events: Vec<_> = iter.collect().await;
        assert_eq!(events.len(), 1);
    }
}
