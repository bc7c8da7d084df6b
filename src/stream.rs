//! Cancellable answer fragment stream.
//!
//! A [`FragmentStream`] is the lazily-produced sequence of answer fragments
//! returned by the chat client and passed through the orchestrator
//! untouched. It is finite, ordered, and can be consumed only once.
//!
//! Cancellation is explicit: [`FragmentStream::cancel`] (or any clone of the
//! token from [`FragmentStream::cancellation_token`]) ends the stream at the
//! next poll, and dropping the stream cancels it as well. Producers select
//! on the same token so an in-flight provider read is abandoned promptly.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{BoxStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// One incremental piece of generated text.
pub type AnswerFragment = String;

pub struct FragmentStream {
    inner: BoxStream<'static, Result<AnswerFragment>>,
    cancel: CancellationToken,
    finished: bool,
}

impl FragmentStream {
    /// Wrap a producer. The producer should watch `cancel` and stop reading
    /// from its source once it fires.
    pub fn new<S>(inner: S, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = Result<AnswerFragment>> + Send + 'static,
    {
        Self {
            inner: inner.boxed(),
            cancel,
            finished: false,
        }
    }

    /// A stream over already-known fragments. Useful for fakes and tests.
    pub fn from_fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = AnswerFragment>,
        I::IntoIter: Send + 'static,
    {
        Self::new(
            futures_util::stream::iter(fragments.into_iter().map(Ok)),
            CancellationToken::new(),
        )
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the stream. Fragments already yielded are not retracted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drain the stream into the full answer text, stopping at the first
    /// error.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Stream for FragmentStream {
    type Item = Result<AnswerFragment>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished || this.cancel.is_cancelled() {
            this.finished = true;
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            // An error ends the sequence; nothing follows a terminal failure.
            Poll::Ready(Some(Err(err))) => {
                this.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            other => other,
        }
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("finished", &self.finished)
            .finish()
    }
}
