//! Single-pass stream of generated text fragments.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::core::errors::ApiError;

const STREAM_BUFFER: usize = 32;

pub type Fragment = Result<String, ApiError>;

/// Fragments arrive in generation order and the stream ends when the producer
/// finishes. Dropping the stream closes the channel, which stops the producer
/// at its next send.
pub struct TextStream {
    rx: mpsc::Receiver<Fragment>,
}

impl TextStream {
    pub fn channel() -> (mpsc::Sender<Fragment>, TextStream) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        (tx, TextStream { rx })
    }

    /// A stream that is already complete, e.g. a canned reply.
    pub fn from_fragments<I>(fragments: I) -> TextStream
    where
        I: IntoIterator<Item = String>,
    {
        let fragments: Vec<String> = fragments.into_iter().collect();
        let (tx, rx) = mpsc::channel(fragments.len().max(1));
        for fragment in fragments {
            // capacity covers every fragment
            let _ = tx.try_send(Ok(fragment));
        }
        TextStream { rx }
    }

    pub async fn next_fragment(&mut self) -> Option<Fragment> {
        self.rx.recv().await
    }

    /// Drains the stream into one string, stopping at the first error.
    pub async fn collect_text(mut self) -> Result<String, ApiError> {
        let mut text = String::new();
        while let Some(fragment) = self.next_fragment().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Stream for TextStream {
    type Item = Fragment;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
