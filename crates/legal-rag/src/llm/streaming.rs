//! Streaming response handling for LLM generation

use anyhow::Result;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Token stream for streaming generation. A failed generation yields one
/// `Err` item and then ends.
pub struct TokenStream {
    receiver: mpsc::Receiver<Result<String>>,
}

impl TokenStream {
    pub fn new(receiver: mpsc::Receiver<Result<String>>) -> Self {
        Self { receiver }
    }

    /// A stream over already generated fragments.
    pub fn from_fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let fragments: Vec<String> = fragments.into_iter().collect();
        let (tx, rx) = mpsc::channel(fragments.len().max(1));
        for fragment in fragments {
            // capacity covers every fragment
            let _ = tx.try_send(Ok(fragment));
        }
        Self::new(rx)
    }

    /// Get next token
    pub async fn next(&mut self) -> Option<Result<String>> {
        self.receiver.recv().await
    }

    /// Collect all tokens into a string
    pub async fn collect(mut self) -> Result<String> {
        let mut result = String::new();
        while let Some(token) = self.next().await {
            result.push_str(&token?);
        }
        Ok(result)
    }
}

impl Stream for TokenStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
