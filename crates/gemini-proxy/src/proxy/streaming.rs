//! SSE streaming passthrough with tee functionality
//!
//! This module provides streaming proxy capabilities that:
//! - Forward upstream chunks to the client as soon as they arrive
//! - Accumulate the same chunks for the post-stream interaction record
//! - Report how the stream ended (exhausted, upstream failure, client gone)

use bytes::{Bytes, BytesMut};
use futures::stream::Stream;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Result of teeing a stream - provides both the forwarding stream and a handle to get buffered content
pub struct TeeResult<S> {
    /// Stream to forward to client (yields original chunks unchanged)
    pub client_stream: TeeStream<S>,
    /// Handle to retrieve buffered content after stream completes
    pub buffer_handle: BufferHandle,
}

/// How a teed stream stopped producing chunks
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEnd {
    /// Upstream was read to the end
    Completed,
    /// Upstream yielded an error
    Failed(String),
    /// The client side dropped the stream before it ended
    Abandoned,
}

/// Everything the client was sent, plus how the stream ended
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedStream {
    pub body: Bytes,
    pub end: StreamEnd,
}

/// Handle to retrieve buffered stream content after completion
pub struct BufferHandle {
    receiver: oneshot::Receiver<BufferedStream>,
}

impl BufferHandle {
    /// Wait for the stream to end and take the accumulated bytes
    pub async fn finished(self) -> BufferedStream {
        self.receiver.await.unwrap_or(BufferedStream {
            body: Bytes::new(),
            end: StreamEnd::Abandoned,
        })
    }
}

/// A stream wrapper that buffers all chunks while forwarding them
///
/// Chunks are appended in the same poll that hands them to the client, so
/// the buffer always matches what was relayed, in order.
pub struct TeeStream<S> {
    inner: Pin<Box<S>>,
    buffer: BytesMut,
    sender: Option<oneshot::Sender<BufferedStream>>,
}

impl<S> TeeStream<S> {
    fn finish(&mut self, end: StreamEnd) {
        if let Some(sender) = self.sender.take() {
            let body = std::mem::take(&mut self.buffer).freeze();
            let _ = sender.send(BufferedStream { body, end });
        }
    }
}

impl<S, E> Stream for TeeStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                this.buffer.extend_from_slice(&bytes);
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(StreamEnd::Failed(e.to_string()));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(StreamEnd::Completed);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for TeeStream<S> {
    fn drop(&mut self) {
        self.finish(StreamEnd::Abandoned);
    }
}

/// SSE streaming proxy functionality
pub struct StreamingProxy;

impl StreamingProxy {
    /// Tee an incoming stream - forwards all chunks to client while buffering for the record
    ///
    /// # Returns
    /// A `TeeResult` containing:
    /// - `client_stream` - Forward this to the client response
    /// - `buffer_handle` - Resolves once the stream ends or is dropped
    pub fn tee_stream<S, E>(incoming: S) -> TeeResult<S>
    where
        S: Stream<Item = Result<Bytes, E>>,
    {
        let (tx, rx) = oneshot::channel();

        let tee_stream = TeeStream {
            inner: Box::pin(incoming),
            buffer: BytesMut::new(),
            sender: Some(tx),
        };

        TeeResult {
            client_stream: tee_stream,
            buffer_handle: BufferHandle { receiver: rx },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};

    #[tokio::test]
    async fn test_tee_stream_buffers_content() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from("data: {\"a\":1}\n\n")),
            Ok(Bytes::from("data: {\"b\":2}\n\n")),
            Ok(Bytes::from("data: [DONE]\n\n")),
        ];

        let TeeResult {
            mut client_stream,
            buffer_handle,
        } = StreamingProxy::tee_stream(stream::iter(chunks));

        let mut forwarded = Vec::new();
        while let Some(chunk) = client_stream.next().await {
            forwarded.extend_from_slice(&chunk.unwrap());
        }

        let buffered = buffer_handle.finished().await;

        assert_eq!(buffered.end, StreamEnd::Completed);
        assert_eq!(buffered.body, Bytes::from(forwarded));
        assert!(String::from_utf8_lossy(&buffered.body).contains("data: [DONE]"));
    }

    #[tokio::test]
    async fn test_tee_stream_forwards_immediately() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(10);

        let incoming = tokio_stream::wrappers::ReceiverStream::new(rx);
        let TeeResult {
            mut client_stream,
            buffer_handle,
        } = StreamingProxy::tee_stream(incoming);

        tx.send(Ok(Bytes::from("chunk1"))).await.unwrap();

        let first = client_stream.next().await;
        assert_eq!(first.unwrap().unwrap(), Bytes::from("chunk1"));

        tx.send(Ok(Bytes::from("chunk2"))).await.unwrap();
        let second = client_stream.next().await;
        assert_eq!(second.unwrap().unwrap(), Bytes::from("chunk2"));

        drop(tx);

        let end = client_stream.next().await;
        assert!(end.is_none());

        let buffered = buffer_handle.finished().await;
        assert_eq!(buffered.body, Bytes::from("chunk1chunk2"));
        assert_eq!(buffered.end, StreamEnd::Completed);
    }

    #[tokio::test]
    async fn test_tee_stream_reports_upstream_error() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from("partial")),
            Err(std::io::Error::other("connection reset")),
        ];

        let TeeResult {
            mut client_stream,
            buffer_handle,
        } = StreamingProxy::tee_stream(stream::iter(chunks));

        assert!(client_stream.next().await.unwrap().is_ok());
        assert!(client_stream.next().await.unwrap().is_err());
        drop(client_stream);

        let buffered = buffer_handle.finished().await;
        assert_eq!(buffered.body, Bytes::from("partial"));
        assert_eq!(buffered.end, StreamEnd::Failed("connection reset".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_stream_is_abandoned_with_partial_body() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(10);
        let TeeResult {
            mut client_stream,
            buffer_handle,
        } = StreamingProxy::tee_stream(tokio_stream::wrappers::ReceiverStream::new(rx));

        tx.send(Ok(Bytes::from("first"))).await.unwrap();
        client_stream.next().await.unwrap().unwrap();
        drop(client_stream);

        let buffered = buffer_handle.finished().await;
        assert_eq!(buffered.body, Bytes::from("first"));
        assert_eq!(buffered.end, StreamEnd::Abandoned);
        assert!(tx.is_closed());
    }
}
