//! Per-request output streams.
//!
//! Each tracked request owns one single-producer single-consumer channel of
//! result increments. The tracker holds the [`StreamSender`] write half and
//! enforces the exactly-once terminal marker; callers poll the
//! [`OutputStream`] read half, immediately or long after the request already
//! finished.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use flume::r#async::RecvStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// One element of a request's output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem<O> {
    /// An incremental result produced by the engine.
    Output(O),
    /// Terminal marker. Nothing follows it.
    Done(StreamEnd),
}

/// Reason why a stream terminated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEnd {
    /// The engine delivered an output flagged as final.
    Completed,
    /// The request was aborted before completing.
    Cancelled,
    /// The tracker tore the request down after an engine fault.
    Error(String),
}

/// Build the two halves of a request's output stream.
pub(crate) fn channel<O: 'static>(request_id: String) -> (StreamSender<O>, OutputStream<O>) {
    let (tx, rx) = flume::unbounded();
    let finished = Arc::new(AtomicBool::new(false));
    let sender = StreamSender {
        tx,
        finished: finished.clone(),
    };
    let stream = OutputStream {
        request_id,
        rx: rx.into_stream(),
        finished,
        stopped: false,
    };
    (sender, stream)
}

/// Write half, held by the tracker. Appends never block: the underlying
/// channel is unbounded and a reader that went away only means the buffered
/// items are dropped on the floor.
pub(crate) struct StreamSender<O> {
    tx: flume::Sender<StreamItem<O>>,
    finished: Arc<AtomicBool>,
}

impl<O> StreamSender<O> {
    /// Append one output. Returns false if the stream already terminated,
    /// in which case nothing is written.
    pub(crate) fn append(&self, output: O) -> bool {
        if self.finished.load(Ordering::Acquire) {
            return false;
        }
        let _ = self.tx.send(StreamItem::Output(output));
        true
    }

    /// Terminate the stream. Only the first call per stream writes the
    /// marker; later calls return false and change nothing.
    pub(crate) fn finish(&self, end: StreamEnd) -> bool {
        if self.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.tx.send(StreamItem::Done(end));
        true
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Read half of a request's output stream.
///
/// Yields every appended output in write order, then exactly one
/// [`StreamItem::Done`], then ends. Subscribing late loses nothing: items are
/// buffered until polled.
pub struct OutputStream<O: 'static> {
    request_id: String,
    rx: RecvStream<'static, StreamItem<O>>,
    finished: Arc<AtomicBool>,
    stopped: bool,
}

impl<O: 'static> OutputStream<O> {
    /// Id of the request this stream belongs to.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// True once the write side terminated the stream. Buffered items may
    /// still be pending on the read side.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

// Manual impl: the flume receiver half is not Debug.
impl<O: 'static> fmt::Debug for OutputStream<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream")
            .field("request_id", &self.request_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl<O: 'static> Stream for OutputStream<O> {
    type Item = StreamItem<O>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.stopped {
            return Poll::Ready(None);
        }

        let recv_result = self.rx.poll_next_unpin(cx);

        match recv_result {
            Poll::Ready(Some(item)) => {
                if matches!(item, StreamItem::Done(_)) {
                    self.stopped = true;
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                // Tracker dropped without terminating us; end quietly.
                self.stopped = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
