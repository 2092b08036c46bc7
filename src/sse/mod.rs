//! Server-sent events writer
//!
//! Frames are pushed through a capacity-one channel that backs the HTTP
//! response body. [`StreamWriter::write`] returns only after the body has
//! taken the frame, so a slow client stalls the producer instead of growing a
//! queue, and a dropped body surfaces as [`WriteError::ClientGone`].

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, StreamBody};
use hyper::body::Frame;
use tokio::sync::mpsc;

use crate::events::OutboundEvent;

/// Content type of an event-stream response
pub const CONTENT_TYPE: &str = "text/event-stream";

/// Response body fed by a [`StreamWriter`]
pub type EventBody = BoxBody<Bytes, hyper::Error>;

/// Why a frame could not be written
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// The payload could not be serialized; nothing was written
    #[error("failed to encode event payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The client went away
    #[error("client disconnected")]
    ClientGone,
}

/// Encode one event as `event: <type>\ndata: <json>\n\n`
pub fn encode_frame(event: &OutboundEvent) -> Result<Bytes, serde_json::Error> {
    let data = serde_json::to_string(&event.payload)?;
    Ok(Bytes::from(format!("event: {}\ndata: {}\n\n", event.event_type, data)))
}

/// Create a writer and the response body it feeds
pub fn channel() -> (StreamWriter, EventBody) {
    let (tx, mut rx) = mpsc::channel::<Bytes>(1);

    let frames = futures::stream::poll_fn(move |cx| {
        rx.poll_recv(cx)
            .map(|chunk| chunk.map(|data| Ok::<_, hyper::Error>(Frame::data(data))))
    });

    let writer = StreamWriter {
        tx,
        frames_written: 0,
        bytes_written: 0,
    };
    (writer, StreamBody::new(frames).boxed())
}

/// Producer side of an event-stream response
#[derive(Debug)]
pub struct StreamWriter {
    tx: mpsc::Sender<Bytes>,
    frames_written: u64,
    bytes_written: u64,
}

impl StreamWriter {
    /// Write one event and wait until the body has taken it
    pub async fn write(&mut self, event: &OutboundEvent) -> Result<(), WriteError> {
        let frame = encode_frame(event)?;
        let len = frame.len() as u64;

        self.tx.send(frame).await.map_err(|_| WriteError::ClientGone)?;
        // Capacity comes back only once the body has pulled the frame
        self.tx.reserve().await.map_err(|_| WriteError::ClientGone)?;

        self.frames_written += 1;
        self.bytes_written += len;
        Ok(())
    }

    /// Resolves when the client side of the stream is gone
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
