//! Writing snapshots to subscriber sinks in the server-sent events format.
//!
//! Each frame is one `data:` line holding the JSON snapshot, terminated by
//! a blank line:
//!
//! ```text
//! data: {"is_playing":true,"progress_ms":42000,"item":{...}}
//!
//! ```
//!
//! Frames are flushed right after writing. A buffered proxy or transport
//! that holds frames back would turn the feed into a batch job.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::{Error, ErrorKind, Result},
    snapshot::Snapshot,
};

/// Destination of a subscriber's frames.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Writes one complete frame.
    async fn send(&mut self, frame: &str) -> Result<()>;

    /// Pushes written frames out to the subscriber.
    ///
    /// Sinks that cannot do this report `Unimplemented`.
    async fn flush(&mut self) -> Result<()>;

    /// Completes when the subscriber went away. Sinks that cannot tell
    /// never complete, and a dead subscriber is only noticed on the next
    /// write.
    async fn closed(&self) {
        std::future::pending::<()>().await;
    }
}

#[async_trait]
impl<W> FrameSink for W
where
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn send(&mut self, frame: &str) -> Result<()> {
        self.write_all(frame.as_bytes()).await.map_err(Into::into)
    }

    async fn flush(&mut self) -> Result<()> {
        AsyncWriteExt::flush(self).await.map_err(Into::into)
    }
}

/// Sink feeding an HTTP response body.
///
/// The receiving half is turned into the body stream; every frame becomes
/// one body chunk, which the server writes out as soon as it arrives.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    /// Frames a slow subscriber may lag behind before writes start to wait.
    pub const CAPACITY: usize = 8;

    /// Creates a sink and the body stream it feeds.
    #[must_use]
    pub fn channel() -> (Self, ReceiverStream<String>) {
        let (tx, rx) = mpsc::channel(Self::CAPACITY);
        (Self { tx }, ReceiverStream::new(rx))
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: &str) -> Result<()> {
        self.tx
            .send(frame.to_owned())
            .await
            .map_err(|_| Error::aborted("subscriber went away"))
    }

    async fn flush(&mut self) -> Result<()> {
        // Chunks are not buffered on this side.
        Ok(())
    }

    async fn closed(&self) {
        self.tx.closed().await;
    }
}

#[derive(Debug, Default)]
pub struct Broadcaster {
    warned_unflushable: AtomicBool,
}

impl Broadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes `snapshot` into one frame.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the snapshot cannot be serialized.
    pub fn frame(snapshot: &Snapshot) -> Result<String> {
        let json = serde_json::to_string(snapshot)?;
        Ok(format!("data: {json}\n\n"))
    }

    /// Writes `snapshot` to `sink` and flushes it.
    ///
    /// A sink that cannot flush is logged once and otherwise tolerated.
    ///
    /// # Errors
    ///
    /// Will return `Err` if serializing, writing or flushing fails. The
    /// caller is expected to end this subscriber's stream.
    pub async fn write<S>(&self, snapshot: &Snapshot, sink: &mut S) -> Result<()>
    where
        S: FrameSink + ?Sized,
    {
        let frame = Self::frame(snapshot)?;
        sink.send(&frame).await?;

        match sink.flush().await {
            Err(e) if e.kind == ErrorKind::Unimplemented => {
                if !self.warned_unflushable.swap(true, Ordering::Relaxed) {
                    error!("subscriber sink cannot flush, frames may arrive late: {e}");
                }
                Ok(())
            }
            result => result,
        }
    }
}
