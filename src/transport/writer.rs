//! Dedicated writer task per connection.
//!
//! The connection task never writes to the socket itself. Encoded frames
//! go through a bounded channel to a writer task that batches whatever is
//! ready into one `write_vectored` call.
//!
//! ```text
//! connection task ─► WriterHandle ─► mpsc ─► writer task ─► socket
//! ```

use std::io::IoSlice;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::backpressure::{Backpressure, DEFAULT_MAX_PENDING, DEFAULT_TIMEOUT};
use crate::error::{Result, ServerError};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Handle for queueing encoded frames.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
    backpressure: Backpressure,
}

impl WriterHandle {
    /// Queue a complete frame, waiting while backpressure is active.
    ///
    /// # Errors
    ///
    /// [`ServerError::BackpressureTimeout`] if the queue stays full, or
    /// [`ServerError::ConnectionClosed`] once the writer task has stopped.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.backpressure.reserve().await?;

        self.tx.send(frame).await.map_err(|_| {
            self.backpressure.release(1);
            ServerError::ConnectionClosed
        })
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.backpressure.pending()
    }

    /// True while the queue is at its limit.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.backpressure.is_active()
    }
}

/// Spawn the writer task on the current runtime.
///
/// The task ends when every handle is dropped (after flushing and shutting
/// down the write side) or on the first write error.
pub fn spawn_writer<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let backpressure = Backpressure::new(config.max_pending_frames, config.backpressure_timeout);

    let handle = WriterHandle {
        tx,
        backpressure: backpressure.clone(),
    };
    let task = tokio::spawn(writer_loop(rx, writer, backpressure));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    backpressure: Backpressure,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let result = write_batch(&mut writer, &batch).await;
        backpressure.release(batch.len());
        batch.clear();

        if let Err(e) = result {
            tracing::debug!(error = %e, "Write failed, stopping writer");
            return Err(e.into());
        }
    }

    // All handles dropped: close our side cleanly.
    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch of frames with scatter/gather I/O, handling partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(Bytes::len).sum();
    let mut written = 0;

    while written < total {
        let slices = remaining_slices(batch, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            ));
        }
        written += n;
    }

    writer.flush().await
}

/// IoSlices covering everything after the first `skip` bytes of the batch.
fn remaining_slices(batch: &[Bytes], skip: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.len();
        if skip < end && !frame.is_empty() {
            slices.push(IoSlice::new(&frame[skip.saturating_sub(offset)..]));
        }
        offset = end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_remaining_slices_no_skip() {
        let batch = vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")];
        let slices = remaining_slices(&batch, 0);

        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[0], b"abc");
    }

    #[test]
    fn test_remaining_slices_partial_first() {
        let batch = vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")];
        let slices = remaining_slices(&batch, 2);

        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[0], b"c");
        assert_eq!(&*slices[1], b"de");
    }

    #[test]
    fn test_remaining_slices_skip_whole_frame() {
        let batch = vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")];
        let slices = remaining_slices(&batch, 4);

        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], b"e");
    }

    #[tokio::test]
    async fn test_write_batch_concatenates() {
        let mut buf = Cursor::new(Vec::new());
        let batch = vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")];

        write_batch(&mut buf, &batch).await.unwrap();
        assert_eq!(buf.into_inner(), b"onetwo");
    }

    #[tokio::test]
    async fn test_writer_preserves_order() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer(client, WriterConfig::default());

        for i in 0..10u8 {
            handle.send(Bytes::from(vec![i; 3])).await.unwrap();
        }
        drop(handle);
        task.await.unwrap().unwrap();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();

        let expected: Vec<u8> = (0..10u8).flat_map(|i| [i; 3]).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_pending_released_after_write() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer(client, WriterConfig::default());

        handle.send(Bytes::from_static(b"hello")).await.unwrap();

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(handle.pending_count(), 0);
        assert!(!handle.is_backpressure_active());
    }

    #[tokio::test]
    async fn test_send_after_writer_stopped() {
        let (client, server) = duplex(16);
        drop(server);
        let (handle, task) = spawn_writer(client, WriterConfig::default());

        // First write fails and stops the task.
        let _ = handle.send(Bytes::from_static(b"x")).await;
        assert!(task.await.unwrap().is_err());

        let result = handle.send(Bytes::from_static(b"y")).await;
        assert!(matches!(result, Err(ServerError::ConnectionClosed)));
    }
}
