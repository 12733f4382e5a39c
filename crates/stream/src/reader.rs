use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use tokio::{io::AsyncRead, sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{IoriError, IoriResult},
    hls::sequencer::SequencerState,
    queue::SegmentQueue,
};

/// Ordered byte stream over the segments of an opened playlist.
///
/// Segment boundaries are invisible to the reader. Dropping the reader closes it.
pub struct StreamReader {
    queue: Arc<SegmentQueue>,
    cancel: CancellationToken,
    state: watch::Receiver<SequencerState>,
    task: Option<JoinHandle<()>>,

    current: Bytes,
    closed: bool,
}

impl StreamReader {
    pub(crate) fn new(
        queue: Arc<SegmentQueue>,
        cancel: CancellationToken,
        state: watch::Receiver<SequencerState>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            queue,
            cancel,
            state,
            task,
            current: Bytes::new(),
            closed: false,
        }
    }

    /// Read up to `n` bytes. An empty result means the stream ended.
    ///
    /// Waits for at least one byte, then returns whatever else is already buffered.
    pub async fn read(&mut self, n: usize) -> IoriResult<Bytes> {
        if n == 0 {
            return Ok(Bytes::new());
        }

        let Some(mut head) = self.next_chunk().await? else {
            return Ok(Bytes::new());
        };
        if head.len() >= n {
            self.current = head.split_off(n);
            return Ok(head);
        }

        let mut buffer = BytesMut::with_capacity(n);
        buffer.extend_from_slice(&head);
        while buffer.len() < n {
            let Some(chunk) = self.queue.try_pop() else {
                break;
            };
            let mut bytes = chunk.bytes;
            let wanted = n - buffer.len();
            if bytes.len() > wanted {
                self.current = bytes.split_off(wanted);
            }
            buffer.extend_from_slice(&bytes);
        }
        Ok(buffer.freeze())
    }

    /// Read until the stream ends.
    pub async fn read_to_end(&mut self) -> IoriResult<Vec<u8>> {
        let mut data = Vec::new();
        while let Some(bytes) = self.next_chunk().await? {
            data.extend_from_slice(&bytes);
        }
        Ok(data)
    }

    /// The rest of the current chunk, or the next non-empty one.
    async fn next_chunk(&mut self) -> IoriResult<Option<Bytes>> {
        if !self.current.is_empty() {
            return Ok(Some(std::mem::take(&mut self.current)));
        }

        loop {
            if self.closed {
                return Ok(None);
            }
            match self.queue.pop().await {
                Ok(Some(chunk)) if chunk.bytes.is_empty() => continue,
                Ok(Some(chunk)) => return Ok(Some(chunk.bytes)),
                Ok(None) => return Ok(None),
                Err(e) => {
                    tracing::error!("Stream failed: {e}");
                    self.close();
                    return Err(e);
                }
            }
        }
    }

    /// Stop the pipeline and release the queue. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.current = Bytes::new();

        self.cancel.cancel();
        self.queue.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        tracing::debug!("Stream reader closed.");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Current state of the playlist sequencer.
    pub fn state(&self) -> SequencerState {
        *self.state.borrow()
    }

    /// Subscribe to sequencer state changes.
    pub fn watch_state(&self) -> watch::Receiver<SequencerState> {
        self.state.clone()
    }

    /// Adapt the reader to [`AsyncRead`]. Stream errors become [`std::io::Error`]s.
    pub fn into_async_read(self) -> impl AsyncRead + Send + Unpin {
        let chunks = futures::stream::try_unfold(self, |mut reader| async move {
            let chunk = reader.next_chunk().await?;
            Ok::<_, IoriError>(chunk.map(|bytes| (bytes, reader)))
        })
        .map_err(std::io::Error::other);
        tokio_util::io::StreamReader::new(Box::pin(chunks))
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.close();
    }
}
