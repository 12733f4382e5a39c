use std::{
    collections::BTreeMap,
    pin::pin,
    sync::{Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::error::{IoriError, IoriResult};

#[derive(Debug, Clone, PartialEq)]
pub struct BufferedChunk {
    pub sequence_number: u64,
    pub bytes: Bytes,
}

/// Bounded buffer releasing chunks strictly by sequence number.
///
/// Producers announce each sequence number with [`SegmentQueue::reserve`] in playlist
/// order, then [`SegmentQueue::push`] the payload whenever it is ready. Reserving
/// suspends while `capacity` chunks are in flight or waiting for the reader, so a
/// late chunk can never be starved by the ones after it.
pub struct SegmentQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    readable: Notify,
    writable: Notify,
}

#[derive(Default)]
struct QueueState {
    /// Next sequence number handed to the reader
    next: Option<u64>,
    /// One past the last reserved sequence number
    reserved_end: Option<u64>,
    // sequence -> payload, completed but not yet released
    pending: BTreeMap<u64, Bytes>,

    finished: bool,
    closed: bool,
    error: Option<IoriError>,
}

impl SegmentQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a slot for `sequence`, waiting while the queue is full.
    ///
    /// Sequence numbers must be reserved contiguously.
    pub async fn reserve(&self, sequence: u64) -> IoriResult<()> {
        loop {
            let mut notified = pin!(self.writable.notified());
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.closed || state.finished || state.error.is_some() {
                    return Err(IoriError::QueueClosed);
                }

                let next = *state.next.get_or_insert(sequence);
                let end = state.reserved_end.unwrap_or(sequence);
                if sequence != end {
                    return Err(IoriError::SequenceGap {
                        expected: end,
                        found: sequence,
                    });
                }
                if end - next < self.capacity as u64 {
                    state.reserved_end = Some(end + 1);
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Hand over the payload of a reserved sequence number. Never blocks.
    pub fn push(&self, chunk: BufferedChunk) -> IoriResult<()> {
        let mut state = self.state();
        if state.closed || state.error.is_some() {
            return Err(IoriError::QueueClosed);
        }

        let sequence = chunk.sequence_number;
        let (Some(next), Some(end)) = (state.next, state.reserved_end) else {
            return Err(IoriError::UnexpectedChunk(sequence));
        };
        if sequence < next || sequence >= end || state.pending.contains_key(&sequence) {
            return Err(IoriError::UnexpectedChunk(sequence));
        }

        state.pending.insert(sequence, chunk.bytes);
        if sequence == next {
            self.readable.notify_waiters();
        }
        Ok(())
    }

    /// Wait for the next chunk in order.
    ///
    /// Returns `Ok(None)` once the queue is closed, or finished and drained.
    /// After a failure, chunks that were already complete and next in order are
    /// still released, then the failure is returned once and the queue behaves
    /// as closed.
    pub async fn pop(&self) -> IoriResult<Option<BufferedChunk>> {
        loop {
            let mut notified = pin!(self.readable.notified());
            notified.as_mut().enable();

            if let Some(result) = self.poll_ready() {
                return result;
            }

            notified.await;
        }
    }

    /// Take the next chunk if it is already available.
    pub fn try_pop(&self) -> Option<BufferedChunk> {
        let mut state = self.state();
        if state.closed {
            return None;
        }
        self.release_next(&mut state)
    }

    fn poll_ready(&self) -> Option<IoriResult<Option<BufferedChunk>>> {
        let mut state = self.state();
        if state.closed {
            return Some(Ok(None));
        }
        if let Some(chunk) = self.release_next(&mut state) {
            return Some(Ok(Some(chunk)));
        }
        if let Some(error) = state.error.take() {
            state.closed = true;
            state.pending.clear();
            self.writable.notify_waiters();
            return Some(Err(error));
        }
        if state.finished && state.next == state.reserved_end {
            return Some(Ok(None));
        }
        None
    }

    fn release_next(&self, state: &mut QueueState) -> Option<BufferedChunk> {
        let next = state.next?;
        let bytes = state.pending.remove(&next)?;
        state.next = Some(next + 1);
        self.writable.notify_waiters();
        Some(BufferedChunk {
            sequence_number: next,
            bytes,
        })
    }

    /// No more sequence numbers will be reserved. Readers drain what is left.
    pub fn finish(&self) {
        self.state().finished = true;
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Report a failure to the reader. Only the first failure is kept.
    pub fn fail(&self, error: IoriError) {
        {
            let mut state = self.state();
            if state.closed || state.error.is_some() {
                return;
            }
            state.error = Some(error);
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Close the queue for good, dropping buffered chunks and waking every waiter.
    pub fn close(&self) {
        {
            let mut state = self.state();
            state.closed = true;
            state.pending.clear();
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Number of completed chunks waiting to be read or for an earlier chunk.
    pub fn buffered(&self) -> usize {
        self.state().pending.len()
    }
}
