use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::{
    decrypt::decrypt,
    error::{IoriError, IoriResult},
    fetch::SegmentFetcher,
    hls::sequencer::{SegmentJob, SequencerState},
    queue::{BufferedChunk, SegmentQueue},
};

/// Pool of fetch and decrypt workers feeding a [`SegmentQueue`].
///
/// Jobs are reserved in the queue in the order they are received, so chunks are
/// released in sequence order however the workers finish.
pub struct SegmentWorkers {
    fetcher: SegmentFetcher,
    queue: Arc<SegmentQueue>,

    concurrency: u32,
    permits: Arc<Semaphore>,

    cancel: CancellationToken,
    state: Arc<watch::Sender<SequencerState>>,
}

impl SegmentWorkers {
    pub fn new(
        fetcher: SegmentFetcher,
        queue: Arc<SegmentQueue>,
        concurrency: usize,
        cancel: CancellationToken,
        state: Arc<watch::Sender<SequencerState>>,
    ) -> Self {
        let concurrency = concurrency.clamp(1, Semaphore::MAX_PERMITS) as u32;
        Self {
            fetcher,
            queue,
            concurrency,
            permits: Arc::new(Semaphore::new(concurrency as usize)),
            cancel,
            state,
        }
    }

    /// Process jobs until the sender is dropped, then mark the queue finished.
    pub async fn run(self, mut jobs: mpsc::Receiver<SegmentJob>) -> IoriResult<()> {
        tracing::info!("Start fetching with {} worker(s).", self.concurrency);

        let result = self.dispatch(&mut jobs).await;

        // drop receiver to stop the sequencer from emitting more jobs
        drop(jobs);

        // wait for all tasks to finish
        let _permits = self
            .permits
            .acquire_many(self.concurrency)
            .await
            .map_err(|_| IoriError::Cancelled)?;

        result?;
        // a worker may have failed after the last job was dispatched
        if self.cancel.is_cancelled() {
            return Err(IoriError::Cancelled);
        }
        tracing::info!("All segments fetched.");
        self.queue.finish();
        Ok(())
    }

    async fn dispatch(&self, jobs: &mut mpsc::Receiver<SegmentJob>) -> IoriResult<()> {
        loop {
            let job = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(IoriError::Cancelled),
                job = jobs.recv() => job,
            };
            let Some(job) = job else {
                return Ok(());
            };

            let sequence = job.sequence();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(IoriError::Cancelled),
                reserved = self.queue.reserve(sequence) => reserved?,
            };
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(IoriError::Cancelled),
                permit = self.permits.clone().acquire_owned() => {
                    permit.map_err(|_| IoriError::Cancelled)?
                }
            };

            let fetcher = self.fetcher.clone();
            let queue = self.queue.clone();
            let cancel = self.cancel.clone();
            let state = self.state.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(IoriError::Cancelled),
                    result = process(&fetcher, &job) => result,
                };

                match result.and_then(|bytes| {
                    queue.push(BufferedChunk {
                        sequence_number: sequence,
                        bytes,
                    })
                }) {
                    Ok(()) => tracing::debug!("Segment #{sequence} is ready."),
                    Err(e) if e.is_cancelled() => {
                        tracing::debug!("Segment #{sequence} abandoned.")
                    }
                    Err(e) => {
                        tracing::error!("Processing segment #{sequence} failed. {e}");
                        queue.fail(e);
                        state.send_replace(SequencerState::Failed);
                        cancel.cancel();
                    }
                }

                // drop permit to release the semaphore
                drop(permit);
            });
        }
    }
}

/// Fetch, decrypt and prefix one segment with its initialization section.
async fn process(fetcher: &SegmentFetcher, job: &SegmentJob) -> IoriResult<Bytes> {
    let segment = &job.segment;
    let payload = fetcher.fetch(segment).await?;

    let payload = match (&job.key, segment.iv()) {
        (Some(key), Some(iv)) => Bytes::from(decrypt(&payload, &key.key, &iv)?),
        _ => payload,
    };

    let Some(init) = &job.init_section else {
        return Ok(payload);
    };
    let init = fetcher.fetch_init_section(segment, init).await?;
    let mut bytes = BytesMut::with_capacity(init.len() + payload.len());
    bytes.extend_from_slice(&init);
    bytes.extend_from_slice(&payload);
    Ok(bytes.freeze())
}
