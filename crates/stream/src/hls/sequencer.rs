use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::StreamOptions,
    decrypt::{EncryptionKey, KeyStore},
    error::{IoriError, IoriResult},
    hls::{
        playlist::{EncryptionMethod, InitSection, MediaDocument, Playlist, Segment},
        utils::load_m3u8,
    },
    util::http::HttpClient,
};

/// Durations in playlists are rounded, accept this much slack when comparing them.
const TIME_EPSILON: f64 = 1e-3;
const MIN_RELOAD_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Live,
    Vod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Init,
    Active(StreamMode),
    Draining,
    Done,
    Failed,
}

/// A segment scheduled for fetching, with everything needed to decrypt it.
#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub segment: Segment,
    pub key: Option<Arc<EncryptionKey>>,
    /// Set on the first job after the initialization section changed.
    pub init_section: Option<Arc<InitSection>>,
}

impl SegmentJob {
    pub fn sequence(&self) -> u64 {
        self.segment.sequence_number
    }
}

/// Decides which segments of each playlist load are emitted.
#[derive(Debug, Clone)]
pub struct SegmentWindow {
    live_edge: usize,
    start_offset: Option<f64>,
    duration: Option<f64>,

    /// Whether a playlist with segments has been windowed yet.
    started: bool,
    last_emitted: Option<u64>,
    emitted_duration: f64,
}

impl SegmentWindow {
    pub fn new(options: &StreamOptions) -> Self {
        Self {
            live_edge: options.live_edge(),
            start_offset: options.start_offset,
            duration: options.duration,
            started: false,
            last_emitted: None,
            emitted_duration: 0.,
        }
    }

    pub fn last_emitted(&self) -> Option<u64> {
        self.last_emitted
    }

    /// Whether the requested duration has been scheduled.
    pub fn is_exhausted(&self) -> bool {
        self.duration
            .is_some_and(|duration| self.emitted_duration + TIME_EPSILON >= duration)
    }

    /// Segments of the first playlist to emit.
    pub fn initial(&mut self, document: &MediaDocument, mode: StreamMode) -> Vec<Segment> {
        let segments = &document.segments;
        let start = if let Some(offset) = self.start_offset {
            let mut elapsed = 0.;
            segments
                .iter()
                .position(|segment| {
                    let reached = elapsed + TIME_EPSILON >= offset;
                    elapsed += segment.duration;
                    reached
                })
                .unwrap_or(segments.len())
        } else if mode == StreamMode::Live && self.duration.is_none() {
            segments.len().saturating_sub(self.live_edge)
        } else {
            0
        };

        self.started = !segments.is_empty();
        // skipped segments count as seen, later loads continue after them
        self.last_emitted = segments[..start].last().map(|s| s.sequence_number);
        self.take(&segments[start..])
    }

    /// Segments of a reloaded playlist that were not emitted yet.
    ///
    /// Until a load had segments, a reload is windowed like the first playlist of
    /// a live stream.
    pub fn refresh(&mut self, document: &MediaDocument) -> IoriResult<Vec<Segment>> {
        if !self.started {
            return Ok(self.initial(document, StreamMode::Live));
        }

        let fresh: Vec<&Segment> = document
            .segments
            .iter()
            .filter(|s| self.last_emitted.map_or(true, |last| s.sequence_number > last))
            .collect();

        if let (Some(last), Some(first)) = (self.last_emitted, fresh.first()) {
            if first.sequence_number != last + 1 {
                return Err(IoriError::SequenceGap {
                    expected: last + 1,
                    found: first.sequence_number,
                });
            }
        }

        Ok(self.take(fresh))
    }

    fn take<'a>(&mut self, candidates: impl IntoIterator<Item = &'a Segment>) -> Vec<Segment> {
        let mut segments = Vec::new();
        for segment in candidates {
            if self.is_exhausted() {
                break;
            }
            self.emitted_duration += segment.duration;
            self.last_emitted = Some(segment.sequence_number);
            segments.push(segment.clone());
        }
        segments
    }
}

/// Drives playlist loading for one opened stream and emits segment jobs in order.
pub struct Sequencer {
    client: HttpClient,
    url: Url,
    options: Arc<StreamOptions>,
    keys: Arc<KeyStore>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SequencerState>>,

    window: SegmentWindow,
    last_init_section: Option<Arc<InitSection>>,
}

impl Sequencer {
    pub fn new(
        client: HttpClient,
        url: Url,
        options: Arc<StreamOptions>,
        keys: Arc<KeyStore>,
        cancel: CancellationToken,
        state: Arc<watch::Sender<SequencerState>>,
    ) -> Self {
        let window = SegmentWindow::new(&options);
        Self {
            client,
            url,
            options,
            keys,
            cancel,
            state,
            window,
            last_init_section: None,
        }
    }

    fn set_state(&self, state: SequencerState) {
        tracing::debug!("Sequencer of {} entered {state:?}.", self.url);
        self.state.send_replace(state);
    }

    async fn cancellable<T>(&self, future: impl Future<Output = IoriResult<T>>) -> IoriResult<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IoriError::Cancelled),
            result = future => result,
        }
    }

    /// Load the media playlist once.
    pub async fn load(&self) -> IoriResult<MediaDocument> {
        let playlist = self
            .cancellable(load_m3u8(
                &self.client,
                &self.url,
                &self.options.playlist_retry(),
                self.options.request_timeout(),
            ))
            .await?;

        match playlist {
            Playlist::Media(document) => Ok(document),
            Playlist::Master(_) => Err(IoriError::MalformedPlaylist(format!(
                "{} is a master playlist, expected a media playlist",
                self.url
            ))),
        }
    }

    /// Emit jobs for `first` and every later load until the stream ends, leaving
    /// the state at `Draining`.
    ///
    /// Dropping `jobs` on return tells the workers no more segments will come.
    pub async fn run(
        mut self,
        first: MediaDocument,
        jobs: mpsc::Sender<SegmentJob>,
    ) -> IoriResult<()> {
        let result = self.drive(first, &jobs).await;
        if let Err(e) = &result {
            if !e.is_cancelled() {
                tracing::error!("Sequencer of {} failed: {e}", self.url);
                self.set_state(SequencerState::Failed);
            }
        }
        result
    }

    async fn drive(
        &mut self,
        first: MediaDocument,
        jobs: &mpsc::Sender<SegmentJob>,
    ) -> IoriResult<()> {
        let mode = if first.end_of_stream {
            StreamMode::Vod
        } else {
            StreamMode::Live
        };
        self.set_state(SequencerState::Active(mode));

        let segments = self.window.initial(&first, mode);
        tracing::info!(
            "{} of {} segments scheduled from the first playlist.",
            segments.len(),
            first.segments.len()
        );
        self.emit(segments, jobs).await?;

        if mode == StreamMode::Vod || self.window.is_exhausted() {
            self.set_state(SequencerState::Draining);
            return Ok(());
        }

        let mut document = first;
        let mut last_load = Instant::now();
        let mut stalled = 0;
        loop {
            let wait = reload_interval(&document, stalled > 0);
            self.cancellable(async {
                tokio::time::sleep_until(last_load + wait).await;
                Ok(())
            })
            .await?;

            last_load = Instant::now();
            let refreshed = self.load().await?;
            let segments = self.window.refresh(&refreshed)?;

            if segments.is_empty() && !refreshed.end_of_stream {
                stalled += 1;
                if stalled > self.options.max_stalled_refreshes {
                    return Err(IoriError::StalledStream(stalled));
                }
                tracing::debug!("No new segment in playlist, reloading. ({stalled})");
            } else {
                stalled = 0;
                tracing::info!("{} new segments were added to queue.", segments.len());
            }
            self.emit(segments, jobs).await?;

            if refreshed.end_of_stream || self.window.is_exhausted() {
                self.set_state(SequencerState::Draining);
                return Ok(());
            }
            document = refreshed;
        }
    }

    async fn emit(
        &mut self,
        segments: Vec<Segment>,
        jobs: &mpsc::Sender<SegmentJob>,
    ) -> IoriResult<()> {
        for segment in segments {
            let key = match &segment.encryption {
                None => None,
                Some(encryption) if encryption.method == EncryptionMethod::Aes128 => Some(
                    self.cancellable(self.keys.get_key(&encryption.key_uri))
                        .await?,
                ),
                Some(encryption) => {
                    return Err(IoriError::Decryption(format!(
                        "unsupported encryption method {:?} for segment #{}",
                        encryption.method, segment.sequence_number
                    )));
                }
            };

            let init_section = segment
                .init_section
                .clone()
                .filter(|init| self.last_init_section.as_ref() != Some(init));
            if init_section.is_some() {
                self.last_init_section = init_section.clone();
            }

            let job = SegmentJob {
                segment,
                key,
                init_section,
            };
            self.cancellable(async {
                jobs.send(job).await.map_err(|_| IoriError::Cancelled)
            })
            .await?;
        }
        Ok(())
    }
}

/// Wait a target duration between loads, half of it while the playlist is not moving.
fn reload_interval(document: &MediaDocument, stalled: bool) -> Duration {
    let seconds = if stalled {
        document.target_duration / 2.
    } else {
        document.target_duration
    };
    Duration::try_from_secs_f64(seconds)
        .unwrap_or(MIN_RELOAD_INTERVAL)
        .max(MIN_RELOAD_INTERVAL)
}
