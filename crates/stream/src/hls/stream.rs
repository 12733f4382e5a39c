use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::StreamOptions,
    decrypt::KeyStore,
    download::SegmentWorkers,
    error::{IoriError, IoriResult},
    fetch::SegmentFetcher,
    hls::{
        playlist::{MediaDocument, Playlist, VariantEntry},
        sequencer::{Sequencer, SequencerState},
        utils::load_m3u8,
        variant::{VariantSelector, VariantSet},
    },
    queue::SegmentQueue,
    reader::StreamReader,
    util::http::HttpClient,
};

/// Per-session context shared by every stream opened from it.
#[derive(Clone)]
pub struct HlsSession {
    client: HttpClient,
    options: Arc<StreamOptions>,
}

impl HlsSession {
    pub fn new(client: HttpClient, options: StreamOptions) -> Self {
        Self {
            client,
            options: Arc::new(options),
        }
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    async fn load(&self, url: &Url) -> IoriResult<Playlist> {
        load_m3u8(
            &self.client,
            url,
            &self.options.playlist_retry(),
            self.options.request_timeout(),
        )
        .await
    }

    /// Load a master playlist and list its renditions.
    pub async fn variants(&self, url: &str) -> IoriResult<HlsVariants> {
        let url = Url::parse(url)?;
        match self.load(&url).await? {
            Playlist::Master(master) => Ok(HlsVariants {
                session: self.clone(),
                variants: VariantSelector::select(&master)?,
            }),
            Playlist::Media(_) => Err(IoriError::NoVariantsFound),
        }
    }

    /// Describe a media playlist stream without loading it yet.
    pub fn stream(&self, url: Url) -> HlsStream {
        HlsStream {
            session: self.clone(),
            url,
        }
    }

    /// Open either a master playlist, using its highest-bandwidth rendition, or a
    /// media playlist directly.
    pub async fn open(&self, url: &str) -> IoriResult<StreamReader> {
        let url = Url::parse(url)?;
        match self.load(&url).await? {
            Playlist::Master(master) => {
                let variants = VariantSelector::select(&master)?;
                let best = variants.best();
                tracing::info!(
                    "Selected variant {} ({} bps): {}",
                    best.name,
                    best.bandwidth,
                    best.media_playlist_url
                );
                self.stream(best.media_playlist_url.clone()).open().await
            }
            Playlist::Media(document) => self.stream(url).open_with(document).await,
        }
    }
}

/// Renditions of a master playlist, ready to be opened.
pub struct HlsVariants {
    session: HlsSession,
    variants: VariantSet,
}

impl HlsVariants {
    pub fn get(&self, name: &str) -> Option<HlsStream> {
        self.variants
            .url(name)
            .map(|url| self.session.stream(url.clone()))
    }

    pub fn best(&self) -> HlsStream {
        self.session
            .stream(self.variants.best().media_playlist_url.clone())
    }

    pub fn worst(&self) -> HlsStream {
        self.session
            .stream(self.variants.worst().media_playlist_url.clone())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variants.names()
    }

    pub fn entries(&self) -> &VariantSet {
        &self.variants
    }

    pub fn entry(&self, name: &str) -> Option<&VariantEntry> {
        self.variants.get(name)
    }
}

/// A media playlist that can be opened as a [`StreamReader`].
pub struct HlsStream {
    session: HlsSession,
    url: Url,
}

impl HlsStream {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Load the media playlist and start the pipeline.
    ///
    /// Errors of the first load are returned here, later ones on [`StreamReader::read`].
    pub async fn open(self) -> IoriResult<StreamReader> {
        self.start(None).await
    }

    async fn open_with(self, first: MediaDocument) -> IoriResult<StreamReader> {
        self.start(Some(first)).await
    }

    async fn start(self, first: Option<MediaDocument>) -> IoriResult<StreamReader> {
        let HlsSession { client, options } = self.session;
        let timeout = options.request_timeout();

        let mut keys = KeyStore::new(client.clone(), options.retry.clone(), timeout);
        if let Some(key) = &options.key_override {
            keys = keys.with_manual_key(key)?;
        }

        let cancel = CancellationToken::new();
        let (state, state_receiver) = watch::channel(SequencerState::Init);
        let state = Arc::new(state);

        let sequencer = Sequencer::new(
            client.clone(),
            self.url.clone(),
            options.clone(),
            Arc::new(keys),
            cancel.clone(),
            state.clone(),
        );
        let first = match first {
            Some(first) => first,
            None => sequencer.load().await?,
        };
        tracing::info!(
            "Opened {} with {} segments, starting at #{}.",
            self.url,
            first.segments.len(),
            first.media_sequence_start
        );

        let queue = Arc::new(SegmentQueue::new(options.queue_capacity()));
        let (sender, receiver) = mpsc::channel(options.queue_capacity());
        let workers = SegmentWorkers::new(
            SegmentFetcher::new(client, options.retry.clone(), timeout),
            queue.clone(),
            options.workers(),
            cancel.clone(),
            state.clone(),
        );

        let task = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                // Fail the queue before the workers can finish it, a reader must
                // never mistake a failed stream for a complete one.
                let report = |result: IoriResult<()>| match result {
                    Ok(()) => true,
                    Err(e) if e.is_cancelled() => false,
                    Err(e) => {
                        queue.fail(e);
                        state.send_replace(SequencerState::Failed);
                        cancel.cancel();
                        false
                    }
                };
                let (sequenced, fetched) = tokio::join!(
                    async { report(sequencer.run(first, sender).await) },
                    async { report(workers.run(receiver).await) },
                );

                if !(sequenced && fetched) {
                    tracing::debug!("Pipeline stopped early.");
                }
                // a worker failure is reported from its own task, keep it
                state.send_if_modified(|current| {
                    if *current == SequencerState::Failed {
                        false
                    } else {
                        *current = SequencerState::Done;
                        true
                    }
                });
            })
        };

        Ok(StreamReader::new(queue, cancel, state_receiver, Some(task)))
    }
}
