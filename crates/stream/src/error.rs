use aes::cipher::block_padding::UnpadError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoriError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Malformed playlist: {0}")]
    MalformedPlaylist(String),

    #[error("No variant found in master playlist")]
    NoVariantsFound,

    #[error("Failed to fetch playlist {url}: {reason}")]
    PlaylistFetch { url: url::Url, reason: String },

    #[error("Failed to fetch segment #{sequence} ({url}): {reason}")]
    SegmentFetch {
        sequence: u64,
        url: url::Url,
        reason: String,
    },

    #[error("Failed to fetch key {url}: {reason}")]
    KeyFetch { url: url::Url, reason: String },

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Stream stalled: no new segment after {0} playlist refreshes")]
    StalledStream(u32),

    #[error("Segment sequence gap: expected #{expected}, found #{found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("Stream cancelled")]
    Cancelled,

    #[error("Segment queue is closed")]
    QueueClosed,

    #[error("Chunk #{0} was not reserved or is already buffered")]
    UnexpectedChunk(u64),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    HexDecodeError(#[from] hex::FromHexError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

impl IoriError {
    /// Whether the error was caused by tearing the stream down.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::QueueClosed)
    }
}

pub type IoriResult<T> = Result<T, IoriError>;

impl From<UnpadError> for IoriError {
    fn from(_: UnpadError) -> Self {
        Self::Decryption("invalid pkcs7 padding".to_string())
    }
}
