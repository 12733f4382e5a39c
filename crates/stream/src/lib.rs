//! ┌──────────────────┐  SegmentJob   ┌──────────────────┐
//! │                  ├───────────────►                  ├───┐
//! │    Sequencer     │               │  SegmentWorkers  │   │fetch + decrypt
//! │ (playlist polls) │    [MPSC]     │   (N permits)    ◄───┘
//! │                  ├───────────────►                  │
//! └────────┬─────────┘               └────────┬─────────┘
//!          │ get_key                          │ push (any order)
//! ┌────────▼─────────┐               ┌────────▼─────────┐
//! │     KeyStore     │               │   SegmentQueue   │
//! └──────────────────┘               │ (sequence order) │
//!                                    └────────┬─────────┘
//!                                             │ pop
//!                                    ┌────────▼─────────┐
//!                                    │   StreamReader   │
//!                                    └──────────────────┘

pub mod config;
pub mod decrypt;
pub mod download;
pub mod error;
pub mod fetch;
pub mod hls;
pub mod queue;
pub mod reader;
pub mod util;

pub use config::{RetryPolicy, StreamOptions};
pub use error::{IoriError, IoriResult};
pub use hls::{
    sequencer::{SequencerState, StreamMode},
    HlsSession, HlsStream, HlsVariants,
};
pub use reader::StreamReader;
pub use util::http::HttpClient;
