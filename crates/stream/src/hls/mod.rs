pub mod playlist;
pub mod sequencer;
mod stream;
pub mod utils;
pub mod variant;

pub use m3u8_rs;
pub use stream::*;
