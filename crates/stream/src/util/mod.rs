pub mod http;
pub mod range;
pub mod retry;
