//! Built-in source kinds (§4.7): timers and idle callbacks. Both are plain
//! [`crate::source::SourceFuncs`] implementations; nothing here is privileged
//! over a source an embedder writes themselves.

pub mod idle;
pub mod timeout;

pub use idle::IdleSource;
pub use timeout::TimeoutSource;
