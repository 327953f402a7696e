//! A single-threaded, priority-ordered main loop: fd polling, timers and
//! idle callbacks, modeled on the classic prepare/poll/check/dispatch cycle.
//!
//! ## Usage
//!
//! First, add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! mainloop-rs = "0.1"
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mainloop_rs::{MainContext, MainLoop, Priority, TimeoutSource};
//!
//! let context = Arc::new(MainContext::new().unwrap());
//! let main_loop = Arc::new(MainLoop::new(context.clone()));
//!
//! let ml = main_loop.clone();
//! context.source_add(
//!     Priority::DEFAULT,
//!     false,
//!     Box::new(TimeoutSource::once(Duration::from_millis(1), move || {
//!         ml.quit();
//!     })),
//!     Box::new(()),
//!     None,
//! );
//!
//! main_loop.run().unwrap();
//! ```

#[macro_use]
extern crate log;

mod awakener;
mod context;
mod main_loop;
mod poll_backend;
mod poll_fd;
mod poll_table;
mod priority;
mod ready;
mod registry;
mod source;
pub mod sources;
mod sys;

pub use context::MainContext;
pub use main_loop::MainLoop;
pub use poll_backend::PollFn;
pub use poll_fd::PollFd;
pub use priority::Priority;
pub use ready::{Ready, SharedReady};
pub use source::{SourceFuncs, SourceId};
pub use sources::{IdleSource, TimeoutSource};

use std::any::Any;
use std::time::Duration;

/// Register a timeout on the default context at [`Priority::DEFAULT`] (§4.5).
///
/// A convenience wrapper; embedders juggling more than one [`MainContext`]
/// should call [`MainContext::source_add`] directly instead.
pub fn timeout_add(interval: Duration, callback: impl FnMut() -> bool + Send + 'static) -> SourceId {
    timeout_add_full(Priority::DEFAULT, interval, callback)
}

pub fn timeout_add_full(
    priority: i32,
    interval: Duration,
    callback: impl FnMut() -> bool + Send + 'static,
) -> SourceId {
    MainContext::default().source_add(
        priority,
        false,
        Box::new(TimeoutSource::new(interval, callback)),
        Box::new(()) as Box<dyn Any + Send>,
        None,
    )
}

/// Register an idle callback on the default context at
/// [`Priority::DEFAULT_IDLE`] (§4.5).
pub fn idle_add(callback: impl FnMut() -> bool + Send + 'static) -> SourceId {
    idle_add_full(Priority::DEFAULT_IDLE, callback)
}

pub fn idle_add_full(priority: i32, callback: impl FnMut() -> bool + Send + 'static) -> SourceId {
    MainContext::default().source_add(
        priority,
        false,
        Box::new(IdleSource::new(callback)),
        Box::new(()) as Box<dyn Any + Send>,
        None,
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn top_level_idle_add_runs_on_the_default_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        idle_add_full(Priority::HIGH, move || {
            calls2.fetch_add(1, Ordering::SeqCst);
            false
        });

        MainContext::default().iterate(false, true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
