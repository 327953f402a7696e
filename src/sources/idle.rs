use std::any::Any;
use std::time::{Duration, Instant};

use crate::source::SourceFuncs;

/// A source that's always ready, meant to run at
/// [`crate::priority::Priority::DEFAULT_IDLE`] so it only gets a turn once
/// nothing more urgent is pending (§4.7).
pub struct IdleSource {
    oneshot: bool,
    callback: Box<dyn FnMut() -> bool + Send>,
}

impl IdleSource {
    pub fn new(callback: impl FnMut() -> bool + Send + 'static) -> IdleSource {
        IdleSource {
            oneshot: false,
            callback: Box::new(callback),
        }
    }

    pub fn once(callback: impl FnOnce() + Send + 'static) -> IdleSource {
        let mut callback = Some(callback);
        IdleSource {
            oneshot: true,
            callback: Box::new(move || {
                if let Some(cb) = callback.take() {
                    cb();
                }
                false
            }),
        }
    }
}

impl SourceFuncs for IdleSource {
    fn prepare(&mut self, _now: Instant) -> (bool, Option<Duration>) {
        (true, None)
    }

    fn check(&mut self, _now: Instant) -> bool {
        true
    }

    fn dispatch(&mut self, _now: Instant, _user_data: &mut dyn Any) -> bool {
        let keep = (self.callback)();
        !self.oneshot && keep
    }
}
