use std::any::Any;
use std::time::{Duration, Instant};

use crate::source::SourceFuncs;

/// A source that fires repeatedly (or once) at a fixed interval (§4.7).
///
/// Polled against [`Instant`] rather than a real `timerfd`: the registry
/// already recomputes the shortest pending timeout every prepare pass and
/// folds it into the poll call's own wait, so a dedicated kernel timer would
/// only duplicate bookkeeping the loop already does for free. See the design
/// note on timer sources for the tradeoff this gives up (coalescing across
/// many timers happens in userspace here, not in the kernel).
///
/// Rescheduling is `now + interval`, not `expiration + interval`: a callback
/// that runs long delays every subsequent firing by the same amount (drift
/// accumulates) rather than queuing up a burst of catch-up ticks to make
/// good on missed deadlines. Intentional, preserved from the source this was
/// modeled on; not a bug to fix by switching to absolute scheduling.
pub struct TimeoutSource {
    interval: Duration,
    expiration: Instant,
    oneshot: bool,
    callback: Box<dyn FnMut() -> bool + Send>,
}

impl TimeoutSource {
    pub fn new(interval: Duration, callback: impl FnMut() -> bool + Send + 'static) -> TimeoutSource {
        TimeoutSource {
            interval,
            expiration: Instant::now() + interval,
            oneshot: false,
            callback: Box::new(callback),
        }
    }

    /// Fires exactly once; the callback's return value is ignored.
    pub fn once(interval: Duration, callback: impl FnOnce() + Send + 'static) -> TimeoutSource {
        let mut callback = Some(callback);
        TimeoutSource {
            interval,
            expiration: Instant::now() + interval,
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

impl SourceFuncs for TimeoutSource {
    fn prepare(&mut self, now: Instant) -> (bool, Option<Duration>) {
        if now >= self.expiration {
            (true, Some(Duration::ZERO))
        } else {
            (false, Some(self.expiration - now))
        }
    }

    fn check(&mut self, now: Instant) -> bool {
        now >= self.expiration
    }

    fn dispatch(&mut self, now: Instant, _user_data: &mut dyn Any) -> bool {
        let keep = (self.callback)();

        if self.oneshot || !keep {
            return false;
        }

        self.expiration = now + self.interval;
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fires_once_past_expiration() {
        let mut source = TimeoutSource::new(Duration::from_millis(10), || true);
        let start = Instant::now();

        let (ready, timeout) = source.prepare(start);
        assert!(!ready);
        assert!(timeout.unwrap() <= Duration::from_millis(10));

        let later = start + Duration::from_millis(11);
        let (ready, _) = source.prepare(later);
        assert!(ready);
        assert!(source.check(later));
    }

    #[test]
    fn oneshot_does_not_reschedule() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let mut source = TimeoutSource::once(Duration::from_millis(1), move || {
            calls2.fetch_add(1, Ordering::SeqCst);
        });

        let now = Instant::now() + Duration::from_millis(2);
        let keep = source.dispatch(now, &mut ());
        assert!(!keep);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recurring_reschedules_from_now_not_from_prior_expiration() {
        let mut source = TimeoutSource::new(Duration::from_millis(10), || true);
        let first_expiration = source.expiration;
        // Dispatch runs late, well past the original deadline.
        let late_now = first_expiration + Duration::from_millis(50);

        let keep = source.dispatch(late_now, &mut ());
        assert!(keep);
        assert_eq!(source.expiration, late_now + Duration::from_millis(10));
    }
}
