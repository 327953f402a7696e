use std::any::Any;
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::awakener::Awakener;
use crate::poll_backend::{self, PollFn};
use crate::poll_table::PollTable;
use crate::ready::{Ready, SharedReady};
use crate::registry::SourceRegistry;
use crate::source::{SourceFuncs, SourceId};

struct ContextState {
    registry: SourceRegistry,
    poll_table: PollTable,
    pending_dispatches: VecDeque<SourceId>,
    poll_waiting: bool,
}

/// One main context: a source registry, a poll table and a dispatch queue,
/// guarded by a single lock (§4.1, §5).
///
/// The lock is held across the whole of the prepare and check passes; it is
/// released only around the kernel poll call and around each individual
/// dispatch call (§5 Suspension points). This mirrors `g_main_iterate` in
/// `gmain.c` exactly, including the `poll_waiting` handshake used to decide
/// whether a wake-up byte needs draining after the poll call returns.
pub struct MainContext {
    state: Mutex<ContextState>,
    poll_func: Mutex<Arc<PollFn>>,
    awakener: Awakener,
}

impl MainContext {
    pub fn new() -> io::Result<MainContext> {
        let awakener = Awakener::new()?;
        let mut poll_table = PollTable::new();
        poll_table.add(0, awakener.as_raw_fd(), Ready::readable());

        Ok(MainContext {
            state: Mutex::new(ContextState {
                registry: SourceRegistry::new(),
                poll_table,
                pending_dispatches: VecDeque::new(),
                poll_waiting: false,
            }),
            poll_func: Mutex::new(Arc::new(poll_backend::poll)),
            awakener,
        })
    }

    /// The process-wide default context used by the top-level
    /// `timeout_add`/`idle_add` convenience functions (§9).
    pub fn default() -> &'static MainContext {
        static DEFAULT: std::sync::OnceLock<MainContext> = std::sync::OnceLock::new();
        DEFAULT.get_or_init(|| MainContext::new().expect("failed to create default main context"))
    }

    /// Swap the kernel multiplexer. Only the default `libc::poll` backend is
    /// exercised by this crate's own tests; embedders needing a different
    /// backend (io_uring, epoll, a mock for tests) provide their own (§6).
    pub fn set_poll_func<F>(&self, f: F)
    where
        F: Fn(&mut [crate::poll_fd::PollFd], Option<Duration>) -> io::Result<usize>
            + Send
            + Sync
            + 'static,
    {
        *self.poll_func.lock().unwrap() = Arc::new(f);
    }

    /// Register a source and return its stable handle (§4.1).
    ///
    /// Wakes the loop immediately if it is currently blocked in the kernel
    /// poll, so the new source is seen on the very next tick rather than
    /// after whatever timeout was already in flight.
    pub fn source_add(
        &self,
        priority: i32,
        can_recurse: bool,
        funcs: Box<dyn SourceFuncs>,
        user_data: Box<dyn Any + Send>,
        destroy: Option<Box<dyn FnOnce(Box<dyn Any + Send>) + Send>>,
    ) -> SourceId {
        let mut state = self.state.lock().unwrap();
        let id = state.registry.add(priority, can_recurse, funcs, user_data, destroy);

        if state.poll_waiting {
            state.poll_waiting = false;
            let _ = self.awakener.wakeup();
        }

        id
    }

    pub fn source_remove(&self, id: SourceId) -> bool {
        let mut state = self.state.lock().unwrap();
        state.registry.remove(id)
    }

    pub fn source_remove_by_user_data(&self, matches: impl Fn(&(dyn Any + Send)) -> bool) -> bool {
        let mut state = self.state.lock().unwrap();
        state.registry.remove_by_user_data(matches)
    }

    /// Register a raw descriptor with the poll table directly, independent
    /// of the source registry (§4.2). Used by sources that watch fds the
    /// registry itself doesn't know about.
    ///
    /// Returns a [`SharedReady`] handle the caller's own `SourceFuncs::check`
    /// can read with no locking at all. This matters because `check` runs
    /// while `iterate` is still holding `self.state` (§5 Suspension points
    /// only carve out the poll syscall and each dispatch call, not the check
    /// pass) — a `check` that tried to re-lock the context to ask "what are
    /// my revents?" would deadlock against itself. The poll table writes
    /// straight into the handle's atomic during `apply_results`, under the
    /// lock it already holds; reading it back needs none.
    pub fn poll_add(&self, priority: i32, fd: RawFd, events: Ready) -> SharedReady {
        let mut state = self.state.lock().unwrap();
        state.poll_table.add(priority, fd, events)
    }

    pub fn poll_remove(&self, fd: RawFd) -> bool {
        let mut state = self.state.lock().unwrap();
        state.poll_table.remove(fd)
    }

    pub fn source_count(&self) -> usize {
        self.state.lock().unwrap().registry.len()
    }

    /// Run one iteration (§4.4).
    ///
    /// `block` without `dispatch` makes no sense (there would be nothing to
    /// wake up for), matching `g_return_val_if_fail (!block || dispatch, ...)`.
    pub fn iterate(&self, block: bool, dispatch: bool) -> io::Result<bool> {
        assert!(!block || dispatch, "iterate: block requires dispatch");

        let now = Instant::now();
        let mut state = self.state.lock().unwrap();

        // Reentrant call: a dispatch further up the stack is already
        // mid-flight. Finish draining what's already queued and return
        // without running prepare/poll/check again.
        if !state.pending_dispatches.is_empty() {
            if dispatch {
                self.dispatch_pending(state, now);
            }
            return Ok(true);
        }

        // Phase 1: prepare.
        let mut timeout: Option<Duration> = if block { None } else { Some(Duration::ZERO) };
        let mut nready = 0usize;
        let mut current_priority = 0i32;

        for id in state.registry.ordered_ids() {
            let (priority, can_recurse, in_call, valid) = match state.registry.get(id) {
                Some(slot) => (slot.priority, slot.can_recurse, slot.in_call, slot.valid),
                None => continue,
            };
            if !valid {
                continue;
            }
            if nready > 0 && priority > current_priority {
                break;
            }
            if !can_recurse && in_call {
                continue;
            }

            let outcome = state
                .registry
                .get_mut(id)
                .and_then(|slot| slot.funcs.as_mut())
                .map(|funcs| funcs.prepare(now));

            let Some((ready, source_timeout)) = outcome else {
                continue;
            };

            if ready {
                if !dispatch {
                    return Ok(true);
                }
                if let Some(slot) = state.registry.get_mut(id) {
                    slot.ready = true;
                }
                nready += 1;
                current_priority = priority;
                timeout = Some(Duration::ZERO);
            }

            if let Some(source_timeout) = source_timeout {
                timeout = Some(match timeout {
                    Some(t) => t.min(source_timeout),
                    None => source_timeout,
                });
            }
        }

        // Phase 2: poll, unlocked for the syscall itself.
        let max_priority = if nready > 0 { Some(current_priority) } else { None };
        let mut poll_fds = state.poll_table.build_poll_fds(max_priority);
        state.poll_waiting = true;
        drop(state);

        let poll_func = self.poll_func.lock().unwrap().clone();
        let poll_result = poll_func(&mut poll_fds, timeout);

        let mut state = self.state.lock().unwrap();
        if state.poll_waiting {
            state.poll_waiting = false;
        } else {
            // Something cleared the flag and wrote a byte while we were
            // blocked; drain it so it doesn't linger for the next tick.
            let _ = self.awakener.drain();
        }
        poll_result?;
        state.poll_table.apply_results(max_priority, &poll_fds);

        // Phase 3: check.
        nready = 0;
        current_priority = 0;

        for id in state.registry.ordered_ids() {
            let (priority, can_recurse, in_call, valid, already_ready) = match state.registry.get(id) {
                Some(slot) => (slot.priority, slot.can_recurse, slot.in_call, slot.valid, slot.ready),
                None => continue,
            };
            if !valid {
                continue;
            }
            if nready > 0 && priority > current_priority {
                break;
            }
            if !can_recurse && in_call {
                continue;
            }

            let fire = if already_ready {
                true
            } else {
                state
                    .registry
                    .get_mut(id)
                    .and_then(|slot| slot.funcs.as_mut())
                    .map(|funcs| funcs.check(now))
                    .unwrap_or(false)
            };

            if fire {
                if !dispatch {
                    return Ok(true);
                }
                if let Some(slot) = state.registry.get_mut(id) {
                    slot.ready = false;
                }
                state.registry.acquire(id);
                state.pending_dispatches.push_back(id);
                current_priority = priority;
                nready += 1;
            }
        }

        if state.pending_dispatches.is_empty() {
            return Ok(false);
        }

        self.dispatch_pending(state, now);
        Ok(true)
    }

    /// Phase 4: run the queued dispatch callbacks (§4.4, §7 panic
    /// containment). The lock is released only around each individual
    /// callback invocation, then reacquired before touching the registry
    /// again. Takes the guard by value and drops it for good on return,
    /// since every call site is immediately followed by `return`.
    fn dispatch_pending(&self, mut state: MutexGuard<'_, ContextState>, now: Instant) {
        while let Some(id) = state.pending_dispatches.pop_front() {
            let valid = state.registry.get(id).map(|slot| slot.valid).unwrap_or(false);

            if valid {
                if let Some(slot) = state.registry.get_mut(id) {
                    slot.in_call = true;
                }

                let funcs = state.registry.get_mut(id).and_then(|slot| slot.funcs.take());
                let user_data = state.registry.get_mut(id).and_then(|slot| slot.user_data.take());

                if let (Some(mut funcs), Some(mut user_data)) = (funcs, user_data) {
                    drop(state);

                    let result =
                        catch_unwind(AssertUnwindSafe(|| funcs.dispatch(now, user_data.as_mut())));

                    state = self.state.lock().unwrap();

                    match result {
                        Ok(keep) => {
                            if let Some(slot) = state.registry.get_mut(id) {
                                slot.in_call = false;
                                if keep {
                                    slot.funcs = Some(funcs);
                                }
                                // Put `user_data` back regardless: on the
                                // `keep` path the source stays alive and
                                // needs it for its next dispatch; on the
                                // destroy path `try_reap` needs it to hand
                                // to the `destroy` notifier (§3 Lifecycle,
                                // §8 testable property 6).
                                slot.user_data = Some(user_data);
                            }
                            if !keep {
                                state.registry.remove(id);
                            }
                        }
                        Err(_) => {
                            log::warn!("source panicked during dispatch; destroying it");
                            if let Some(slot) = state.registry.get_mut(id) {
                                slot.in_call = false;
                                slot.user_data = Some(user_data);
                            }
                            state.registry.remove(id);
                        }
                    }
                } else if let Some(slot) = state.registry.get_mut(id) {
                    slot.in_call = false;
                }
            }

            state.registry.release(id);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFuncs {
        fire_after: Option<Duration>,
        dispatch_count: Arc<AtomicUsize>,
    }

    impl SourceFuncs for CountingFuncs {
        fn prepare(&mut self, _now: Instant) -> (bool, Option<Duration>) {
            match self.fire_after {
                Some(d) => (false, Some(d)),
                None => (true, None),
            }
        }

        fn check(&mut self, _now: Instant) -> bool {
            true
        }

        fn dispatch(&mut self, _now: Instant, _user_data: &mut dyn Any) -> bool {
            self.dispatch_count.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    #[test]
    fn immediately_ready_source_dispatches_once() {
        let ctx = MainContext::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        ctx.source_add(
            0,
            false,
            Box::new(CountingFuncs {
                fire_after: None,
                dispatch_count: count.clone(),
            }),
            Box::new(()),
            None,
        );

        let ran = ctx.iterate(false, true).unwrap();
        assert!(ran);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.source_count(), 0);
    }

    #[test]
    fn non_blocking_iterate_with_nothing_ready_returns_false() {
        let ctx = MainContext::new().unwrap();
        let ran = ctx.iterate(false, true).unwrap();
        assert!(!ran);
    }

    /// §8 testable property 6, exercised on the path that doesn't go through
    /// a dispatch at all: an explicit `source_remove` on a source nobody is
    /// currently inspecting must still run the destroy notifier exactly
    /// once, immediately (no outstanding reference is left to hide behind).
    #[test]
    fn explicit_source_remove_runs_destroy_notifier_immediately() {
        let ctx = MainContext::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        let id = ctx.source_add(
            0,
            false,
            Box::new(CountingFuncs {
                fire_after: Some(Duration::from_secs(60)),
                dispatch_count: Arc::new(AtomicUsize::new(0)),
            }),
            Box::new(()),
            Some(Box::new(move |_ud| {
                calls2.fetch_add(1, Ordering::SeqCst);
            })),
        );

        assert_eq!(ctx.source_count(), 1);
        assert!(ctx.source_remove(id));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.source_count(), 0);
    }

    /// §8 testable property 6 / scenario S1, exercised on the dispatch path
    /// this time: a source that destroys itself by returning `false` from
    /// `dispatch` must still run its `destroy` notifier exactly once, with
    /// the original `user_data`.
    #[test]
    fn self_destroying_dispatch_runs_destroy_notifier_once() {
        let ctx = MainContext::new().unwrap();
        let dispatch_count = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        ctx.source_add(
            0,
            false,
            Box::new(CountingFuncs {
                fire_after: None,
                dispatch_count: dispatch_count.clone(),
            }),
            Box::new(42i32) as Box<dyn Any + Send>,
            Some(Box::new(move |ud| {
                assert_eq!(*ud.downcast::<i32>().unwrap(), 42);
                calls2.fetch_add(1, Ordering::SeqCst);
            })),
        );

        assert!(ctx.iterate(false, true).unwrap());
        assert_eq!(dispatch_count.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.source_count(), 0);
    }

    /// §8 scenario S3: an embedder-defined source built on the raw
    /// `poll_add` primitive (fd-watch sources themselves are out of this
    /// crate's scope, §1, but the primitive they're built from is not).
    /// Dispatches exactly once per byte written, then goes quiet.
    #[test]
    fn fd_readiness_via_poll_add_and_shared_ready() {
        use std::io::{Read, Write};
        use std::os::unix::net::UnixStream;

        struct ReadableWatch {
            stream: UnixStream,
            revents: SharedReady,
            reads: Arc<AtomicUsize>,
        }

        impl SourceFuncs for ReadableWatch {
            fn prepare(&mut self, _now: Instant) -> (bool, Option<Duration>) {
                (false, None)
            }

            fn check(&mut self, _now: Instant) -> bool {
                self.revents.get().is_readable()
            }

            fn dispatch(&mut self, _now: Instant, _user_data: &mut dyn Any) -> bool {
                let mut buf = [0u8; 1];
                let _ = self.stream.read(&mut buf);
                self.reads.fetch_add(1, Ordering::SeqCst);
                true
            }
        }

        let ctx = MainContext::new().unwrap();
        let (mut a, b) = UnixStream::pair().unwrap();
        let fd = b.as_raw_fd();
        let revents = ctx.poll_add(0, fd, Ready::readable());

        let reads = Arc::new(AtomicUsize::new(0));
        ctx.source_add(
            0,
            false,
            Box::new(ReadableWatch {
                stream: b,
                revents,
                reads: reads.clone(),
            }),
            Box::new(()),
            None,
        );

        // Nothing written yet: no dispatch.
        assert!(!ctx.iterate(false, true).unwrap());
        assert_eq!(reads.load(Ordering::SeqCst), 0);

        a.write_all(b"x").unwrap();
        assert!(ctx.iterate(true, true).unwrap());
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        // Byte consumed: a second iteration finds nothing pending.
        assert!(!ctx.iterate(false, true).unwrap());
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        ctx.poll_remove(fd);
    }
}
