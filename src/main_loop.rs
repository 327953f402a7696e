use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::MainContext;

/// A run/quit wrapper around a [`MainContext`] (§4.5).
///
/// The quit flag lives on the `MainLoop`, not the context, so a dispatch
/// callback can start a nested `MainLoop` over the same context: the inner
/// loop gets its own flag, and quitting it doesn't touch the outer one's.
pub struct MainLoop {
    context: Arc<MainContext>,
    quit: AtomicBool,
}

impl MainLoop {
    pub fn new(context: Arc<MainContext>) -> MainLoop {
        MainLoop {
            context,
            quit: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<MainContext> {
        &self.context
    }

    /// Iterate until [`MainLoop::quit`] is called. Each iteration blocks for
    /// as long as the registered sources allow.
    pub fn run(&self) -> io::Result<()> {
        self.quit.store(false, Ordering::SeqCst);
        while !self.quit.load(Ordering::SeqCst) {
            self.context.iterate(true, true)?;
        }
        Ok(())
    }

    /// Ask [`MainLoop::run`] to stop after its current iteration. Safe to
    /// call from within a dispatch callback or from another thread.
    pub fn quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        !self.quit.load(Ordering::SeqCst)
    }
}
