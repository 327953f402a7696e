use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::{fmt, ops};

/// A set of readiness bits carried on a [`PollFd`](crate::poll_fd::PollFd).
///
/// Mirrors the `revents`/`events` bitmask the kernel `poll(2)` syscall uses:
/// readable and writable are the only two bits every platform actually
/// honors, `error` and `hup` are hints.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Ready(usize);

const READABLE: usize = 0b0001;
const WRITABLE: usize = 0b0010;
const ERROR: usize = 0b0100;
const HUP: usize = 0b1000;

impl Ready {
    #[inline]
    pub fn empty() -> Ready {
        Ready(0)
    }

    #[inline]
    pub fn readable() -> Ready {
        Ready(READABLE)
    }

    #[inline]
    pub fn writable() -> Ready {
        Ready(WRITABLE)
    }

    #[inline]
    pub fn error() -> Ready {
        Ready(ERROR)
    }

    #[inline]
    pub fn hup() -> Ready {
        Ready(HUP)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self == Ready::empty()
    }

    #[inline]
    pub fn is_readable(self) -> bool {
        self.contains(Ready::readable())
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        self.contains(Ready::writable())
    }

    #[inline]
    pub fn is_error(self) -> bool {
        self.contains(Ready::error())
    }

    #[inline]
    pub fn is_hup(self) -> bool {
        self.contains(Ready::hup())
    }

    #[inline]
    pub fn contains(self, other: Ready) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Ready) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Ready) {
        self.0 &= !other.0;
    }
}

impl ops::BitOr for Ready {
    type Output = Ready;

    #[inline]
    fn bitor(self, other: Ready) -> Ready {
        Ready(self.0 | other.0)
    }
}

impl ops::BitAnd for Ready {
    type Output = Ready;

    #[inline]
    fn bitand(self, other: Ready) -> Ready {
        Ready(self.0 & other.0)
    }
}

impl ops::BitOrAssign for Ready {
    #[inline]
    fn bitor_assign(&mut self, other: Ready) {
        self.0 |= other.0;
    }
}

/// A lock-free handle onto one descriptor's most recent `revents` (§4.2).
///
/// [`crate::context::MainContext::poll_add`] hands one of these back to the
/// caller and the poll table writes into its atomic directly during
/// `apply_results`, under the lock the iteration driver already holds. A
/// `SourceFuncs::check` reading it back needs no lock of its own — which
/// matters, since `check` itself runs with that same lock held (§5).
#[derive(Clone, Default, Debug)]
pub struct SharedReady(Arc<AtomicU8>);

impl SharedReady {
    pub fn new() -> SharedReady {
        SharedReady(Arc::new(AtomicU8::new(0)))
    }

    pub fn get(&self) -> Ready {
        Ready(self.0.load(Ordering::Acquire) as usize)
    }

    pub(crate) fn set(&self, ready: Ready) {
        self.0.store(ready.0 as u8, Ordering::Release);
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        let flags = [
            (Ready::readable(), "Readable"),
            (Ready::writable(), "Writable"),
            (Ready::error(), "Error"),
            (Ready::hup(), "Hup"),
        ];

        for &(flag, msg) in &flags {
            if self.contains(flag) && !flag.is_empty() {
                if one {
                    write!(fmt, " | ")?
                }
                write!(fmt, "{}", msg)?;
                one = true;
            }
        }

        if !one {
            write!(fmt, "(empty)")?;
        }

        Ok(())
    }
}
