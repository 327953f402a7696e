use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::sys::EventFd;

/// The wake-up channel: an eventfd always present in the poll set at
/// priority 0, written whenever a source is added while the loop is
/// blocked in the kernel (§4.3).
#[derive(Debug)]
pub struct Awakener {
    inner: EventFd,
}

impl Awakener {
    pub fn new() -> io::Result<Awakener> {
        Ok(Awakener {
            inner: EventFd::new()?,
        })
    }

    /// Write one wake-up to the channel. Tolerates `WouldBlock`, which means
    /// a wake-up is already pending and the kernel wait will return anyway.
    pub fn wakeup(&self) -> io::Result<()> {
        match self.inner.write(1) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drain one pending wake-up after the poll syscall returns.
    pub fn drain(&self) -> io::Result<()> {
        match self.inner.read() {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl AsRawFd for Awakener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod test {
    use super::Awakener;

    #[test]
    fn wakeup_then_drain() {
        let awakener = Awakener::new().unwrap();
        awakener.wakeup().unwrap();
        awakener.drain().unwrap();
    }

    #[test]
    fn drain_without_wakeup_does_not_block() {
        let awakener = Awakener::new().unwrap();
        awakener.drain().unwrap();
    }
}
