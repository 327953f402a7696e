use std::convert::TryInto;
use std::io;
use std::time::Duration;

use crate::poll_fd::{poll_to_ready, ready_to_poll, PollFd};

/// The pluggable kernel multiplexer: `(fds, timeout) -> number ready`.
///
/// The default implementation is a thin wrapper over `libc::poll`. Embedders
/// may swap it for anything else with the same contract via
/// [`crate::context::MainContext::set_poll_func`].
pub type PollFn = dyn Fn(&mut [PollFd], Option<Duration>) -> io::Result<usize> + Send + Sync;

/// Default multiplexer: a direct `poll(2)` call.
///
/// `EINTR` is swallowed and reported as zero ready descriptors rather than an
/// error, since a signal interrupting the wait is not a failure the caller
/// should see — the next iteration simply polls again.
pub fn poll(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
    let timeout_ms = timeout
        .map(|to| std::cmp::min(to.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
        .unwrap_or(-1);

    let mut raw: Vec<libc::pollfd> = fds
        .iter()
        .map(|pfd| libc::pollfd {
            fd: pfd.fd,
            events: ready_to_poll(pfd.events),
            revents: 0,
        })
        .collect();

    let ret = unsafe {
        libc::poll(
            raw.as_mut_ptr(),
            raw.len().try_into().unwrap(),
            timeout_ms,
        )
    };

    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
        return Ok(0);
    }

    for (pfd, raw) in fds.iter_mut().zip(raw.iter()) {
        pfd.revents = poll_to_ready(raw.revents);
    }

    Ok(ret as usize)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ready::Ready;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    #[test]
    fn no_fds_times_out() {
        let mut fds: [PollFd; 0] = [];
        let n = poll(&mut fds, Some(Duration::from_millis(10))).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn readable_socket_is_reported() {
        let (mut a, b) = UnixStream::pair().unwrap();
        a.write_all(b"x").unwrap();

        let mut fds = [PollFd::new(b.as_raw_fd(), Ready::readable())];
        let n = poll(&mut fds, Some(Duration::from_millis(100))).unwrap();
        assert_eq!(n, 1);
        assert!(fds[0].revents.is_readable());
    }
}
