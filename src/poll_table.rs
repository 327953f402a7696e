use std::os::unix::io::RawFd;

use crate::poll_fd::PollFd;
use crate::ready::{Ready, SharedReady};

struct PollRecord {
    priority: i32,
    fd: RawFd,
    events: Ready,
    revents: SharedReady,
}

/// Priority-ordered table of registered descriptors (§4.2).
///
/// Kept as a flat `Vec` sorted by priority ascending, mirroring the flat
/// array the kernel multiplexer is handed each tick; the original's singly
/// linked list plus free-list is an implementation detail the `Vec` already
/// gets from the allocator, so no separate free-list is kept here.
#[derive(Default)]
pub(crate) struct PollTable {
    records: Vec<PollRecord>,
}

impl PollTable {
    pub fn new() -> PollTable {
        PollTable {
            records: Vec::new(),
        }
    }

    /// Insert in priority order; ties go after existing equals (FIFO, §4.2).
    ///
    /// Returns a [`SharedReady`] handle the caller can read its own fd's
    /// `revents` from with no locking — see the doc comment on
    /// [`crate::context::MainContext::poll_add`] for why that matters.
    pub fn add(&mut self, priority: i32, fd: RawFd, events: Ready) -> SharedReady {
        let pos = self
            .records
            .iter()
            .position(|r| r.priority > priority)
            .unwrap_or(self.records.len());
        let revents = SharedReady::new();
        self.records.insert(
            pos,
            PollRecord {
                priority,
                fd,
                events,
                revents: revents.clone(),
            },
        );
        revents
    }

    /// Linear search by fd identity; the original's "pointer identity"
    /// becomes raw-fd equality here since we never hand out raw pointers.
    pub fn remove(&mut self, fd: RawFd) -> bool {
        if let Some(pos) = self.records.iter().position(|r| r.fd == fd) {
            self.records.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Build the flat array handed to the kernel multiplexer, restricted to
    /// records at or below `max_priority` when one is supplied (§4.4 phase 3
    /// priority gating); `None` means "include everything".
    pub fn build_poll_fds(&self, max_priority: Option<i32>) -> Vec<PollFd> {
        self.records
            .iter()
            .filter(|r| max_priority.map_or(true, |max| r.priority <= max))
            .map(|r| PollFd::new(r.fd, r.events))
            .collect()
    }

    /// Write `revents` back onto the records the poll syscall just touched.
    pub fn apply_results(&mut self, max_priority: Option<i32>, results: &[PollFd]) {
        let mut results = results.iter();
        for record in self
            .records
            .iter_mut()
            .filter(|r| max_priority.map_or(true, |max| r.priority <= max))
        {
            if let Some(res) = results.next() {
                record.revents.set(res.revents);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insertion_keeps_priority_order_ties_fifo() {
        let mut table = PollTable::new();
        table.add(5, 10, Ready::readable());
        table.add(0, 20, Ready::readable());
        table.add(5, 30, Ready::readable());

        let fds: Vec<RawFd> = table.records.iter().map(|r| r.fd).collect();
        assert_eq!(fds, vec![20, 10, 30]);
    }

    #[test]
    fn remove_by_fd() {
        let mut table = PollTable::new();
        table.add(0, 1, Ready::readable());
        table.add(0, 2, Ready::readable());
        assert!(table.remove(1));
        assert!(!table.remove(1));
        assert_eq!(table.records.len(), 1);
    }

    #[test]
    fn gating_excludes_lower_priority_records() {
        let mut table = PollTable::new();
        table.add(0, 1, Ready::readable());
        table.add(50, 2, Ready::readable());

        let fds = table.build_poll_fds(Some(0));
        assert_eq!(fds.len(), 1);
        assert_eq!(fds[0].fd, 1);
    }

    #[test]
    fn apply_results_is_visible_through_the_returned_handle() {
        let mut table = PollTable::new();
        let handle = table.add(0, 1, Ready::readable());
        assert!(!handle.get().is_readable());

        let results = table.build_poll_fds(None);
        let mut results = results;
        results[0].revents = Ready::readable();
        table.apply_results(None, &results);

        assert!(handle.get().is_readable());
    }
}
