//! Readiness polling over registered descriptors
//!
//! A minimal register/unregister/wait facade over poll(2). Level
//! triggered: a descriptor with unread bytes keeps reporting readable
//! until it is drained.

use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

pub(crate) struct ReadPoller {
    fds: Vec<RawFd>,
}

impl ReadPoller {
    pub fn new() -> Self {
        Self { fds: Vec::new() }
    }

    pub fn register(&mut self, fd: RawFd) {
        if !self.fds.contains(&fd) {
            self.fds.push(fd);
        }
    }

    pub fn unregister(&mut self, fd: RawFd) {
        self.fds.retain(|&f| f != fd);
    }

    /// Wait for readability on any registered descriptor, bounded by the
    /// timeout. Returns the descriptors that reported readable. With no
    /// descriptors registered the call still sleeps for the timeout so
    /// callers keep their command-check cadence without busy-spinning.
    pub fn wait(&self, timeout: Duration) -> io::Result<Vec<RawFd>> {
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        if self.fds.is_empty() {
            std::thread::sleep(Duration::from_millis(u64::from(millis)));
            return Ok(Vec::new());
        }
        // The registry owning these descriptors outlives the wait, so
        // borrowing the raw fds for the duration of the call is sound.
        let mut poll_fds: Vec<PollFd> = self
            .fds
            .iter()
            .map(|&fd| PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN))
            .collect();
        match poll(&mut poll_fds, PollTimeout::from(millis)) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(Vec::new()),
            Err(e) => return Err(io::Error::from(e)),
        }
        let ready = poll_fds
            .iter()
            .zip(self.fds.iter())
            .filter(|(pfd, _)| {
                pfd.revents()
                    .unwrap_or(PollFlags::empty())
                    .intersects(PollFlags::POLLIN)
            })
            .map(|(_, &fd)| fd)
            .collect();
        Ok(ready)
    }
}
