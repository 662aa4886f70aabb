//! `poll(2)` backed [`Poller`].

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use mk_core::platform::Poller;
use mk_core::{Error, IoHandle, NotifierModes, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use parking_lot::Mutex;

/// Poller watching file descriptors with `poll(2)`.
///
/// Wakes go through a socket pair: [`Poller::wake`] writes a byte, so a wake
/// issued while nobody waits stays pending until the next [`Poller::wait`]
/// drains it.
pub struct PollPoller {
    watched: Mutex<HashMap<IoHandle, NotifierModes>>,
    ready: Mutex<Vec<(IoHandle, NotifierModes)>>,
    wake_rx: UnixStream,
    wake_tx: UnixStream,
}

impl PollPoller {
    pub fn new() -> io::Result<Self> {
        let (wake_rx, wake_tx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        wake_tx.set_nonblocking(true)?;
        Ok(Self {
            watched: Mutex::new(HashMap::new()),
            ready: Mutex::new(Vec::new()),
            wake_rx,
            wake_tx,
        })
    }

    /// Handles currently watched.
    pub fn watched_count(&self) -> usize {
        self.watched.lock().len()
    }

    /// Polls the watched handles, plus the wake channel when `with_wake` is
    /// set, and records what is ready. Returns whether a wake was seen.
    fn poll_once(&self, timeout: PollTimeout, with_wake: bool) -> bool {
        let watched: Vec<(IoHandle, NotifierModes)> = self
            .watched
            .lock()
            .iter()
            .map(|(handle, modes)| (*handle, *modes))
            .collect();

        let mut fds: Vec<PollFd<'_>> = Vec::with_capacity(watched.len() + 1);
        for (handle, modes) in &watched {
            // SAFETY: registered descriptors stay open until unregistered;
            // the borrow lives only for this call.
            let fd = unsafe { BorrowedFd::borrow_raw(handle.0 as RawFd) };
            fds.push(PollFd::new(fd, to_poll_flags(*modes)));
        }
        if with_wake {
            fds.push(PollFd::new(self.wake_rx.as_fd(), PollFlags::POLLIN));
        }
        if fds.is_empty() {
            return false;
        }

        match poll(&mut fds, timeout) {
            Ok(_) => {}
            Err(Errno::EINTR) => return false,
            Err(err) => {
                log::warn!("poll failed: {err}");
                return false;
            }
        }

        let mut ready = Vec::new();
        for ((handle, modes), fd) in watched.iter().zip(fds.iter()) {
            let Some(revents) = fd.revents() else {
                continue;
            };
            if revents.contains(PollFlags::POLLNVAL) {
                log::warn!("watched handle {handle:?} is not open");
                continue;
            }
            let fired = from_poll_flags(revents) & *modes;
            if !fired.is_empty() {
                ready.push((*handle, fired));
            }
        }
        let woken = with_wake
            && fds
                .last()
                .and_then(PollFd::revents)
                .is_some_and(|revents| revents.intersects(PollFlags::POLLIN));
        drop(fds);

        *self.ready.lock() = ready;
        if woken {
            self.drain_wakes();
        }
        woken
    }

    fn drain_wakes(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.wake_rx).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

impl Poller for PollPoller {
    fn supported_modes(&self) -> NotifierModes {
        NotifierModes::all()
    }

    fn register(&self, handle: IoHandle, modes: NotifierModes) -> Result<()> {
        if handle.0 < 0 || handle.0 > i64::from(RawFd::MAX) {
            return Err(Error::InvalidArgument(format!("{handle:?} is not a file descriptor")));
        }
        if handle.0 == i64::from(self.wake_rx.as_raw_fd()) {
            return Err(Error::InvalidArgument(format!("{handle:?} is reserved by the poller")));
        }
        log::trace!("watching {handle:?} for {modes:?}");
        self.watched.lock().insert(handle, modes);
        Ok(())
    }

    fn unregister(&self, handle: IoHandle) {
        self.watched.lock().remove(&handle);
        self.ready.lock().retain(|(ready, _)| *ready != handle);
    }

    fn wait(&self, timeout: Option<Duration>) {
        let timeout = match timeout {
            None => PollTimeout::NONE,
            Some(timeout) => PollTimeout::from(timeout_millis(timeout)),
        };
        self.poll_once(timeout, true);
    }

    fn wake(&self) {
        match (&self.wake_tx).write(&[1]) {
            Ok(_) => {}
            // A full buffer already holds a pending wake.
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => log::warn!("poller wake failed: {err}"),
        }
    }

    fn poll_ready(&self) {
        self.poll_once(PollTimeout::ZERO, false);
    }

    fn has_ready(&self) -> bool {
        !self.ready.lock().is_empty()
    }

    fn take_ready(&self) -> Vec<(IoHandle, NotifierModes)> {
        core::mem::take(&mut *self.ready.lock())
    }
}

/// Whole milliseconds covering `timeout`, rounded up so a short wait still
/// sleeps instead of spinning.
fn timeout_millis(timeout: Duration) -> u16 {
    timeout
        .as_nanos()
        .div_ceil(1_000_000)
        .min(u128::from(u16::MAX)) as u16
}

fn to_poll_flags(modes: NotifierModes) -> PollFlags {
    let mut flags = PollFlags::empty();
    if modes.contains(NotifierModes::READ) {
        flags |= PollFlags::POLLIN;
    }
    if modes.contains(NotifierModes::WRITE) {
        flags |= PollFlags::POLLOUT;
    }
    if modes.contains(NotifierModes::EXCEPTION) {
        flags |= PollFlags::POLLPRI;
    }
    // POLLERR is always reported.
    flags
}

fn from_poll_flags(flags: PollFlags) -> NotifierModes {
    let mut modes = NotifierModes::empty();
    if flags.intersects(PollFlags::POLLIN | PollFlags::POLLHUP) {
        modes |= NotifierModes::READ;
    }
    if flags.contains(PollFlags::POLLOUT) {
        modes |= NotifierModes::WRITE;
    }
    if flags.contains(PollFlags::POLLERR) {
        modes |= NotifierModes::ERROR;
    }
    if flags.contains(PollFlags::POLLPRI) {
        modes |= NotifierModes::EXCEPTION;
    }
    modes
}
