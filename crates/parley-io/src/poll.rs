use std::{
    collections::{HashMap, HashSet},
    io,
    os::fd::RawFd,
};

use mio::{Events, Interest, Poll, Token, unix::SourceFd};
use tracing::error;

/// Readiness multiplexer owned by the process main loop.
///
/// Channels and transfers declare interest through the narrow
/// `want_read`/`want_write`/`drop_read`/`drop_write`/`release` API and query
/// the per-iteration ready sets themselves; there is no per-descriptor
/// callback table. Asserting interest on a descriptor that is already
/// registered re-registers it, which re-arms the kernel notification, so a
/// component that could not make progress simply re-asserts its bits and gets
/// woken on the next `wait`.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    interests: HashMap<RawFd, Interest>,
    readable: HashSet<RawFd>,
    writable: HashSet<RawFd>,
}

impl EventLoop {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(128),
            interests: HashMap::new(),
            readable: HashSet::new(),
            writable: HashSet::new(),
        })
    }

    /// Block until at least one registered descriptor is ready, then rebuild
    /// the ready sets for this iteration.
    pub fn wait(&mut self) -> io::Result<()> {
        loop {
            match self.poll.poll(&mut self.events, None) {
                Ok(()) => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }

        self.readable.clear();
        self.writable.clear();
        for event in self.events.iter() {
            let fd = event.token().0 as RawFd;
            if event.is_readable() || event.is_read_closed() {
                self.readable.insert(fd);
            }
            if event.is_writable() || event.is_write_closed() {
                self.writable.insert(fd);
            }
        }
        Ok(())
    }

    pub fn is_readable(&self, fd: RawFd) -> bool {
        self.readable.contains(&fd)
    }

    pub fn is_writable(&self, fd: RawFd) -> bool {
        self.writable.contains(&fd)
    }

    pub fn want_read(&mut self, fd: RawFd) {
        let interest = match self.interests.get(&fd) {
            Some(cur) if cur.is_writable() => Interest::READABLE | Interest::WRITABLE,
            _ => Interest::READABLE,
        };
        self.update(fd, interest);
    }

    pub fn want_write(&mut self, fd: RawFd) {
        let interest = match self.interests.get(&fd) {
            Some(cur) if cur.is_readable() => Interest::READABLE | Interest::WRITABLE,
            _ => Interest::WRITABLE,
        };
        self.update(fd, interest);
    }

    pub fn drop_read(&mut self, fd: RawFd) {
        self.readable.remove(&fd);
        match self.interests.get(&fd) {
            Some(cur) if cur.is_writable() => self.update(fd, Interest::WRITABLE),
            Some(_) => self.release(fd),
            None => {}
        }
    }

    pub fn drop_write(&mut self, fd: RawFd) {
        self.writable.remove(&fd);
        match self.interests.get(&fd) {
            Some(cur) if cur.is_readable() => self.update(fd, Interest::READABLE),
            Some(_) => self.release(fd),
            None => {}
        }
    }

    /// Forget a descriptor entirely. Must be called before the owning socket
    /// or file is closed.
    pub fn release(&mut self, fd: RawFd) {
        self.readable.remove(&fd);
        self.writable.remove(&fd);
        if self.interests.remove(&fd).is_some()
            && let Err(err) = self.poll.registry().deregister(&mut SourceFd(&fd))
        {
            error!(fd, ?err, "deregister failed");
        }
    }

    fn update(&mut self, fd: RawFd, interest: Interest) {
        let res = if self.interests.contains_key(&fd) {
            self.poll.registry().reregister(&mut SourceFd(&fd), Token(fd as usize), interest)
        } else {
            self.poll.registry().register(&mut SourceFd(&fd), Token(fd as usize), interest)
        };
        match res {
            Ok(()) => {
                self.interests.insert(fd, interest);
            }
            Err(err) => error!(fd, ?err, "interest update failed"),
        }
    }
}

/// Toggle O_NONBLOCK on an arbitrary descriptor (used for the standard
/// streams, which are inherited in blocking mode).
pub fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    let flags =
        if nonblocking { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
