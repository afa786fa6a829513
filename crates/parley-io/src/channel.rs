use std::{
    io::{self, Read, Write},
    os::fd::{AsRawFd, RawFd},
};

use crate::{ByteQueue, Drain, EventLoop, Fill, Line};

/// Transport for the process console: raw reads from stdin, raw writes to
/// stdout. Bypasses the standard library's locking and buffering so the
/// readiness discipline of the event loop stays authoritative.
pub struct Stdio;

impl Read for Stdio {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe { libc::read(libc::STDIN_FILENO, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 { Err(io::Error::last_os_error()) } else { Ok(n as usize) }
    }
}

impl Write for Stdio {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::write(libc::STDOUT_FILENO, buf.as_ptr().cast(), buf.len()) };
        if n < 0 { Err(io::Error::last_os_error()) } else { Ok(n as usize) }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A pair of byte queues bound to one transport: buffered input with line
/// tokenization, buffered output drained on writable-readiness.
pub struct Channel<T> {
    io: T,
    read_fd: RawFd,
    write_fd: RawFd,
    input: ByteQueue,
    output: ByteQueue,
}

impl Channel<Stdio> {
    pub fn console() -> Self {
        Self::new(Stdio, libc::STDIN_FILENO, libc::STDOUT_FILENO, b'\n')
    }
}

impl<T: Read + Write> Channel<T> {
    pub fn new(io: T, read_fd: RawFd, write_fd: RawFd, separator: u8) -> Self {
        Self {
            io,
            read_fd,
            write_fd,
            input: ByteQueue::new(separator),
            output: ByteQueue::new(separator),
        }
    }

    /// Channel over a connected socket: one descriptor serves both
    /// directions.
    pub fn from_socket(io: T) -> Self
    where
        T: AsRawFd,
    {
        let fd = io.as_raw_fd();
        Self::new(io, fd, fd, b'\n')
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    pub fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    pub fn pending_output(&self) -> usize {
        self.output.size()
    }

    /// Fill the input queue if the descriptor is ready; otherwise assert read
    /// interest and report `WouldBlock`.
    pub fn read(&mut self, ev: &mut EventLoop) -> io::Result<Fill> {
        if !ev.is_readable(self.read_fd) {
            ev.want_read(self.read_fd);
            return Ok(Fill::WouldBlock);
        }
        self.input.fill_from(&mut self.io)
    }

    /// Drain the output queue if the descriptor is ready. Write interest is
    /// held exactly while bytes remain queued.
    pub fn write(&mut self, ev: &mut EventLoop) -> io::Result<Drain> {
        if !ev.is_writable(self.write_fd) {
            if !self.output.is_empty() {
                ev.want_write(self.write_fd);
            }
            return Ok(Drain::WouldBlock);
        }
        let outcome = self.output.drain_into(&mut self.io)?;
        if self.output.is_empty() {
            ev.drop_write(self.write_fd);
        } else {
            ev.want_write(self.write_fd);
        }
        Ok(outcome)
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.output.put(bytes);
    }

    pub fn pull_line(&mut self, reserve: usize) -> Option<Line> {
        self.input.pull_line(reserve)
    }

    /// Keep the write-interest invariant: bytes enqueued after this
    /// channel's drain ran still wake the next `wait`.
    pub fn arm_pending(&mut self, ev: &mut EventLoop) {
        if !self.output.is_empty() {
            ev.want_write(self.write_fd);
        }
    }

    /// Exit-time best effort: one drain attempt regardless of readiness.
    pub fn flush_once(&mut self) {
        let _ = self.output.drain_into(&mut self.io);
    }

    /// Drop every interest this channel holds. Must precede closing the
    /// transport.
    pub fn release(&mut self, ev: &mut EventLoop) {
        ev.release(self.read_fd);
        if self.write_fd != self.read_fd {
            ev.release(self.write_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    fn pair() -> (Channel<UnixStream>, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (Channel::from_socket(a), b)
    }

    #[test]
    fn write_waits_for_readiness_then_drains() {
        let mut ev = EventLoop::new().unwrap();
        let (mut chan, mut peer) = pair();

        chan.push(b"hello over the pair\n");
        assert_eq!(chan.write(&mut ev).unwrap(), Drain::WouldBlock);

        ev.wait().unwrap();
        assert!(ev.is_writable(chan.write_fd()));
        assert_eq!(chan.write(&mut ev).unwrap(), Drain::Wrote(20));
        assert_eq!(chan.pending_output(), 0);

        let mut got = [0u8; 64];
        let n = peer.read(&mut got).unwrap();
        assert_eq!(&got[..n], b"hello over the pair\n");
    }

    #[test]
    fn read_yields_lines_then_eof() {
        let mut ev = EventLoop::new().unwrap();
        let (mut chan, mut peer) = pair();

        peer.write_all(b"first\nsecond\r\n").unwrap();
        assert_eq!(chan.read(&mut ev).unwrap(), Fill::WouldBlock);
        ev.wait().unwrap();
        assert_eq!(chan.read(&mut ev).unwrap(), Fill::Read(14));

        assert_eq!(chan.pull_line(0).unwrap().payload(), b"first\n");
        assert_eq!(chan.pull_line(0).unwrap().payload(), b"second\n");
        assert!(chan.pull_line(0).is_none());

        drop(peer);
        ev.wait().unwrap();
        assert_eq!(chan.read(&mut ev).unwrap(), Fill::Eof);
    }
}
