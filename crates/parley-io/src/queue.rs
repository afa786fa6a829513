use std::{
    collections::VecDeque,
    io::{self, Read, Write},
};

use crate::line::Line;

const CHUNK_SIZE: usize = 256;

/// One fixed-capacity slab of the queue. Live bytes are `data[start..end]`;
/// only the first chunk of a queue may have `start > 0` and only the last may
/// be partially filled.
struct Chunk {
    data: Box<[u8; CHUNK_SIZE]>,
    start: usize,
    end: usize,
}

impl Chunk {
    fn new() -> Self {
        Self { data: Box::new([0; CHUNK_SIZE]), start: 0, end: 0 }
    }

    fn len(&self) -> usize {
        self.end - self.start
    }

    fn room(&self) -> usize {
        CHUNK_SIZE - self.end
    }
}

/// Outcome of filling a queue from its descriptor.
#[derive(Debug, PartialEq, Eq)]
pub enum Fill {
    /// The descriptor was not ready; interest has been (re)asserted.
    WouldBlock,
    /// Clean end of stream with nothing buffered by this call.
    Eof,
    /// This many bytes were appended.
    Read(usize),
}

/// Outcome of draining a queue to its descriptor.
#[derive(Debug, PartialEq, Eq)]
pub enum Drain {
    /// The descriptor was not ready; interest stays asserted while bytes
    /// remain queued.
    WouldBlock,
    /// This many bytes were accepted by the descriptor.
    Wrote(usize),
}

/// Append-only chunked FIFO of bytes with separator-based tokenization.
///
/// The queue itself is transport-agnostic; the owning channel decides when
/// its descriptor is ready and hands the transport in for `fill_from` /
/// `drain_into`.
pub struct ByteQueue {
    chunks: VecDeque<Chunk>,
    size: usize,
    separator: u8,
}

impl ByteQueue {
    pub fn new(separator: u8) -> Self {
        Self { chunks: VecDeque::new(), size: 0, separator }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn separator(&self) -> u8 {
        self.separator
    }

    /// Read from `src` in chunk-sized batches until it reports end of stream,
    /// would-block, or a short read. Returns `Eof` only when nothing was
    /// appended by this call.
    pub fn fill_from<R: Read>(&mut self, src: &mut R) -> io::Result<Fill> {
        let mut total = 0;
        loop {
            if self.chunks.back().is_none_or(|c| c.room() == 0) {
                self.chunks.push_back(Chunk::new());
            }
            let chunk = self.chunks.back_mut().unwrap();
            let room = chunk.room();
            match src.read(&mut chunk.data[chunk.end..]) {
                Ok(0) => {
                    self.trim_empty_tail();
                    return if total == 0 { Ok(Fill::Eof) } else { Ok(Fill::Read(total)) };
                }
                Ok(n) => {
                    chunk.end += n;
                    self.size += n;
                    total += n;
                    if n < room {
                        // Short read: the descriptor has no more for now.
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.trim_empty_tail();
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    self.trim_empty_tail();
                    return Err(err);
                }
            }
        }
        if total == 0 { Ok(Fill::WouldBlock) } else { Ok(Fill::Read(total)) }
    }

    /// Stage every live byte contiguously and attempt a single write. The
    /// tail the descriptor did not accept is re-queued in order.
    pub fn drain_into<W: Write>(&mut self, dst: &mut W) -> io::Result<Drain> {
        if self.size == 0 {
            return Ok(Drain::Wrote(0));
        }
        let mut staging = vec![0u8; self.size];
        self.take(staging.len(), Some(&mut staging));
        loop {
            match dst.write(&staging) {
                Ok(n) => {
                    if n < staging.len() {
                        self.put(&staging[n..]);
                    }
                    return Ok(Drain::Wrote(n));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.put(&staging);
                    return Ok(Drain::WouldBlock);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    /// Length of the first token including its separator, or 0 when no
    /// complete token is buffered.
    pub fn token_size(&self) -> usize {
        let mut size = 0;
        for chunk in &self.chunks {
            for &byte in &chunk.data[chunk.start..chunk.end] {
                size += 1;
                if byte == self.separator {
                    return size;
                }
            }
        }
        0
    }

    /// Consume exactly `n` bytes from the head, optionally copying them out.
    /// Callers never ask for more than `size`.
    pub fn take(&mut self, n: usize, mut dst: Option<&mut [u8]>) {
        debug_assert!(n <= self.size);
        let mut remaining = n;
        let mut copied = 0;
        while remaining > 0 {
            let chunk = self.chunks.front_mut().expect("take beyond queue size");
            let step = remaining.min(chunk.len());
            if let Some(out) = dst.as_deref_mut() {
                out[copied..copied + step]
                    .copy_from_slice(&chunk.data[chunk.start..chunk.start + step]);
            }
            chunk.start += step;
            copied += step;
            remaining -= step;
            if chunk.len() == 0 {
                self.chunks.pop_front();
            }
        }
        self.size -= n;
    }

    /// Append bytes to the tail, growing the chunk list as needed.
    pub fn put(&mut self, data: &[u8]) {
        let mut offset = 0;
        while offset < data.len() {
            if self.chunks.back().is_none_or(|c| c.room() == 0) {
                self.chunks.push_back(Chunk::new());
            }
            let chunk = self.chunks.back_mut().unwrap();
            let step = (data.len() - offset).min(chunk.room());
            chunk.data[chunk.end..chunk.end + step]
                .copy_from_slice(&data[offset..offset + step]);
            chunk.end += step;
            offset += step;
        }
        self.size += data.len();
    }

    /// Pull the next non-blank line, reserving `reserve` writable bytes in
    /// front of the payload for in-place prefixing. A bare separator and a
    /// lone `\r\n` are dropped; a trailing `\r` before the separator is
    /// normalized away.
    pub fn pull_line(&mut self, reserve: usize) -> Option<Line> {
        loop {
            let len = self.token_size();
            if len == 0 {
                return None;
            }
            if len == 1 {
                // Bare separator.
                self.take(1, None);
                continue;
            }
            let mut buf = vec![0u8; reserve + len];
            self.take(len, Some(&mut buf[reserve..]));
            if len == 2 && buf[reserve] == b'\r' {
                continue;
            }
            if buf[reserve + len - 2] == b'\r' {
                buf[reserve + len - 2] = self.separator;
                buf.truncate(reserve + len - 1);
            }
            return Some(Line::new(buf, reserve));
        }
    }

    fn trim_empty_tail(&mut self) {
        if self.chunks.back().is_some_and(|c| c.len() == 0) {
            self.chunks.pop_back();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn put_then_take_preserves_order() {
        let mut q = ByteQueue::new(b'\n');
        let data: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        q.put(&data);
        assert_eq!(q.size(), data.len());

        let mut out = vec![0u8; 400];
        q.take(400, Some(&mut out));
        assert_eq!(out, data[..400]);

        let mut rest = vec![0u8; 600];
        q.take(600, Some(&mut rest));
        assert_eq!(rest, data[400..]);
        assert!(q.is_empty());
    }

    #[test]
    fn token_size_spans_chunks() {
        let mut q = ByteQueue::new(b'\n');
        let mut data = vec![b'x'; CHUNK_SIZE + 10];
        data.push(b'\n');
        data.extend_from_slice(b"tail");
        q.put(&data);
        assert_eq!(q.token_size(), CHUNK_SIZE + 11);
    }

    #[test]
    fn token_size_zero_without_separator() {
        let mut q = ByteQueue::new(b'\n');
        q.put(b"incomplete line");
        assert_eq!(q.token_size(), 0);
    }

    #[test]
    fn pull_line_normalizes_crlf() {
        let mut q = ByteQueue::new(b'\n');
        q.put(b"hello\r\n");
        let line = q.pull_line(0).unwrap();
        assert_eq!(line.payload(), b"hello\n");
        assert!(q.pull_line(0).is_none());
    }

    #[test]
    fn pull_line_drops_blank_lines() {
        let mut q = ByteQueue::new(b'\n');
        q.put(b"\n\r\nreal\n");
        let line = q.pull_line(0).unwrap();
        assert_eq!(line.payload(), b"real\n");
        assert!(q.pull_line(0).is_none());
    }

    #[test]
    fn pull_line_reserves_prefix() {
        let mut q = ByteQueue::new(b'\n');
        q.put(b"msg\n");
        let mut line = q.pull_line(7).unwrap();
        assert_eq!(line.payload(), b"msg\n");
        let full = line.fill_prefix(b"alice: ");
        assert_eq!(full, b"alice: msg\n");
    }

    #[test]
    fn pull_line_waits_for_complete_token() {
        let mut q = ByteQueue::new(b'\n');
        q.put(b"partial");
        assert!(q.pull_line(0).is_none());
        q.put(b" done\n");
        assert_eq!(q.pull_line(0).unwrap().payload(), b"partial done\n");
    }

    #[test]
    fn fill_reports_eof_only_when_nothing_read() {
        let mut q = ByteQueue::new(b'\n');
        let mut src = Cursor::new(b"abc".to_vec());
        assert_eq!(q.fill_from(&mut src).unwrap(), Fill::Read(3));
        assert_eq!(q.fill_from(&mut src).unwrap(), Fill::Eof);
    }

    #[test]
    fn drain_requeues_unwritten_tail() {
        struct Shorty(Vec<u8>);
        impl Write for Shorty {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                let n = buf.len().min(4);
                self.0.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut q = ByteQueue::new(b'\n');
        q.put(b"0123456789");
        let mut dst = Shorty(Vec::new());
        assert_eq!(q.drain_into(&mut dst).unwrap(), Drain::Wrote(4));
        assert_eq!(q.size(), 6);
        assert_eq!(q.drain_into(&mut dst).unwrap(), Drain::Wrote(4));
        assert_eq!(q.drain_into(&mut dst).unwrap(), Drain::Wrote(2));
        assert_eq!(dst.0, b"0123456789");
        assert!(q.is_empty());
    }
}
