use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    net::{TcpListener, TcpStream, ToSocketAddrs, UdpSocket},
    os::fd::AsRawFd,
};

use indexmap::IndexMap;
use parley_io::EventLoop;
use parley_proto::{RefuseReason, TransferMode, check_filename, new_id};
use rand::{SeedableRng, rngs::StdRng};
use tracing::debug;

use crate::session::Session;

/// Copy unit for both transports. Datagram payloads are one byte shorter,
/// leaving room for the header byte.
const COPY_BUF: usize = 1024;

/// Payload of the initiating datagram a receiving side sends so the sender
/// learns its address (and any NAT in between opens a mapping).
const HELLO: &[u8] = b"Arbitrary data to initiate transfer.";

const MSG_SUCCESS: &[u8] = b"File successfully transferred.\n";
const MSG_INVALID_NAME: &[u8] = b"Error: invalid filename.\n";
const MSG_FILE_EXISTS: &[u8] = b"Error: file already exists.\n";
const MSG_CANNOT_CREATE: &[u8] = b"Error: cannot create file.\n";
const MSG_CANNOT_OPEN: &[u8] = b"Error: cannot open file.\n";
const MSG_CONNECT_HOST: &[u8] = b"Error while connecting to host.\n";
const MSG_ACCEPTED: &[u8] = b"File transfer accepted.  Transfer initiated.\n";
const MSG_REFUSED: &[u8] = b"File transfer refused.\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Sending,
    Receiving,
}

/// Socket-side state of one transfer. The local file lives next to this in
/// the `Transfer`; it is the source when sending and the sink when
/// receiving.
enum Link {
    /// Waiting for the peer's `/accept` or `/refuse`.
    AwaitAccept,
    /// Target side, stream mode: listening for the initiator's connect.
    StreamRendezvous(TcpListener),
    /// Target side, datagram mode, sending role: unconnected socket waiting
    /// for the initiating datagram.
    DgramRendezvous(UdpSocket),
    /// Initiator side, datagram mode, receiving role: the initiating
    /// datagram has not been sent yet.
    DgramHello(UdpSocket),
    /// Established stream carrying the raw file bytes.
    Stream(TcpStream),
    /// Receiving datagrams until a short or final-headed one arrives.
    DgramRecv(UdpSocket),
    /// Sending one datagram per tick.
    DgramSend(UdpSocket),
    /// Final datagram sent; the next tick reports success and tears down.
    DgramDone(UdpSocket),
}

impl Link {
    fn socket_fd(&self) -> Option<i32> {
        match self {
            Self::AwaitAccept => None,
            Self::StreamRendezvous(l) => Some(l.as_raw_fd()),
            Self::DgramRendezvous(s)
            | Self::DgramHello(s)
            | Self::DgramRecv(s)
            | Self::DgramSend(s)
            | Self::DgramDone(s) => Some(s.as_raw_fd()),
            Self::Stream(s) => Some(s.as_raw_fd()),
        }
    }
}

/// What the tick decided for one transfer while its link was borrowed.
enum After {
    Keep,
    Finish,
    Accepted(TcpStream),
    DgramPeerFound,
    DgramFinalSent,
    HelloSent,
}

pub(crate) struct Transfer {
    pub mode: TransferMode,
    pub dir: Direction,
    pub peer: String,
    /// Peer-side filename, kept for console notes.
    pub name: String,
    file: File,
    link: Link,
}

impl Transfer {
    /// Re-assert the interest bits this transfer lives on. Runs once per
    /// tick for every surviving transfer, so an edge consumed without
    /// finishing the work (a buffered final datagram, an unread EOF, a
    /// writable socket at the file tail) is re-reported by the next wait.
    fn rearm(&self, ev: &mut EventLoop) {
        match &self.link {
            Link::AwaitAccept => {}
            Link::StreamRendezvous(listener) => ev.want_read(listener.as_raw_fd()),
            Link::DgramRendezvous(sock) | Link::DgramRecv(sock) => {
                ev.want_read(sock.as_raw_fd());
            }
            Link::DgramHello(sock) | Link::DgramSend(sock) | Link::DgramDone(sock) => {
                ev.want_write(sock.as_raw_fd());
            }
            Link::Stream(sock) => match self.dir {
                Direction::Receiving => ev.want_read(sock.as_raw_fd()),
                Direction::Sending => ev.want_write(sock.as_raw_fd()),
            },
        }
    }
}

/// Table of active transfers keyed by their 16-character id, plus the
/// session RNG the ids are drawn from.
pub struct Transfers {
    table: IndexMap<String, Transfer>,
    rng: StdRng,
}

impl Transfers {
    pub fn new() -> Self {
        Self { table: IndexMap::new(), rng: StdRng::from_os_rng() }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table.contains_key(id)
    }

    /// Draw an id unused in this table; a collision re-seeds the generator
    /// before trying again.
    fn fresh_id(&mut self) -> String {
        let mut id = new_id(&mut self.rng);
        while self.table.contains_key(&id) {
            self.rng = StdRng::from_os_rng();
            id = new_id(&mut self.rng);
        }
        id
    }

    fn insert(
        &mut self,
        peer: &str,
        name: &str,
        mode: TransferMode,
        dir: Direction,
        file: File,
        link: Link,
    ) -> String {
        let id = self.fresh_id();
        let transfer =
            Transfer { mode, dir, peer: peer.to_owned(), name: name.to_owned(), file, link };
        self.table.insert(id.clone(), transfer);
        id
    }

    /// Drop a transfer and every interest bit its sockets hold. The
    /// descriptors close when the transfer drops.
    fn remove(&mut self, ev: &mut EventLoop, id: &str) -> bool {
        let Some(transfer) = self.table.shift_remove(id) else { return false };
        if let Some(fd) = transfer.link.socket_fd() {
            ev.release(fd);
        }
        true
    }
}

impl Default for Transfers {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Read + Write> Session<C> {
    /// `/transfer peer:remote local` — ask `peer` for `remote`, storing it
    /// as `local`.
    pub(crate) fn req_receive(&mut self, peer: &str, remote: &str, local: &str) {
        if check_filename(remote).is_err() || check_filename(local).is_err() {
            self.console.push(MSG_INVALID_NAME);
            return;
        }
        let file = match OpenOptions::new().write(true).create_new(true).open(local) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                self.console.push(MSG_FILE_EXISTS);
                return;
            }
            Err(err) => {
                debug!(?err, local, "create for receive");
                self.console.push(MSG_CANNOT_CREATE);
                return;
            }
        };
        let id = self.transfers.insert(
            peer,
            remote,
            self.mode,
            Direction::Receiving,
            file,
            Link::AwaitAccept,
        );
        let line = format!("/receive {peer} {id} {} {remote}\n", self.mode.token());
        self.push_hub(line.as_bytes());
    }

    /// `/transfer local peer:remote` — push `local` to `peer` as `remote`.
    pub(crate) fn req_send(&mut self, peer: &str, remote: &str, local: &str) {
        if check_filename(remote).is_err() || check_filename(local).is_err() {
            self.console.push(MSG_INVALID_NAME);
            return;
        }
        let file = match File::open(local) {
            Ok(file) => file,
            Err(err) => {
                debug!(?err, local, "open for send");
                self.console.push(MSG_CANNOT_OPEN);
                return;
            }
        };
        let id = self.transfers.insert(
            peer,
            remote,
            self.mode,
            Direction::Sending,
            file,
            Link::AwaitAccept,
        );
        let line = format!("/send {peer} {id} {} {remote}\n", self.mode.token());
        self.push_hub(line.as_bytes());
    }

    /// A peer wants to pull `name` from us: open it, stand up a rendezvous
    /// socket, and accept.
    pub(crate) fn exec_receive(&mut self, from: &str, id: &str, mode: &str, name: &str) {
        let Some(mode) = TransferMode::from_token(mode) else {
            self.send_refuse(from, id, RefuseReason::Mode);
            return;
        };
        if check_filename(name).is_err() {
            self.send_refuse(from, id, RefuseReason::Name);
            return;
        }
        if self.forbid.contains(from) {
            self.console
                .push(format!("{from} attempted to get the `{name}' file.\n").as_bytes());
            self.send_refuse(from, id, RefuseReason::Forbid);
            return;
        }
        let file = match File::open(name) {
            Ok(file) => file,
            Err(err) => {
                debug!(?err, name, "open for peer");
                self.console
                    .push(format!("{from} attempted to get the `{name}' file.\n").as_bytes());
                self.send_refuse(from, id, RefuseReason::Open);
                return;
            }
        };
        let (link, port) = match rendezvous(&mut self.ev, mode, Direction::Sending) {
            Ok(bound) => bound,
            Err(err) => {
                debug!(?err, "rendezvous socket");
                self.send_refuse(from, id, RefuseReason::Intern);
                return;
            }
        };
        self.console.push(format!("{from} is getting the `{name}' file.\n").as_bytes());
        let own_id =
            self.transfers.insert(from, name, mode, Direction::Sending, file, link);
        self.push_hub(format!("/accept {from} {id} {own_id} {port}\n").as_bytes());
    }

    /// A peer wants to push `name` to us: create it, stand up a rendezvous
    /// socket, and accept. Creation and refusal are mutually exclusive; a
    /// pre-existing file refuses without touching the filesystem.
    pub(crate) fn exec_send(&mut self, from: &str, id: &str, mode: &str, name: &str) {
        let Some(mode) = TransferMode::from_token(mode) else {
            self.send_refuse(from, id, RefuseReason::Mode);
            return;
        };
        if check_filename(name).is_err() {
            self.send_refuse(from, id, RefuseReason::Name);
            return;
        }
        if self.forbid.contains(from) {
            self.console
                .push(format!("{from} attempted to send the `{name}' file.\n").as_bytes());
            self.send_refuse(from, id, RefuseReason::Forbid);
            return;
        }
        let file = match OpenOptions::new().write(true).create_new(true).open(name) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                self.send_refuse(from, id, RefuseReason::Exists);
                return;
            }
            Err(err) => {
                debug!(?err, name, "create for peer");
                self.send_refuse(from, id, RefuseReason::Create);
                return;
            }
        };
        let (link, port) = match rendezvous(&mut self.ev, mode, Direction::Receiving) {
            Ok(bound) => bound,
            Err(err) => {
                debug!(?err, "rendezvous socket");
                self.send_refuse(from, id, RefuseReason::Intern);
                return;
            }
        };
        self.console.push(format!("{from} is sending the `{name}' file.\n").as_bytes());
        let own_id =
            self.transfers.insert(from, name, mode, Direction::Receiving, file, link);
        self.push_hub(format!("/accept {from} {id} {own_id} {port}\n").as_bytes());
    }

    /// The peer accepted: connect to its rendezvous socket and start the
    /// bulk phase.
    pub(crate) fn exec_accept(
        &mut self,
        from: &str,
        own_id: &str,
        peer_id: &str,
        host: &str,
        port: &str,
    ) {
        if !self.transfers.contains(own_id) {
            self.send_refuse(from, peer_id, RefuseReason::Id);
            return;
        }

        let addr = port
            .parse::<u16>()
            .ok()
            .and_then(|port| (host, port).to_socket_addrs().ok())
            .and_then(|addrs| addrs.into_iter().find(std::net::SocketAddr::is_ipv4));
        let Some(addr) = addr else {
            self.console.push(MSG_CONNECT_HOST);
            self.send_refuse(from, peer_id, RefuseReason::Host);
            self.transfers.remove(&mut self.ev, own_id);
            return;
        };

        let (mode, dir) = {
            let transfer = &self.transfers.table[own_id];
            (transfer.mode, transfer.dir)
        };

        let link = match mode {
            TransferMode::Stream => match TcpStream::connect(addr)
                .and_then(|sock| sock.set_nonblocking(true).map(|()| sock))
            {
                Ok(sock) => {
                    let fd = sock.as_raw_fd();
                    match dir {
                        Direction::Receiving => self.ev.want_read(fd),
                        Direction::Sending => self.ev.want_write(fd),
                    }
                    Link::Stream(sock)
                }
                Err(err) => {
                    debug!(?err, "transfer connect");
                    self.console.push(MSG_CONNECT_HOST);
                    self.send_refuse(from, peer_id, RefuseReason::Connect);
                    self.transfers.remove(&mut self.ev, own_id);
                    return;
                }
            },
            TransferMode::Datagram => {
                let connected = UdpSocket::bind(("0.0.0.0", 0)).and_then(|sock| {
                    sock.connect(addr)?;
                    sock.set_nonblocking(true)?;
                    Ok(sock)
                });
                match connected {
                    Ok(sock) => {
                        let fd = sock.as_raw_fd();
                        self.ev.want_write(fd);
                        match dir {
                            // The receiving end speaks first: an initiating
                            // datagram tells the sender where we are.
                            Direction::Receiving => Link::DgramHello(sock),
                            Direction::Sending => Link::DgramSend(sock),
                        }
                    }
                    Err(err) => {
                        debug!(?err, "transfer connect");
                        self.console.push(MSG_CONNECT_HOST);
                        self.send_refuse(from, peer_id, RefuseReason::Connect);
                        self.transfers.remove(&mut self.ev, own_id);
                        return;
                    }
                }
            }
        };

        if let Some(transfer) = self.transfers.table.get_mut(own_id) {
            transfer.link = link;
        }
        self.console.push(MSG_ACCEPTED);
    }

    /// The peer refused: drop the transfer if we still track it.
    pub(crate) fn exec_refuse(&mut self, id: &str) {
        self.transfers.remove(&mut self.ev, id);
        self.console.push(MSG_REFUSED);
    }

    fn send_refuse(&mut self, nick: &str, id: &str, reason: RefuseReason) {
        self.push_hub(format!("/refuse {nick} {id} {}\n", reason.token()).as_bytes());
    }

    /// Advance every active transfer once. A hard I/O failure on the bulk
    /// path aborts the whole loop.
    pub(crate) fn tick_transfers(&mut self) -> io::Result<()> {
        let ids: Vec<String> = self.transfers.table.keys().cloned().collect();
        for id in ids {
            let Some(transfer) = self.transfers.table.get_mut(&id) else { continue };
            let ev = &mut self.ev;

            let after = match &mut transfer.link {
                Link::AwaitAccept => After::Keep,

                // Bootstrap: fire the initiating datagram, then listen for
                // data.
                Link::DgramHello(sock) => {
                    let fd = sock.as_raw_fd();
                    match sock.send(HELLO) {
                        Ok(_) => {
                            ev.drop_write(fd);
                            ev.want_read(fd);
                            After::HelloSent
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                            ev.want_write(fd);
                            After::Keep
                        }
                        Err(err) => return Err(err),
                    }
                }

                Link::Stream(sock) => {
                    let fd = sock.as_raw_fd();
                    match transfer.dir {
                        Direction::Receiving if ev.is_readable(fd) => {
                            if stream_receive(sock, &mut transfer.file)? {
                                After::Finish
                            } else {
                                After::Keep
                            }
                        }
                        Direction::Sending if ev.is_writable(fd) => {
                            if stream_send(&mut transfer.file, sock)? {
                                After::Finish
                            } else {
                                After::Keep
                            }
                        }
                        Direction::Receiving => {
                            ev.want_read(fd);
                            After::Keep
                        }
                        Direction::Sending => {
                            ev.want_write(fd);
                            After::Keep
                        }
                    }
                }

                Link::DgramRecv(sock) => {
                    let fd = sock.as_raw_fd();
                    if ev.is_readable(fd) {
                        if dgram_receive(sock, &mut transfer.file)? {
                            After::Finish
                        } else {
                            After::Keep
                        }
                    } else {
                        ev.want_read(fd);
                        After::Keep
                    }
                }

                Link::DgramSend(sock) => {
                    let fd = sock.as_raw_fd();
                    if ev.is_writable(fd) {
                        if dgram_send(&mut transfer.file, sock)? {
                            After::DgramFinalSent
                        } else {
                            After::Keep
                        }
                    } else {
                        ev.want_write(fd);
                        After::Keep
                    }
                }

                Link::DgramDone(sock) => {
                    let fd = sock.as_raw_fd();
                    if ev.is_writable(fd) {
                        After::Finish
                    } else {
                        ev.want_write(fd);
                        After::Keep
                    }
                }

                Link::StreamRendezvous(listener) => {
                    let fd = listener.as_raw_fd();
                    if ev.is_readable(fd) {
                        match listener.accept() {
                            Ok((sock, _peer)) => {
                                sock.set_nonblocking(true)?;
                                ev.release(fd);
                                let sock_fd = sock.as_raw_fd();
                                match transfer.dir {
                                    Direction::Receiving => ev.want_read(sock_fd),
                                    Direction::Sending => ev.want_write(sock_fd),
                                }
                                After::Accepted(sock)
                            }
                            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                                ev.want_read(fd);
                                After::Keep
                            }
                            Err(err) => return Err(err),
                        }
                    } else {
                        ev.want_read(fd);
                        After::Keep
                    }
                }

                Link::DgramRendezvous(sock) => {
                    let fd = sock.as_raw_fd();
                    if ev.is_readable(fd) {
                        let mut buf = [0u8; COPY_BUF];
                        match sock.recv_from(&mut buf) {
                            Ok((_, peer_addr)) => {
                                sock.connect(peer_addr)?;
                                ev.drop_read(fd);
                                ev.want_write(fd);
                                After::DgramPeerFound
                            }
                            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                                ev.want_read(fd);
                                After::Keep
                            }
                            Err(err) => return Err(err),
                        }
                    } else {
                        ev.want_read(fd);
                        After::Keep
                    }
                }
            };

            match after {
                After::Keep => {}
                After::Finish => {
                    self.console.push(MSG_SUCCESS);
                    self.transfers.remove(&mut self.ev, &id);
                }
                After::Accepted(sock) => {
                    transfer.link = Link::Stream(sock);
                }
                After::HelloSent => {
                    let Link::DgramHello(sock) =
                        std::mem::replace(&mut transfer.link, Link::AwaitAccept)
                    else {
                        unreachable!()
                    };
                    transfer.link = Link::DgramRecv(sock);
                }
                After::DgramPeerFound => {
                    let Link::DgramRendezvous(sock) =
                        std::mem::replace(&mut transfer.link, Link::AwaitAccept)
                    else {
                        unreachable!()
                    };
                    transfer.link = Link::DgramSend(sock);
                }
                After::DgramFinalSent => {
                    let Link::DgramSend(sock) =
                        std::mem::replace(&mut transfer.link, Link::AwaitAccept)
                    else {
                        unreachable!()
                    };
                    transfer.link = Link::DgramDone(sock);
                }
            }

            if let Some(transfer) = self.transfers.table.get_mut(&id) {
                transfer.rearm(&mut self.ev);
            }
        }
        Ok(())
    }
}

/// Bind the accepting side's socket on an ephemeral port. The stream variant
/// listens; the datagram variant either waits for the initiating datagram
/// (sending role) or directly for data (receiving role).
fn rendezvous(
    ev: &mut EventLoop,
    mode: TransferMode,
    dir: Direction,
) -> io::Result<(Link, u16)> {
    match mode {
        TransferMode::Stream => {
            let listener = TcpListener::bind(("0.0.0.0", 0))?;
            listener.set_nonblocking(true)?;
            unsafe {
                libc::listen(listener.as_raw_fd(), 1);
            }
            let port = listener.local_addr()?.port();
            ev.want_read(listener.as_raw_fd());
            Ok((Link::StreamRendezvous(listener), port))
        }
        TransferMode::Datagram => {
            let sock = UdpSocket::bind(("0.0.0.0", 0))?;
            sock.set_nonblocking(true)?;
            let port = sock.local_addr()?.port();
            ev.want_read(sock.as_raw_fd());
            let link = match dir {
                Direction::Sending => Link::DgramRendezvous(sock),
                Direction::Receiving => Link::DgramRecv(sock),
            };
            Ok((link, port))
        }
    }
}

/// Pump file bytes into the stream. A partial socket write rewinds the file
/// by the unsent tail so the next pass re-reads it. Completion is the read
/// of zero bytes at a later tick, after the peer has had the full contents.
fn stream_send(file: &mut File, sock: &mut TcpStream) -> io::Result<bool> {
    let mut buf = [0u8; COPY_BUF];
    loop {
        let len = file.read(&mut buf)?;
        if len == 0 {
            return Ok(true);
        }
        match sock.write(&buf[..len]) {
            Ok(written) => {
                if written < len {
                    file.seek(SeekFrom::Current(written as i64 - len as i64))?;
                    return Ok(false);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                file.seek(SeekFrom::Current(-(len as i64)))?;
                return Ok(false);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                file.seek(SeekFrom::Current(-(len as i64)))?;
            }
            Err(err) => return Err(err),
        }
        if len < COPY_BUF {
            return Ok(false);
        }
    }
}

/// Drain the stream into the file; end of stream is success.
fn stream_receive(sock: &mut TcpStream, file: &mut File) -> io::Result<bool> {
    let mut buf = [0u8; COPY_BUF];
    loop {
        match sock.read(&mut buf) {
            Ok(0) => return Ok(true),
            Ok(len) => {
                file.write_all(&buf[..len])?;
                if len < COPY_BUF {
                    return Ok(false);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

/// One datagram per call. The header byte is stripped; a short datagram or a
/// non-zero header ends the transfer.
fn dgram_receive(sock: &mut UdpSocket, file: &mut File) -> io::Result<bool> {
    let mut buf = [0u8; COPY_BUF];
    match sock.recv(&mut buf) {
        Ok(len) => {
            if len > 1 {
                file.write_all(&buf[1..len])?;
            }
            Ok(len != COPY_BUF || buf[0] != 0)
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(err) => Err(err),
    }
}

/// One datagram per call: a full read gets a zero header, a short read gets
/// the final header and reports completion.
fn dgram_send(file: &mut File, sock: &mut UdpSocket) -> io::Result<bool> {
    let mut buf = [0u8; COPY_BUF];
    let len = file.read(&mut buf[1..])?;
    if len == COPY_BUF - 1 {
        buf[0] = 0;
        match sock.send(&buf) {
            Ok(_) => Ok(false),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                file.seek(SeekFrom::Current(-(len as i64)))?;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    } else {
        buf[0] = 1;
        match sock.send(&buf[..len + 1]) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                file.seek(SeekFrom::Current(-(len as i64)))?;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        io::Read,
        net::{TcpListener, TcpStream},
        os::unix::net::UnixStream,
        time::Duration,
    };

    use parley_io::Channel;

    use super::*;
    use crate::session::Session;

    struct Rig {
        session: Session<UnixStream>,
        console_far: UnixStream,
        hub_far: TcpStream,
    }

    /// A session wired to a throwaway console pair and a raw socket standing
    /// in for the hub connection.
    fn rig() -> Rig {
        let (near, console_far) = UnixStream::pair().unwrap();
        near.set_nonblocking(true).unwrap();
        console_far.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let mut session = Session::new(Channel::from_socket(near)).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (hub_far, _) = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();
        hub_far.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        session.hub = Some(Channel::from_socket(client));

        Rig { session, console_far, hub_far }
    }

    impl Rig {
        fn hub_output(&mut self) -> String {
            self.session.hub.as_mut().unwrap().flush_once();
            read_available(&mut self.hub_far)
        }

        fn console_output(&mut self) -> String {
            self.session.console.flush_once();
            read_available(&mut self.console_far)
        }
    }

    fn read_available<S: Read>(stream: &mut S) -> String {
        let mut out = Vec::new();
        let mut tmp = [0u8; 4096];
        loop {
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => {
                    out.extend_from_slice(&tmp[..n]);
                    if n < tmp.len() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn negotiation_refusals_and_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let mut rig = rig();
        let id = "0123456789abcdef";

        // Unknown mode token.
        rig.session.exec_receive("mallory", id, "turbo", "x.txt");
        assert_eq!(rig.hub_output(), format!("/refuse mallory {id} mode\n"));

        // Unsafe filenames: hidden and path-carrying.
        rig.session.exec_receive("mallory", id, "secure", ".hidden");
        assert_eq!(rig.hub_output(), format!("/refuse mallory {id} name\n"));
        rig.session.exec_send("mallory", id, "secure", "a/b.txt");
        assert_eq!(rig.hub_output(), format!("/refuse mallory {id} name\n"));

        // Forbidden peers are refused before any file is touched.
        rig.session.forbid.insert("mallory");
        rig.session.exec_send("mallory", id, "secure", "y.txt");
        assert_eq!(rig.hub_output(), format!("/refuse mallory {id} forbid\n"));
        assert!(rig.console_output().contains("mallory attempted to send the `y.txt' file.\n"));
        assert!(!fs::exists("y.txt").unwrap());
        rig.session.forbid.remove("mallory");

        // A pre-existing destination refuses without truncating it.
        fs::write("z.txt", b"keep me").unwrap();
        rig.session.exec_send("mallory", id, "secure", "z.txt");
        assert_eq!(rig.hub_output(), format!("/refuse mallory {id} exists\n"));
        assert_eq!(fs::read("z.txt").unwrap(), b"keep me");

        // A missing source file refuses and notes the attempt.
        rig.session.exec_receive("mallory", id, "secure", "missing.bin");
        assert_eq!(rig.hub_output(), format!("/refuse mallory {id} open\n"));
        assert!(rig.console_output().contains("mallory attempted to get the `missing.bin' file.\n"));

        // An /accept for an id we do not track cancels with `id`.
        rig.session.exec_accept("mallory", "unknownidunknown", "peeridpeeridpeer", "127.0.0.1", "9");
        assert_eq!(rig.hub_output(), "/refuse mallory peeridpeeridpeer id\n");

        // A tracked request announces itself and dies on /refuse.
        fs::write("w.txt", b"outbound").unwrap();
        rig.session.req_send("mallory", "remote.txt", "w.txt");
        let line = rig.hub_output();
        assert!(line.starts_with("/send mallory "));
        assert!(line.ends_with(" secure remote.txt\n"));
        let sent_id = line.split_whitespace().nth(2).unwrap().to_owned();
        assert!(rig.session.transfers.contains(&sent_id));

        rig.session.exec_refuse(&sent_id);
        assert!(rig.session.transfers.is_empty());
        assert!(rig.console_output().contains("File transfer refused.\n"));

        // Accepting a pull opens a listening rendezvous and answers with its
        // port.
        fs::write("shared.bin", vec![42u8; 100]).unwrap();
        rig.session.exec_receive("peer", "0123456789abcdef", "secure", "shared.bin");
        let line = rig.hub_output();
        assert!(line.starts_with("/accept peer 0123456789abcdef "), "got {line:?}");
        let port: u16 = line.split_whitespace().nth(4).unwrap().parse().unwrap();
        assert_ne!(port, 0);
        assert_eq!(rig.session.transfers.len(), 1);
        assert!(rig.console_output().contains("peer is getting the `shared.bin' file.\n"));

        // The advertised port really is listening.
        TcpStream::connect(("127.0.0.1", port)).unwrap();
    }
}
