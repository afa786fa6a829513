use std::{
    io::{self, Read, Write},
    net::TcpStream,
    os::fd::AsRawFd,
};

use parley_io::{Channel, EventLoop, Fill};
use parley_proto::{Flow, tokenize};
use tracing::{debug, warn};

use crate::{
    commands,
    registry::{AuthError, PeerId, Registry},
};

pub(crate) const MSG_AUTH: &[u8] =
    b"You are not authenticated yet.  Use /connect to authenticate yourself.\n";
const MSG_CONNECT_SYNTAX: &[u8] = b"Command error.  Syntax: /connect <nickname>\n";
const MSG_NICK_INVALID: &[u8] =
    b"Nickname is not valid.  Issue another /connect command with a valid one.\n";
const MSG_NICK_TAKEN: &[u8] = b"Nickname is already taken.  Choose another one.\n";
const MSG_EOF_CONSOLE: &[u8] = b"EOF from standard input; exiting.\n";
const MSG_EOF_CLIENTS: &[u8] =
    b"** EOF from server standard input; closing connections.\n";

/// The hub process state: one listening socket, the operator console, and the
/// peer registry, all driven by a single readiness loop.
///
/// The console transport is generic so tests can drive a hub over a socket
/// pair instead of the process stdio.
pub struct Hub<C> {
    pub(crate) ev: EventLoop,
    listener: std::net::TcpListener,
    pub(crate) console: Channel<C>,
    pub(crate) registry: Registry<TcpStream>,
}

impl<C: Read + Write> Hub<C> {
    pub fn new(listener: std::net::TcpListener, console: Channel<C>) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let mut ev = EventLoop::new()?;
        ev.want_read(listener.as_raw_fd());
        ev.want_read(console.read_fd());
        Ok(Self { ev, listener, console, registry: Registry::new() })
    }

    /// Drive the hub until the console asks to stop or the multiplexer
    /// fails. Pending output is force-flushed on the way out.
    pub fn run(&mut self) -> io::Result<()> {
        let res = loop {
            if let Err(err) = self.ev.wait() {
                break Err(err);
            }
            if self.console_input() == Flow::Quit {
                break Ok(());
            }
            self.accept_ready();
            self.read_peers();
            self.write_peers();
            if let Err(err) = self.console.write(&mut self.ev) {
                warn!(?err, "console write");
            }
            self.rearm_channels();
        };
        self.flush();
        res
    }

    /// Readiness consumed this iteration is gone until the next kernel
    /// edge, so every channel re-asserts its interest before the loop
    /// sleeps: read interest wherever input is still expected, write
    /// interest wherever output remains queued. Data or an EOF still
    /// buffered in the kernel is then re-reported by the next `wait`.
    fn rearm_channels(&mut self) {
        self.console.arm_pending(&mut self.ev);
        self.ev.want_read(self.console.read_fd());
        self.ev.want_read(self.listener.as_raw_fd());
        for id in self.registry.ids() {
            let Some(peer) = self.registry.get_mut(id) else { continue };
            peer.channel.arm_pending(&mut self.ev);
            if !peer.is_draining() {
                let fd = peer.channel.read_fd();
                self.ev.want_read(fd);
            }
        }
    }

    fn flush(&mut self) {
        self.console.flush_once();
        for id in self.registry.ids() {
            if let Some(peer) = self.registry.get_mut(id) {
                peer.channel.flush_once();
            }
        }
    }

    /// One round of console input: EOF stops the hub, commands dispatch,
    /// plain lines broadcast with a `** ` marker.
    fn console_input(&mut self) -> Flow {
        match self.console.read(&mut self.ev) {
            Ok(Fill::Eof) => {
                self.registry.broadcast(MSG_EOF_CLIENTS, None);
                self.console.push(MSG_EOF_CONSOLE);
                return Flow::Quit;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(?err, "console read");
                return Flow::Quit;
            }
        }

        let mut flow = Flow::Continue;
        while flow == Flow::Continue {
            let Some(mut line) = self.console.pull_line(3) else { break };
            if line.is_command() {
                let content = String::from_utf8_lossy(line.content()).into_owned();
                flow = commands::dispatch_console(self, &content[1..]);
            } else {
                let msg = line.fill_prefix(b"** ").to_vec();
                self.registry.broadcast(&msg, None);
            }
        }
        flow
    }

    /// Accept every pending connection; each becomes an unauthenticated
    /// peer.
    fn accept_ready(&mut self) {
        let fd = self.listener.as_raw_fd();
        if !self.ev.is_readable(fd) {
            self.ev.want_read(fd);
            return;
        }
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        warn!(?err, "accepted socket setup");
                        continue;
                    }
                    let addr = addr.to_string();
                    self.console.push(format!("Client `{addr}' connected.\n").as_bytes());
                    let channel = Channel::from_socket(stream);
                    self.ev.want_read(channel.read_fd());
                    self.registry.insert(channel, addr);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(?err, "accept");
                    break;
                }
            }
        }
    }

    fn read_peers(&mut self) {
        for id in self.registry.ids() {
            let Some(peer) = self.registry.get_mut(id) else { continue };
            if peer.is_draining() {
                continue;
            }
            match peer.channel.read(&mut self.ev) {
                Ok(Fill::Read(_)) => self.peer_lines(id),
                Ok(Fill::WouldBlock) => {}
                Ok(Fill::Eof) => self.remove_peer(id),
                Err(err) => {
                    debug!(?err, id, "peer read");
                    self.remove_peer(id);
                }
            }
        }
    }

    /// Process every buffered line of one peer. Plain lines from an
    /// authenticated peer are rewritten in place to `<nick>: <line>` and
    /// broadcast; commands dispatch against the client table, or against the
    /// authentication handshake while unauthenticated.
    fn peer_lines(&mut self, id: PeerId) {
        loop {
            let Some(peer) = self.registry.get_mut(id) else { return };
            if peer.is_draining() {
                return;
            }
            let reserve = peer.nick().map_or(0, str::len) + 2;
            let Some(mut line) = peer.channel.pull_line(reserve) else { return };
            let nick = peer.nick().map(str::to_owned);

            if line.is_command() {
                let content = String::from_utf8_lossy(line.content()).into_owned();
                if nick.is_some() {
                    commands::dispatch_client(self, id, &content[1..]);
                } else {
                    self.auth_command(id, &content[1..]);
                }
            } else if let Some(nick) = nick {
                let msg = line.fill_prefix(format!("{nick}: ").as_bytes()).to_vec();
                self.registry.broadcast(&msg, Some(id));
            } else {
                self.reply(id, MSG_AUTH);
            }
        }
    }

    /// The only command an unauthenticated peer may issue is
    /// `/connect <nickname>`.
    fn auth_command(&mut self, id: PeerId, line: &str) {
        let tokens = tokenize(line);
        let Some((&name, args)) = tokens.split_first() else {
            self.reply(id, MSG_AUTH);
            return;
        };
        if name != "connect" {
            self.reply(id, MSG_AUTH);
            return;
        }
        if args.len() != 1 {
            self.reply(id, MSG_CONNECT_SYNTAX);
            return;
        }
        match self.registry.authenticate(id, args[0]) {
            Ok(()) => {
                let nick = args[0];
                let addr =
                    self.registry.get(id).map(|p| p.addr.clone()).unwrap_or_default();
                self.registry
                    .broadcast(format!("** {nick} connected.\n").as_bytes(), Some(id));
                self.console
                    .push(format!("Client `{addr}' authenticated as `{nick}'.\n").as_bytes());
                self.reply(id, format!("** Hello, {nick}!\n").as_bytes());
            }
            Err(AuthError::Invalid) => self.reply(id, MSG_NICK_INVALID),
            Err(AuthError::Taken) => self.reply(id, MSG_NICK_TAKEN),
        }
    }

    fn write_peers(&mut self) {
        for id in self.registry.ids() {
            let Some(peer) = self.registry.get_mut(id) else { continue };
            if let Err(err) = peer.channel.write(&mut self.ev) {
                debug!(?err, id, "peer write");
                self.remove_peer(id);
                continue;
            }
            let Some(peer) = self.registry.get(id) else { continue };
            if peer.is_draining() && peer.channel.pending_output() == 0 {
                self.remove_peer(id);
            }
        }
    }

    /// Tear a peer down: drop its interest bits, note the disconnect on the
    /// console, and announce it to the others when it was authenticated.
    pub(crate) fn remove_peer(&mut self, id: PeerId) {
        let Some(mut peer) = self.registry.remove(id) else { return };
        peer.channel.release(&mut self.ev);
        let name = peer.display_name().to_owned();
        self.console.push(format!("Client `{name}' disconnected.\n").as_bytes());
        if peer.is_authenticated() {
            self.registry.broadcast(format!("** {name} disconnected.\n").as_bytes(), None);
        }
    }

    /// Stop reading from a peer; it survives only until its output drains.
    pub(crate) fn drain_peer(&mut self, id: PeerId) {
        let Some(peer) = self.registry.get_mut(id) else { return };
        let fd = peer.channel.read_fd();
        peer.set_draining();
        self.ev.drop_read(fd);
    }

    pub(crate) fn reply(&mut self, id: PeerId, msg: &[u8]) {
        if let Some(peer) = self.registry.get_mut(id) {
            peer.channel.push(msg);
        }
    }

    /// `/who` report shared by the console and client variants.
    pub(crate) fn who_report(&self) -> Vec<u8> {
        let nicks: Vec<&str> = self.registry.authenticated().collect();
        if nicks.is_empty() {
            return b"No client connected.\n".to_vec();
        }
        let mut out =
            format!("There are {} client(s) connected:\n", self.registry.len()).into_bytes();
        for nick in nicks {
            out.extend_from_slice(nick.as_bytes());
            out.push(b'\n');
        }
        out
    }
}
