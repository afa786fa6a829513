use std::{
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
};

use parley_io::{Channel, EventLoop, Fill, Line};
use parley_proto::{Flow, TransferMode, tokenize};
use tracing::{debug, warn};

use crate::{commands, forbid::ForbidSet, transfer::Transfers};

const DEFAULT_PORT: u16 = 4242;

const MSG_EOF_CONSOLE: &[u8] = b"EOF from standard input; exiting.\n";
const MSG_NOT_CONNECTED: &[u8] =
    b"You are not connected yet.  Issue a /connect command to connect yourself.\n";
const MSG_CONNECT_SYNTAX: &[u8] =
    b"Command error.  Syntax: /connect <nickname> <address> [port]\n";
const MSG_TAKES_NONE: &[u8] = b"Wrong argument count.  This command takes none.\n";
const MSG_RESOLVE: &[u8] = b"Could not resolve server address.\n";
const MSG_CONNECT_FAILED: &[u8] = b"Connection failed.\n";
const MSG_HUB_EOF: &[u8] = b"Disconnected from server.\n";

/// The participant process state: console, optional hub connection, transfer
/// table, forbid set, and the preferred transfer mode.
///
/// Like the hub, the console transport is generic so tests can run whole
/// sessions over socket pairs.
pub struct Session<C> {
    pub(crate) ev: EventLoop,
    pub(crate) console: Channel<C>,
    pub(crate) hub: Option<Channel<TcpStream>>,
    pub(crate) transfers: Transfers,
    pub(crate) forbid: ForbidSet,
    pub(crate) mode: TransferMode,
}

impl<C: Read + Write> Session<C> {
    pub fn new(console: Channel<C>) -> io::Result<Self> {
        let mut ev = EventLoop::new()?;
        ev.want_read(console.read_fd());
        Ok(Self {
            ev,
            console,
            hub: None,
            transfers: Transfers::new(),
            forbid: ForbidSet::default(),
            mode: TransferMode::Stream,
        })
    }

    /// Drive the session until the console asks to stop, the console closes,
    /// or a transfer fails hard.
    pub fn run(&mut self) -> io::Result<()> {
        let res = loop {
            if let Err(err) = self.ev.wait() {
                break Err(err);
            }
            match self.tick_transfers() {
                Ok(()) => {}
                Err(err) => {
                    warn!(?err, "file transfer failed");
                    break Ok(());
                }
            }
            if self.console_input() == Flow::Quit {
                break Ok(());
            }
            self.hub_read();
            if let Err(err) = self.console.write(&mut self.ev) {
                warn!(?err, "console write");
            }
            self.hub_write();
            self.rearm_channels();
        };
        self.flush();
        res
    }

    /// Re-assert channel interest before sleeping; consumed edges would
    /// otherwise strand kernel-buffered input or late-queued output.
    fn rearm_channels(&mut self) {
        self.console.arm_pending(&mut self.ev);
        self.ev.want_read(self.console.read_fd());
        if let Some(hub) = &mut self.hub {
            hub.arm_pending(&mut self.ev);
            let fd = hub.read_fd();
            self.ev.want_read(fd);
        }
    }

    fn flush(&mut self) {
        if let Some(hub) = &mut self.hub {
            hub.flush_once();
        }
        self.console.flush_once();
    }

    fn console_input(&mut self) -> Flow {
        match self.console.read(&mut self.ev) {
            Ok(Fill::Eof) => {
                self.push_hub(b"/quit\n");
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
            let Some(line) = self.console.pull_line(0) else { break };
            if self.hub.is_some() {
                if line.is_command() {
                    let content = String::from_utf8_lossy(line.content()).into_owned();
                    flow = commands::dispatch_console(self, &content[1..]);
                } else {
                    self.push_hub(line.payload());
                }
            } else {
                flow = self.offline_line(&line);
            }
        }
        flow
    }

    /// Before a hub connection exists, only `/connect <nick> <host> [port]`
    /// and `/quit` are understood.
    fn offline_line(&mut self, line: &Line) -> Flow {
        if !line.is_command() {
            self.console.push(MSG_NOT_CONNECTED);
            return Flow::Continue;
        }
        let content = String::from_utf8_lossy(line.content()).into_owned();
        let tokens = tokenize(&content[1..]);
        match tokens.split_first() {
            Some((&"connect", args)) if args.len() == 2 || args.len() == 3 => {
                self.connect_hub(args[0], args[1], args.get(2).copied());
            }
            Some((&"connect", _)) => self.console.push(MSG_CONNECT_SYNTAX),
            Some((&"quit", args)) => {
                if args.is_empty() {
                    return Flow::Quit;
                }
                self.console.push(MSG_TAKES_NONE);
            }
            _ => self.console.push(MSG_NOT_CONNECTED),
        }
        Flow::Continue
    }

    /// Resolve and connect, install the hub channel, and hand our nickname
    /// over. Any failure leaves the session unconnected.
    fn connect_hub(&mut self, nick: &str, host: &str, port: Option<&str>) {
        let port: u16 = match port {
            None => DEFAULT_PORT,
            Some(text) => match text.parse() {
                Ok(port) => port,
                Err(_) => {
                    self.console.push(MSG_RESOLVE);
                    return;
                }
            },
        };
        let addrs: Vec<_> = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(_) => {
                self.console.push(MSG_RESOLVE);
                return;
            }
        };
        let Some(addr) =
            addrs.iter().find(|a| a.is_ipv4()).or_else(|| addrs.first()).copied()
        else {
            self.console.push(MSG_RESOLVE);
            return;
        };

        self.console.push(format!("Connecting to {addr}...\n").as_bytes());
        let stream = match TcpStream::connect(addr) {
            Ok(stream) => stream,
            Err(err) => {
                debug!(?err, "hub connect");
                self.console.push(MSG_CONNECT_FAILED);
                return;
            }
        };
        if stream.set_nonblocking(true).is_err() {
            self.console.push(MSG_CONNECT_FAILED);
            return;
        }

        let channel = Channel::from_socket(stream);
        self.ev.want_read(channel.read_fd());
        self.console.push(b"Connected.\n");
        self.hub = Some(channel);
        self.push_hub(format!("/connect {nick}\n").as_bytes());
    }

    fn hub_read(&mut self) {
        let Some(hub) = &mut self.hub else { return };
        match hub.read(&mut self.ev) {
            Ok(Fill::Eof) => {
                self.drop_hub();
                self.console.push(MSG_HUB_EOF);
                return;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(?err, "hub read");
                self.drop_hub();
                self.console.push(MSG_HUB_EOF);
                return;
            }
        }
        loop {
            let Some(hub) = &mut self.hub else { return };
            let Some(line) = hub.pull_line(0) else { return };
            if line.is_command() {
                let content = String::from_utf8_lossy(line.content()).into_owned();
                commands::dispatch_hub(self, &content[1..]);
            } else {
                self.console.push(line.payload());
            }
        }
    }

    fn hub_write(&mut self) {
        let Some(hub) = &mut self.hub else { return };
        if let Err(err) = hub.write(&mut self.ev) {
            debug!(?err, "hub write");
            self.drop_hub();
            self.console.push(MSG_HUB_EOF);
        }
    }

    fn drop_hub(&mut self) {
        if let Some(mut hub) = self.hub.take() {
            hub.release(&mut self.ev);
        }
    }

    pub(crate) fn push_hub(&mut self, bytes: &[u8]) {
        if let Some(hub) = &mut self.hub {
            hub.push(bytes);
        }
    }
}
