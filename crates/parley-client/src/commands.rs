use std::io::{Read, Write};

use parley_proto::{Command, Flow, RefuseReason, Replies, TransferMode, dispatch};

use crate::session::Session;

const CONSOLE_HELP: &[u8] = b"/connect <nickname>: choose nickname once connected to a server.\n\
/who: get the currently connected user list.\n\
/allow <nickname>: allow a user to transfer files.\n\
/forbid <nickname>: forbid a user to transfer files.\n\
/mode {secure|fast}: select file transfer mode.\n\
/transfer <[user:]from> <[user:]to>: transfer a file from/to another user.\n\
/quit: disconnect from the server or quit the program.\n\
/help: get the command list.\n";

const MSG_BAD_MODE: &[u8] = b"Invalid mode.  Valid ones are `secure' and `fast'.\n";
const MSG_ALREADY_FORBIDDEN: &[u8] = b"User already forbidden.\n";
const MSG_NOT_FORBIDDEN: &[u8] = b"User not forbidden.\n";

const MSG_ONE_EACH: &[u8] =
    b"There must be only and at most one local file and one remote file.\n";
const MSG_NO_NICK: &[u8] = b"No nickname specified.\n";
const MSG_NO_LOCAL: &[u8] = b"No local file specified.\n";
const MSG_NO_REMOTE: &[u8] = b"No remote file specified.\n";

/// All canned responses land on the console, whether the offending line came
/// from the console or from the hub.
impl<C: Read + Write> Replies for Session<C> {
    fn reply(&mut self, msg: &[u8]) {
        self.console.push(msg);
    }
}

pub(crate) fn dispatch_console<C: Read + Write>(session: &mut Session<C>, line: &str) -> Flow {
    let table = [
        Command { name: "allow", arity: 1, syntax: "<nickname>", run: cns_allow::<C> },
        Command { name: "connect", arity: 1, syntax: "<nickname>", run: cns_connect::<C> },
        Command { name: "forbid", arity: 1, syntax: "<nickname>", run: cns_forbid::<C> },
        Command { name: "help", arity: 0, syntax: "", run: cns_help::<C> },
        Command { name: "mode", arity: 1, syntax: "{secure|fast}", run: cns_mode::<C> },
        Command { name: "quit", arity: 0, syntax: "", run: cns_quit::<C> },
        Command {
            name: "transfer",
            arity: 2,
            syntax: "<[user:]from> <[user:]to>",
            run: cns_transfer::<C>,
        },
        Command { name: "who", arity: 0, syntax: "", run: cns_who::<C> },
    ];
    dispatch(session, &table, line)
}

pub(crate) fn dispatch_hub<C: Read + Write>(session: &mut Session<C>, line: &str) -> Flow {
    let table = [
        Command {
            name: "accept",
            arity: 5,
            syntax: "<nickname> <id1> <id2> <address> <port>",
            run: hub_accept::<C>,
        },
        Command {
            name: "receive",
            arity: 4,
            syntax: "<nickname> <id> <mode> <filename>",
            run: hub_receive::<C>,
        },
        Command {
            name: "refuse",
            arity: 3,
            syntax: "<nickname> <id> <reason>",
            run: hub_refuse::<C>,
        },
        Command {
            name: "send",
            arity: 4,
            syntax: "<nickname> <id> <mode> <filename>",
            run: hub_send::<C>,
        },
    ];
    dispatch(session, &table, line)
}

/// `/connect`, `/quit` and `/who` are executed by the hub; forward them
/// verbatim.
fn forward<C: Read + Write>(session: &mut Session<C>, name: &str, args: &[&str]) -> Flow {
    let mut line = format!("/{name}");
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line.push('\n');
    session.push_hub(line.as_bytes());
    Flow::Continue
}

fn cns_connect<C: Read + Write>(session: &mut Session<C>, args: &[&str]) -> Flow {
    forward(session, "connect", args)
}

fn cns_quit<C: Read + Write>(session: &mut Session<C>, args: &[&str]) -> Flow {
    forward(session, "quit", args)
}

fn cns_who<C: Read + Write>(session: &mut Session<C>, args: &[&str]) -> Flow {
    forward(session, "who", args)
}

fn cns_allow<C: Read + Write>(session: &mut Session<C>, args: &[&str]) -> Flow {
    if !session.forbid.remove(args[0]) {
        session.console.push(MSG_NOT_FORBIDDEN);
    }
    Flow::Continue
}

fn cns_forbid<C: Read + Write>(session: &mut Session<C>, args: &[&str]) -> Flow {
    if !session.forbid.insert(args[0]) {
        session.console.push(MSG_ALREADY_FORBIDDEN);
    }
    Flow::Continue
}

fn cns_mode<C: Read + Write>(session: &mut Session<C>, args: &[&str]) -> Flow {
    match TransferMode::from_token(args[0]) {
        Some(mode) => session.mode = mode,
        None => session.console.push(MSG_BAD_MODE),
    }
    Flow::Continue
}

fn cns_help<C: Read + Write>(session: &mut Session<C>, _args: &[&str]) -> Flow {
    session.console.push(CONSOLE_HELP);
    Flow::Continue
}

/// Exactly one of the two paths names a peer; that side is the remote file.
#[derive(Debug)]
pub(crate) enum TransferSpec<'a> {
    Receive { peer: &'a str, remote: &'a str, local: &'a str },
    Send { peer: &'a str, remote: &'a str, local: &'a str },
}

pub(crate) fn parse_transfer<'a>(
    from: &'a str,
    to: &'a str,
) -> Result<TransferSpec<'a>, &'static [u8]> {
    match (from.split_once(':'), to.split_once(':')) {
        (Some(_), Some(_)) | (None, None) => Err(MSG_ONE_EACH),
        (Some((peer, remote)), None) => {
            if peer.is_empty() {
                Err(MSG_NO_NICK)
            } else if to.is_empty() {
                Err(MSG_NO_LOCAL)
            } else if remote.is_empty() {
                Err(MSG_NO_REMOTE)
            } else {
                Ok(TransferSpec::Receive { peer, remote, local: to })
            }
        }
        (None, Some((peer, remote))) => {
            if peer.is_empty() {
                Err(MSG_NO_NICK)
            } else if from.is_empty() {
                Err(MSG_NO_LOCAL)
            } else if remote.is_empty() {
                Err(MSG_NO_REMOTE)
            } else {
                Ok(TransferSpec::Send { peer, remote, local: from })
            }
        }
    }
}

fn cns_transfer<C: Read + Write>(session: &mut Session<C>, args: &[&str]) -> Flow {
    match parse_transfer(args[0], args[1]) {
        Ok(TransferSpec::Receive { peer, remote, local }) => {
            session.req_receive(peer, remote, local);
        }
        Ok(TransferSpec::Send { peer, remote, local }) => {
            session.req_send(peer, remote, local);
        }
        Err(msg) => session.console.push(msg),
    }
    Flow::Continue
}

fn hub_receive<C: Read + Write>(session: &mut Session<C>, args: &[&str]) -> Flow {
    session.exec_receive(args[0], args[1], args[2], args[3]);
    Flow::Continue
}

fn hub_send<C: Read + Write>(session: &mut Session<C>, args: &[&str]) -> Flow {
    session.exec_send(args[0], args[1], args[2], args[3]);
    Flow::Continue
}

fn hub_accept<C: Read + Write>(session: &mut Session<C>, args: &[&str]) -> Flow {
    session.exec_accept(args[0], args[1], args[2], args[3], args[4]);
    Flow::Continue
}

fn hub_refuse<C: Read + Write>(session: &mut Session<C>, args: &[&str]) -> Flow {
    if let Some(reason) = RefuseReason::from_token(args[2]) {
        session.console.push(reason.describe().as_bytes());
    }
    session.exec_refuse(args[1]);
    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unwrap_receive(spec: TransferSpec<'_>) -> (&str, &str, &str) {
        match spec {
            TransferSpec::Receive { peer, remote, local } => (peer, remote, local),
            TransferSpec::Send { .. } => panic!("expected receive"),
        }
    }

    fn unwrap_send(spec: TransferSpec<'_>) -> (&str, &str, &str) {
        match spec {
            TransferSpec::Send { peer, remote, local } => (peer, remote, local),
            TransferSpec::Receive { .. } => panic!("expected send"),
        }
    }

    #[test]
    fn remote_first_means_receive() {
        let spec = parse_transfer("bob:notes.txt", "copy.txt").unwrap();
        assert_eq!(unwrap_receive(spec), ("bob", "notes.txt", "copy.txt"));
    }

    #[test]
    fn remote_second_means_send() {
        let spec = parse_transfer("notes.txt", "bob:copy.txt").unwrap();
        assert_eq!(unwrap_send(spec), ("bob", "copy.txt", "notes.txt"));
    }

    #[test]
    fn both_or_neither_prefixed_is_an_error() {
        assert_eq!(parse_transfer("a:x", "b:y").unwrap_err(), MSG_ONE_EACH);
        assert_eq!(parse_transfer("x", "y").unwrap_err(), MSG_ONE_EACH);
    }

    #[test]
    fn empty_pieces_name_their_error() {
        assert_eq!(parse_transfer(":x", "y").unwrap_err(), MSG_NO_NICK);
        assert_eq!(parse_transfer("bob:", "y").unwrap_err(), MSG_NO_REMOTE);
        assert_eq!(parse_transfer("x", "bob:").unwrap_err(), MSG_NO_REMOTE);
        assert_eq!(parse_transfer("", "bob:y").unwrap_err(), MSG_NO_LOCAL);
    }
}
