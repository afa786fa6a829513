use std::io::{Read, Write};

use parley_proto::{Command, Flow, Replies, dispatch};

use crate::{
    hub::Hub,
    registry::PeerId,
};

const SERVER_HELP: &[u8] = b"/who: get the list of the currently connected clients.\n\
/kill <nickname>: disconnect a client from the server.\n\
/shutdown: stop the server.\n\
/help: get the command list.\n";

const CLIENT_HELP: &[u8] = b"/connect <nickname>: choose a nickname.\n\
/who: get the connected client list.\n\
/quit: disconnect from the server.\n\
/help: get the command list.\n\
/receive <nickname> <id> <mode> <filename>: receive a file from a user.\n\
/send <nickname> <id> <mode> <filename>: send a file to another user.\n\
/accept <nickname> <id1> <id2> <port>: accept a file transfer.\n\
/refuse <nickname> <id> <reason>: refuse a file transfer.\n";

const MSG_SHUTDOWN: &[u8] = b"Server is shutting down; closing connections.\n";
const MSG_NO_NICK: &[u8] = b"No such nickname.\n";

/// Canned router responses for console lines land back on the console.
impl<C: Read + Write> Replies for Hub<C> {
    fn reply(&mut self, msg: &[u8]) {
        self.console.push(msg);
    }
}

/// Dispatch context for a line received from an authenticated client; canned
/// responses go to that client's channel.
pub(crate) struct ClientCtx<'h, C> {
    pub hub: &'h mut Hub<C>,
    pub id: PeerId,
}

impl<C: Read + Write> Replies for ClientCtx<'_, C> {
    fn reply(&mut self, msg: &[u8]) {
        self.hub.reply(self.id, msg);
    }
}

pub(crate) fn dispatch_console<C: Read + Write>(hub: &mut Hub<C>, line: &str) -> Flow {
    let table = [
        Command { name: "help", arity: 0, syntax: "", run: srv_help::<C> },
        Command { name: "kill", arity: 1, syntax: "<nickname>", run: srv_kill::<C> },
        Command { name: "shutdown", arity: 0, syntax: "", run: srv_shutdown::<C> },
        Command { name: "who", arity: 0, syntax: "", run: srv_who::<C> },
    ];
    dispatch(hub, &table, line)
}

pub(crate) fn dispatch_client<C: Read + Write>(hub: &mut Hub<C>, id: PeerId, line: &str) -> Flow {
    let table = [
        Command {
            name: "accept",
            arity: 4,
            syntax: "<nickname> <id1> <id2> <port>",
            run: clt_accept::<C>,
        },
        Command { name: "connect", arity: 1, syntax: "<nickname>", run: clt_connect::<C> },
        Command { name: "help", arity: 0, syntax: "", run: clt_help::<C> },
        Command { name: "quit", arity: 0, syntax: "", run: clt_quit::<C> },
        Command {
            name: "receive",
            arity: 4,
            syntax: "<nickname> <id> <mode> <filename>",
            run: clt_receive::<C>,
        },
        Command {
            name: "refuse",
            arity: 3,
            syntax: "<nickname> <id> <reason>",
            run: clt_refuse::<C>,
        },
        Command {
            name: "send",
            arity: 4,
            syntax: "<nickname> <id> <mode> <filename>",
            run: clt_send::<C>,
        },
        Command { name: "who", arity: 0, syntax: "", run: clt_who::<C> },
    ];
    let mut ctx = ClientCtx { hub, id };
    dispatch(&mut ctx, &table, line)
}

fn srv_help<C: Read + Write>(hub: &mut Hub<C>, _args: &[&str]) -> Flow {
    hub.console.push(SERVER_HELP);
    Flow::Continue
}

fn srv_who<C: Read + Write>(hub: &mut Hub<C>, _args: &[&str]) -> Flow {
    let report = hub.who_report();
    hub.console.push(&report);
    Flow::Continue
}

fn srv_kill<C: Read + Write>(hub: &mut Hub<C>, args: &[&str]) -> Flow {
    let Some(target) = hub.registry.lookup(args[0]) else {
        hub.console.push(MSG_NO_NICK);
        return Flow::Continue;
    };
    let nick =
        hub.registry.get(target).and_then(|p| p.nick()).unwrap_or_default().to_owned();
    hub.reply(target, b"** You have been killed.\n");
    let line = format!("** {nick} has been killed.\n");
    hub.registry.broadcast(line.as_bytes(), Some(target));
    hub.console.push(&line.as_bytes()[3..]);
    hub.drain_peer(target);
    Flow::Continue
}

fn srv_shutdown<C: Read + Write>(hub: &mut Hub<C>, _args: &[&str]) -> Flow {
    hub.registry.broadcast(MSG_SHUTDOWN, None);
    Flow::Quit
}

fn clt_connect<C: Read + Write>(ctx: &mut ClientCtx<'_, C>, _args: &[&str]) -> Flow {
    ctx.reply(b"You are already connected.\n");
    Flow::Continue
}

fn clt_help<C: Read + Write>(ctx: &mut ClientCtx<'_, C>, _args: &[&str]) -> Flow {
    ctx.reply(CLIENT_HELP);
    Flow::Continue
}

fn clt_who<C: Read + Write>(ctx: &mut ClientCtx<'_, C>, _args: &[&str]) -> Flow {
    let report = ctx.hub.who_report();
    ctx.reply(&report);
    Flow::Continue
}

fn clt_quit<C: Read + Write>(ctx: &mut ClientCtx<'_, C>, _args: &[&str]) -> Flow {
    let nick = ctx
        .hub
        .registry
        .get(ctx.id)
        .and_then(|p| p.nick())
        .unwrap_or_default()
        .to_owned();
    ctx.reply(b"** Goodbye!\n");
    let line = format!("** {nick} has left server.\n");
    ctx.hub.registry.broadcast(line.as_bytes(), Some(ctx.id));
    ctx.hub.console.push(&line.as_bytes()[3..]);
    ctx.hub.drain_peer(ctx.id);
    Flow::Continue
}

fn clt_receive<C: Read + Write>(ctx: &mut ClientCtx<'_, C>, args: &[&str]) -> Flow {
    relay(ctx, "receive", args)
}

fn clt_send<C: Read + Write>(ctx: &mut ClientCtx<'_, C>, args: &[&str]) -> Flow {
    relay(ctx, "send", args)
}

fn clt_refuse<C: Read + Write>(ctx: &mut ClientCtx<'_, C>, args: &[&str]) -> Flow {
    relay(ctx, "refuse", args)
}

/// Re-emit a transfer command on the target's channel with the originator's
/// nickname spliced in as the first argument. An unknown target bounces a
/// `/refuse <id> nick` straight back.
fn relay<C: Read + Write>(ctx: &mut ClientCtx<'_, C>, name: &str, args: &[&str]) -> Flow {
    let Some(target) = ctx.hub.registry.lookup(args[0]) else {
        bounce_unknown_nick(ctx, args[1]);
        return Flow::Continue;
    };
    let sender = ctx
        .hub
        .registry
        .get(ctx.id)
        .and_then(|p| p.nick())
        .unwrap_or_default()
        .to_owned();
    let mut line = format!("/{name} {sender}");
    for arg in &args[1..] {
        line.push(' ');
        line.push_str(arg);
    }
    line.push('\n');
    ctx.hub.reply(target, line.as_bytes());
    Flow::Continue
}

/// `/accept` relays like the other transfer commands but the hub splices the
/// originator's host address in front of the port, so the receiving side
/// knows where to connect.
fn clt_accept<C: Read + Write>(ctx: &mut ClientCtx<'_, C>, args: &[&str]) -> Flow {
    let Some(target) = ctx.hub.registry.lookup(args[0]) else {
        bounce_unknown_nick(ctx, args[1]);
        return Flow::Continue;
    };
    let (sender, host) = match ctx.hub.registry.get(ctx.id) {
        Some(peer) => (peer.nick().unwrap_or_default().to_owned(), peer.host().to_owned()),
        None => return Flow::Continue,
    };
    let line = format!("/accept {sender} {} {} {host} {}\n", args[1], args[2], args[3]);
    ctx.hub.reply(target, line.as_bytes());
    Flow::Continue
}

fn bounce_unknown_nick<C: Read + Write>(ctx: &mut ClientCtx<'_, C>, id: &str) {
    let mut msg = format!("/refuse {id} nick\n").into_bytes();
    msg.extend_from_slice(MSG_NO_NICK);
    ctx.reply(&msg);
}
