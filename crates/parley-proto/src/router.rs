use crate::tokens::tokenize;

/// What the caller should do after a dispatched line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Terminate the owning session or process.
    Quit,
}

/// One entry of a dispatch table. Tables are sorted by name so lookup is a
/// binary search.
pub struct Command<C> {
    pub name: &'static str,
    /// Required argument count, excluding the command name itself.
    pub arity: usize,
    /// Argument help shown on arity mismatch; empty when the command takes
    /// none.
    pub syntax: &'static str,
    pub run: fn(&mut C, &[&str]) -> Flow,
}

/// Sink for the router's canned responses: the channel the offending line
/// arrived on.
pub trait Replies {
    fn reply(&mut self, msg: &[u8]);
}

pub const MSG_NO_COMMAND: &[u8] = b"No command entered.  Syntax: \
/command [arg 1] [arg 2] ... [arg n]\nType `/help' to get a command list.\n";
pub const MSG_UNKNOWN: &[u8] =
    b"Unknown command.  Type `/help' to get a command list.\n";

/// Tokenize `line`, find the command, validate arity, run the handler.
/// Unknown names and arity mismatches produce a canned response and never
/// reach a handler.
pub fn dispatch<C: Replies>(ctx: &mut C, table: &[Command<C>], line: &str) -> Flow {
    debug_assert!(table.windows(2).all(|w| w[0].name < w[1].name));

    let tokens = tokenize(line);
    let Some((&name, args)) = tokens.split_first() else {
        ctx.reply(MSG_NO_COMMAND);
        return Flow::Continue;
    };

    match table.binary_search_by(|cmd| cmd.name.cmp(name)) {
        Ok(found) => {
            let cmd = &table[found];
            if args.len() != cmd.arity {
                let mut msg = b"Wrong argument count".to_vec();
                if cmd.arity == 0 {
                    msg.extend_from_slice(b": this command takes none.\n");
                } else {
                    msg.extend_from_slice(b".  Syntax: /");
                    msg.extend_from_slice(cmd.name.as_bytes());
                    msg.push(b' ');
                    msg.extend_from_slice(cmd.syntax.as_bytes());
                    msg.push(b'\n');
                }
                ctx.reply(&msg);
                return Flow::Continue;
            }
            (cmd.run)(ctx, args)
        }
        Err(_) => {
            ctx.reply(MSG_UNKNOWN);
            Flow::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        replies: Vec<Vec<u8>>,
        ran: Vec<String>,
    }

    impl Replies for Probe {
        fn reply(&mut self, msg: &[u8]) {
            self.replies.push(msg.to_vec());
        }
    }

    fn probe() -> Probe {
        Probe { replies: Vec::new(), ran: Vec::new() }
    }

    fn table() -> Vec<Command<Probe>> {
        fn record(name: &'static str) -> fn(&mut Probe, &[&str]) -> Flow {
            match name {
                "first" => |p, args| {
                    p.ran.push(format!("first:{}", args.join(",")));
                    Flow::Continue
                },
                _ => |p, _| {
                    p.ran.push("quit".into());
                    Flow::Quit
                },
            }
        }
        vec![
            Command { name: "first", arity: 2, syntax: "<a> <b>", run: record("first") },
            Command { name: "quit", arity: 0, syntax: "", run: record("quit") },
        ]
    }

    #[test]
    fn dispatches_with_exact_arity() {
        let mut p = probe();
        assert_eq!(dispatch(&mut p, &table(), "first one two"), Flow::Continue);
        assert_eq!(p.ran, ["first:one,two"]);
        assert!(p.replies.is_empty());
    }

    #[test]
    fn arity_mismatch_never_runs_handler() {
        let mut p = probe();
        dispatch(&mut p, &table(), "first only");
        assert!(p.ran.is_empty());
        assert_eq!(
            p.replies[0],
            b"Wrong argument count.  Syntax: /first <a> <b>\n".to_vec()
        );

        dispatch(&mut p, &table(), "quit now");
        assert!(p.ran.is_empty());
        assert_eq!(p.replies[1], b"Wrong argument count: this command takes none.\n".to_vec());
    }

    #[test]
    fn unknown_command_gets_canned_reply() {
        let mut p = probe();
        dispatch(&mut p, &table(), "nonesuch");
        assert!(p.ran.is_empty());
        assert_eq!(p.replies[0], MSG_UNKNOWN.to_vec());
    }

    #[test]
    fn empty_command_reports_syntax() {
        let mut p = probe();
        assert_eq!(dispatch(&mut p, &table(), "   "), Flow::Continue);
        assert_eq!(p.replies[0], MSG_NO_COMMAND.to_vec());
    }

    #[test]
    fn quit_propagates() {
        let mut p = probe();
        assert_eq!(dispatch(&mut p, &table(), "quit"), Flow::Quit);
    }
}
