use std::process::exit;

use clap::Parser;
use parley_client::Session;
use parley_io::{Channel, set_nonblocking};
use tracing::error;
use tracing_subscriber::EnvFilter;

const WELCOME: &str = "Parley: a talk-like chat hub and client\n\
\n\
Welcome to the Parley client!\n\
\n\
Issue a `/connect' command to connect yourself to a hub.\n\
Once connected, type messages or commands.\n\
Commands start with a `/'; type `/help' to get a list.\n\
\n";

#[derive(Parser)]
#[command(name = "parley-client", version, about = "Interactive chat participant")]
struct Args {}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Args {} = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            exit(1);
        }
    };

    print!("{WELCOME}");
    let _ = std::io::Write::flush(&mut std::io::stdout());

    let _ = set_nonblocking(libc::STDIN_FILENO, true);
    let _ = set_nonblocking(libc::STDOUT_FILENO, true);

    let mut session = match Session::new(Channel::console()) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("Error while setting up the event loop: {err}");
            exit(1);
        }
    };
    if let Err(err) = session.run() {
        error!(?err, "event loop failed");
    }

    let _ = set_nonblocking(libc::STDIN_FILENO, false);
    let _ = set_nonblocking(libc::STDOUT_FILENO, false);
}
