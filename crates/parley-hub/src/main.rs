use std::{io::Write, net::TcpListener, os::fd::AsRawFd, process::exit};

use clap::Parser;
use parley_hub::Hub;
use parley_io::{Channel, set_nonblocking};
use tracing::error;
use tracing_subscriber::EnvFilter;

const WELCOME: &str = "Parley: a talk-like chat hub and client\n\
\n\
Welcome to the Parley hub!\n\
\n\
From here, you can send messages to all clients by typing text.\n\
Lines which begin with `/' are considered as commands.\n\
To get a comprehensive list of them, type `/help'.\n\
\n";

#[derive(Parser)]
#[command(name = "parley-hub", version, about = "Line-oriented chat hub")]
struct Args {
    /// TCP port to listen on.
    #[arg(default_value_t = 4242)]
    port: u16,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            exit(1);
        }
    };

    print!("{WELCOME}");

    let listener = match TcpListener::bind(("0.0.0.0", args.port)) {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("Error while creating socket: {err}");
            exit(2);
        }
    };
    // Shrink the kernel backlog from the std default.
    unsafe {
        libc::listen(listener.as_raw_fd(), 5);
    }
    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(err) => {
            eprintln!("Error while getting socket informations: {err}");
            exit(2);
        }
    };
    println!("Server is listening on port {port}.\n");
    let _ = std::io::stdout().flush();

    let _ = set_nonblocking(libc::STDIN_FILENO, true);
    let _ = set_nonblocking(libc::STDOUT_FILENO, true);

    let mut hub = match Hub::new(listener, Channel::console()) {
        Ok(hub) => hub,
        Err(err) => {
            eprintln!("Error while setting up the event loop: {err}");
            exit(2);
        }
    };
    if let Err(err) = hub.run() {
        error!(?err, "event loop failed");
    }

    let _ = set_nonblocking(libc::STDIN_FILENO, false);
    let _ = set_nonblocking(libc::STDOUT_FILENO, false);
}
