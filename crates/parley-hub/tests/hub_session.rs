use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    os::unix::net::UnixStream,
    thread,
    time::{Duration, Instant},
};

use parley_hub::Hub;
use parley_io::Channel;

struct TestHub {
    addr: SocketAddr,
    console: UnixStream,
    handle: thread::JoinHandle<()>,
}

fn start_hub() -> TestHub {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (near, far) = UnixStream::pair().unwrap();
    near.set_nonblocking(true).unwrap();
    let handle = thread::spawn(move || {
        let mut hub = Hub::new(listener, Channel::from_socket(near)).unwrap();
        hub.run().unwrap();
    });
    far.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    TestHub { addr, console: far, handle }
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    stream
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Accumulate reads into `seen` until `needle` shows up or five seconds pass.
fn expect<S: Read>(stream: &mut S, seen: &mut Vec<u8>, needle: &[u8]) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut tmp = [0u8; 4096];
    while !contains(seen, needle) {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {:?}; saw {:?}",
            String::from_utf8_lossy(needle),
            String::from_utf8_lossy(seen),
        );
        match stream.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => seen.extend_from_slice(&tmp[..n]),
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut => {}
            Err(err) => panic!("read failed: {err}"),
        }
    }
    assert!(contains(seen, needle), "missing {:?}", String::from_utf8_lossy(needle));
}

/// Read everything currently available without waiting for more.
fn drain_available<S: Read>(stream: &mut S, seen: &mut Vec<u8>) {
    let mut tmp = [0u8; 4096];
    loop {
        match stream.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => seen.extend_from_slice(&tmp[..n]),
            Err(_) => break,
        }
    }
}

#[test]
fn chat_authentication_and_broadcast() {
    let mut hub = start_hub();
    let mut console_seen = Vec::new();

    let mut alice = connect(hub.addr);
    let mut alice_seen = Vec::new();
    alice.write_all(b"/connect alice\n").unwrap();
    expect(&mut alice, &mut alice_seen, b"** Hello, alice!\n");

    // Unauthenticated peers cannot chat.
    let mut bob = connect(hub.addr);
    let mut bob_seen = Vec::new();
    bob.write_all(b"hi there\n").unwrap();
    expect(&mut bob, &mut bob_seen, b"You are not authenticated yet.");

    // Nick collision: second `alice` is rejected and stays unauthenticated.
    bob.write_all(b"/connect alice\n").unwrap();
    expect(&mut bob, &mut bob_seen, b"Nickname is already taken.");
    bob.write_all(b"/connect bob\n").unwrap();
    expect(&mut bob, &mut bob_seen, b"** Hello, bob!\n");
    expect(&mut alice, &mut alice_seen, b"** bob connected.\n");

    expect(&mut hub.console, &mut console_seen, b"authenticated as `alice'");
    expect(&mut hub.console, &mut console_seen, b"authenticated as `bob'");

    // A plain line reaches the other peer prefixed, and never echoes back.
    alice.write_all(b"hello\n").unwrap();
    expect(&mut bob, &mut bob_seen, b"alice: hello\n");
    drain_available(&mut alice, &mut alice_seen);
    assert!(!contains(&alice_seen, b"alice: hello"));

    // `/who` on the hub console counts every connection, lists nicknames.
    hub.console.write_all(b"/who\n").unwrap();
    expect(&mut hub.console, &mut console_seen, b"There are 2 client(s) connected:\n");
    expect(&mut hub.console, &mut console_seen, b"alice\nbob\n");

    // `/quit` says goodbye, announces the departure, and drops the peer.
    bob.write_all(b"/quit\n").unwrap();
    expect(&mut bob, &mut bob_seen, b"** Goodbye!\n");
    expect(&mut alice, &mut alice_seen, b"** bob has left server.\n");
    expect(&mut alice, &mut alice_seen, b"** bob disconnected.\n");
    expect(&mut hub.console, &mut console_seen, b"Client `bob' disconnected.\n");

    drop(hub.console);
    hub.handle.join().unwrap();
}

#[test]
fn unknown_transfer_target_bounces_a_refusal() {
    let mut hub = start_hub();

    let mut alice = connect(hub.addr);
    let mut alice_seen = Vec::new();
    alice.write_all(b"/connect alice\n").unwrap();
    expect(&mut alice, &mut alice_seen, b"** Hello, alice!\n");

    alice.write_all(b"/send ghost 0123456789abcdef secure data.bin\n").unwrap();
    expect(&mut alice, &mut alice_seen, b"/refuse 0123456789abcdef nick\n");
    expect(&mut alice, &mut alice_seen, b"No such nickname.\n");

    drop(hub.console);
    hub.handle.join().unwrap();
}

#[test]
fn relay_rewrites_the_originator_and_splices_the_host() {
    let mut hub = start_hub();

    let mut alice = connect(hub.addr);
    let mut alice_seen = Vec::new();
    alice.write_all(b"/connect alice\n").unwrap();
    expect(&mut alice, &mut alice_seen, b"** Hello, alice!\n");

    let mut bob = connect(hub.addr);
    let mut bob_seen = Vec::new();
    bob.write_all(b"/connect bob\n").unwrap();
    expect(&mut bob, &mut bob_seen, b"** Hello, bob!\n");

    // alice asks to pull a file from bob; bob sees alice's nickname spliced
    // in as the first argument.
    alice.write_all(b"/receive bob aaaabbbbccccdddd secure notes.txt\n").unwrap();
    expect(&mut bob, &mut bob_seen, b"/receive alice aaaabbbbccccdddd secure notes.txt\n");

    // bob accepts; the hub inserts bob's host before the port.
    bob.write_all(b"/accept alice aaaabbbbccccdddd eeeeffff00001111 40000\n").unwrap();
    expect(
        &mut alice,
        &mut alice_seen,
        b"/accept bob aaaabbbbccccdddd eeeeffff00001111 127.0.0.1 40000\n",
    );

    drop(hub.console);
    hub.handle.join().unwrap();
}

#[test]
fn shutdown_notifies_and_drains_every_peer() {
    let mut hub = start_hub();

    let mut alice = connect(hub.addr);
    let mut alice_seen = Vec::new();
    alice.write_all(b"/connect alice\n").unwrap();
    expect(&mut alice, &mut alice_seen, b"** Hello, alice!\n");

    let mut bob = connect(hub.addr);
    let mut bob_seen = Vec::new();
    bob.write_all(b"/connect bob\n").unwrap();
    expect(&mut bob, &mut bob_seen, b"** Hello, bob!\n");

    hub.console.write_all(b"/shutdown\n").unwrap();
    expect(&mut alice, &mut alice_seen, b"Server is shutting down; closing connections.\n");
    expect(&mut bob, &mut bob_seen, b"Server is shutting down; closing connections.\n");

    hub.handle.join().unwrap();
}
