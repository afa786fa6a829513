use std::{
    collections::HashMap,
    io::{Read, Write},
};

use indexmap::IndexMap;
use parley_io::Channel;
use thiserror::Error;

/// Stable handle for a connected peer, valid until the peer is removed.
pub type PeerId = u64;

/// One connected client of the hub. A peer starts unauthenticated; `/connect`
/// gives it a nickname, `/quit`, `/kill` or shutdown puts it into draining,
/// where only its pending output survives.
pub struct Peer<T> {
    pub channel: Channel<T>,
    pub addr: String,
    nick: Option<String>,
    draining: bool,
}

impl<T: Read + Write> Peer<T> {
    fn new(channel: Channel<T>, addr: String) -> Self {
        Self { channel, addr, nick: None, draining: false }
    }

    pub fn nick(&self) -> Option<&str> {
        self.nick.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.nick.is_some()
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    pub fn set_draining(&mut self) {
        self.draining = true;
    }

    /// Nickname when authenticated, connection address otherwise.
    pub fn display_name(&self) -> &str {
        self.nick.as_deref().unwrap_or(&self.addr)
    }

    /// Host portion of the stored `host:port` address.
    pub fn host(&self) -> &str {
        self.addr.split(':').next().unwrap_or(&self.addr)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("nickname is empty or contains `:`")]
    Invalid,
    #[error("nickname is already taken")]
    Taken,
}

/// The set of connected peers plus the nickname index. Iteration order is
/// connection order; removal by handle is O(1) and safe while iterating over
/// an id snapshot.
pub struct Registry<T> {
    peers: IndexMap<PeerId, Peer<T>>,
    by_nick: HashMap<String, PeerId>,
    next_id: PeerId,
}

impl<T: Read + Write> Registry<T> {
    pub fn new() -> Self {
        Self { peers: IndexMap::new(), by_nick: HashMap::new(), next_id: 0 }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn insert(&mut self, channel: Channel<T>, addr: String) -> PeerId {
        let id = self.next_id;
        self.next_id += 1;
        self.peers.insert(id, Peer::new(channel, addr));
        id
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer<T>> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer<T>> {
        self.peers.get_mut(&id)
    }

    /// Snapshot of the current ids, so callers can remove peers while
    /// walking.
    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn lookup(&self, nick: &str) -> Option<PeerId> {
        self.by_nick.get(nick).copied()
    }

    /// Bind a nickname to an unauthenticated peer and index it. Nicknames
    /// must be non-empty, contain no `:`, and be unused.
    pub fn authenticate(&mut self, id: PeerId, nick: &str) -> Result<(), AuthError> {
        if nick.is_empty() || nick.contains(':') {
            return Err(AuthError::Invalid);
        }
        if self.by_nick.contains_key(nick) {
            return Err(AuthError::Taken);
        }
        let peer = self.peers.get_mut(&id).ok_or(AuthError::Invalid)?;
        debug_assert!(peer.nick.is_none());
        peer.nick = Some(nick.to_owned());
        self.by_nick.insert(nick.to_owned(), id);
        Ok(())
    }

    /// Unlink a peer and its nickname. The caller owns teardown of the
    /// channel.
    pub fn remove(&mut self, id: PeerId) -> Option<Peer<T>> {
        let peer = self.peers.shift_remove(&id)?;
        if let Some(nick) = peer.nick() {
            self.by_nick.remove(nick);
        }
        Some(peer)
    }

    /// Enqueue the same bytes to every authenticated, non-draining peer,
    /// optionally excluding the originator.
    pub fn broadcast(&mut self, bytes: &[u8], except: Option<PeerId>) {
        for (&id, peer) in &mut self.peers {
            if Some(id) == except || !peer.is_authenticated() || peer.is_draining() {
                continue;
            }
            peer.channel.push(bytes);
        }
    }

    /// Nicknames of authenticated, non-draining peers in connection order.
    pub fn authenticated(&self) -> impl Iterator<Item = &str> {
        self.peers
            .values()
            .filter(|p| p.is_authenticated() && !p.is_draining())
            .filter_map(Peer::nick)
    }
}

impl<T: Read + Write> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
