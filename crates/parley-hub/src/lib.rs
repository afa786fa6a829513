mod commands;
mod hub;
mod registry;

pub use hub::Hub;
pub use registry::{AuthError, Peer, PeerId, Registry};
