mod commands;
mod forbid;
mod session;
mod transfer;

pub use forbid::ForbidSet;
pub use session::Session;
pub use transfer::{Direction, Transfers};
