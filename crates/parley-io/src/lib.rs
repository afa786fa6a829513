mod channel;
mod line;
mod poll;
mod queue;

pub use channel::{Channel, Stdio};
pub use line::Line;
pub use poll::{EventLoop, set_nonblocking};
pub use queue::{ByteQueue, Drain, Fill};
