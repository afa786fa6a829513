mod id;
mod policy;
mod refuse;
mod router;
mod tokens;

pub use id::{ID_LEN, new_id};
pub use policy::{NameError, TransferMode, check_filename};
pub use refuse::RefuseReason;
pub use router::{Command, Flow, Replies, dispatch};
pub use tokens::tokenize;
