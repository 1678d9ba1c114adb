//! Small, mostly-stdlib helpers shared by the gator crates: subprocess
//! execution with streaming output and timeouts, bounded retry with
//! backoff, and path/string sanitization. Keep this crate's own
//! dependency list thin; anything that needs a cloud SDK or a mount
//! syscall belongs in `gator-lib` or `gator-blockdev` instead.

mod command;
mod path;
mod retry;

pub use command::*;
pub use path::*;
pub use retry::*;
