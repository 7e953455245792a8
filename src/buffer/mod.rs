//! Buffering of chunked process output into delimiter-bounded pieces.

mod delimiter;
mod piece;

pub use delimiter::*;
pub use piece::*;
