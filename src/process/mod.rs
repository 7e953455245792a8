//! Process launching and control.

mod child;
mod spawn;

pub use child::*;
pub use spawn::*;
