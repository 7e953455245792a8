//! Supervisor module for process lifecycle and outcome classification.

mod delegate;
mod outcome;
mod runner;
mod state;

pub use delegate::*;
pub use outcome::*;
pub use runner::*;
pub use state::*;
