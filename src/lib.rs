//! Script Supervisor - turn a script's chunked output into pieces and a single outcome.

pub mod buffer;
pub mod config;
pub mod display;
pub mod process;
pub mod supervisor;
