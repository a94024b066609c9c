//! Thin wrappers over the OS facilities the launcher depends on.

pub mod port;
pub mod probe;
pub mod process;
pub mod wait;
