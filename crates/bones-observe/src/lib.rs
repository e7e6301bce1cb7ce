//! Logging bootstrap shared by the bones binaries.

mod logger;
pub use logger::*;
