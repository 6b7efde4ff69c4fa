//! Contents views: bounded iteration over matching entries.

mod contents;
mod uid_set;
pub use contents::*;
pub use uid_set::*;
