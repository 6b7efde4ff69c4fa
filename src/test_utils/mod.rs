//! Fixtures shared by the unit tests of every module
mod common;
mod listener;

pub use common::*;
pub use listener::*;
