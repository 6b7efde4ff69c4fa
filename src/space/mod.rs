//! The process-wide space context.
//!
//! [`Space`] owns one instance of every engine component (lock manager,
//! event queue, transaction manager, repository) and wires them together.
//! It is assembled once by [`SpaceBuilder`], started before first use and
//! stopped before it is dropped.

mod builder;
mod space;

pub use builder::*;
pub use space::*;

#[cfg(test)]
mod space_test;
