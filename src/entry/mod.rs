//! Entries, templates and the opaque matching predicate.
//!
//! Field marshaling and type-hierarchy resolution are owned by the caller;
//! the engine only consumes them through [`Matcher`].

mod entry;
mod matcher;
pub use entry::*;
pub use matcher::*;
