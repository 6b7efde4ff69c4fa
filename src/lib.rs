//! A transactional, content-matched tuple space engine.
//!
//! Entries are written, read and taken under transactions. Access to each
//! entry is mediated by a per-entry lock; a read or take that finds only
//! locked candidates waits until a holder releases or a matching entry is
//! written. Committed writes, visibility changes and transaction ends are
//! fanned out by the [`EventQueue`] to blocked searches and remote
//! listeners.
//!
//! ```ignore
//! let space = SpaceBuilder::new(None)?.build()?;
//! space.start()?;
//! space.write(Entry::with_values("Item", &["a"]), None)?;
//! let taken = space.take(vec![Template::of_type("Item")], None, Duration::from_secs(1))?;
//! ```

mod config;
mod constants;
mod entry;
mod errors;
mod event;
mod lock;
mod metrics;
mod search;
mod space;
mod storage;
mod txn;
mod view;
pub mod utils;

pub use config::*;
pub use entry::*;
pub use errors::*;
pub use event::*;
pub use lock::*;
pub use metrics::*;
pub use search::*;
pub use space::*;
pub use storage::*;
pub use txn::*;
pub use utils::*;
pub use view::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
