//! Search tasks: the lifecycle of one blocking read, take or bulk take.
//!
//! A task is offered candidates from two sources, the storage scan
//! ([`crate::EntryRepository::find`]) and live writes pinged by its
//! [`crate::EventGenerator`]. Each candidate goes through the lock manager;
//! a conflict registers the task as a [`crate::BaulkedParty`] and the scan
//! moves on. The first successful claim completes the task, exactly once.

mod bulk_take;
mod match_filter;
mod monitor;
mod outcome;
mod single_match;

pub use bulk_take::*;
pub use match_filter::*;
pub(crate) use monitor::*;
pub use outcome::*;
pub use single_match::*;


use std::sync::Arc;

use crate::EntryRepository;
use crate::LockManager;
use crate::LockMode;
use crate::Matcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Read,
    Take,
}

impl SearchMode {
    pub fn lock_mode(&self) -> LockMode {
        match self {
            SearchMode::Read => LockMode::Read,
            SearchMode::Take => LockMode::Delete,
        }
    }
}

/// Ordering policy between scan candidates and live writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fairness {
    /// First successful lock attempt wins
    #[default]
    Plain,
    /// Scan candidates are exhausted before live writes are considered
    Fifo,
}

/// Collaborators every search task needs
#[derive(Clone)]
pub struct SearchContext {
    pub locks: Arc<LockManager>,
    pub repository: Arc<dyn EntryRepository>,
    pub matcher: Arc<dyn Matcher>,
}

impl std::fmt::Debug for SearchContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SearchContext").field("locks", &self.locks.len()).finish_non_exhaustive()
    }
}
