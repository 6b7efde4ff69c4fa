//! Event fan-out.
//!
//! ```text
//! write / commit / abort paths
//!   EventQueue::add(event, wait) -> bounded job channel
//!                                        ↓
//! dispatch workers (N threads):
//!   for each live generator (id order): can_see -> matches -> ping
//!                                                              ↓
//!                      SearchTask::offer_live  |  RemoteListener::notify
//! ```
//!
//! Tainted generators are removed from the registry by a reaper thread.

mod barrier;
mod event_queue;
mod generator;
mod listener;
mod memento;
mod queue_event;

pub use barrier::*;
pub use event_queue::*;
pub use generator::*;
pub use listener::*;
pub use memento::*;
pub use queue_event::*;

#[cfg(test)]
mod event_queue_test;
