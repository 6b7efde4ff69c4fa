//! Storage collaborators consumed by the engine.
//!
//! The engine never owns the on-disk entry store or the transaction log; it
//! talks to them through [`EntryRepository`], [`EntryLog`] and
//! [`RegistrationStore`]. In-memory implementations back tests and embedded
//! use, and [`SledRegistrationStore`] keeps persistent registrations across
//! restarts.

mod entry_log;
mod mem_registration_store;
mod mem_repository;
mod registration_store;
mod repository;
mod sled_registration_store;

pub use entry_log::*;
pub use mem_registration_store::*;
pub use mem_repository::*;
pub use registration_store::*;
pub use repository::*;
pub use sled_registration_store::*;

#[cfg(test)]
mod mem_repository_test;

use std::path::Path;

use tracing::debug;
use tracing::warn;

/// Opens the sled database that holds persistent registrations
pub fn init_sled_registration_db(
    sled_db_root_path: impl AsRef<Path> + std::fmt::Debug
) -> std::result::Result<sled::Db, std::io::Error> {
    debug!("init_sled_registration_db from path: {:?}", &sled_db_root_path);

    let path = sled_db_root_path.as_ref();
    let registration_db_path = path.join("registrations");

    sled::Config::default()
        .path(&registration_db_path)
        .cache_capacity(10 * 1024 * 1024) //10MB
        .flush_every_ms(Some(3))
        .use_compression(true)
        .compression_factor(1)
        .open()
        .map_err(|e| {
            warn!(
                "Try to open DB at this location: {:?} and failed: {:?}",
                registration_db_path, e
            );
            std::io::Error::other(e)
        })
}
