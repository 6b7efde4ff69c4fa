#[cfg(test)]
use mockall::automock;

use crate::RegistrationMemento;
use crate::Result;

/// Durable home of persistent registrations.
///
/// A memento is written once at registration and on lease renewal; the
/// running sequence number is checkpointed separately so dispatch never
/// rewrites the whole record.
#[cfg_attr(test, automock)]
pub trait RegistrationStore: Send + Sync + 'static {
    fn save(
        &self,
        memento: &RegistrationMemento,
    ) -> Result<()>;

    fn save_sequence(
        &self,
        id: u64,
        seq: u64,
    ) -> Result<()>;

    fn remove(
        &self,
        id: u64,
    ) -> Result<()>;

    fn load_all(&self) -> Result<Vec<RegistrationMemento>>;

    fn flush(&self) -> Result<()>;
}
