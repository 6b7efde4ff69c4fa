use crate::EntryHandle;
use crate::Oid;
use crate::Result;
use crate::Template;

/// Verdict of a visitor on one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    /// Stop the scan; the visitor needs nothing more
    Stop,
    /// Keep offering candidates
    TryAgain,
}

/// Receives storage candidates one at a time
pub trait ScanVisitor {
    fn offer(
        &mut self,
        candidate: &EntryHandle,
    ) -> ScanControl;
}

/// Entry repository scanned by search tasks.
///
/// `find` offers a coarse candidate set (every entry whose type is the
/// template type or one of its subtypes) in ascending [`Oid`] order; deep
/// field matching is applied by the caller.
pub trait EntryRepository: Send + Sync + 'static {
    fn insert(
        &self,
        entry: EntryHandle,
    ) -> Result<()>;

    fn remove(
        &self,
        oid: Oid,
    ) -> Result<Option<EntryHandle>>;

    fn get(
        &self,
        oid: Oid,
    ) -> Result<Option<EntryHandle>>;

    fn find(
        &self,
        template: &Template,
        visitor: &mut dyn ScanVisitor,
    ) -> Result<()>;

    /// Offers the current stored state of `oid`, if it is still present.
    /// `known` is the caller's last seen handle, used as a cheap liveness
    /// check before touching storage.
    fn find_oid(
        &self,
        oid: Oid,
        known: Option<&EntryHandle>,
        visitor: &mut dyn ScanVisitor,
    ) -> Result<()> {
        if known.is_some_and(|e| e.is_removed()) {
            return Ok(());
        }
        if let Some(entry) = self.get(oid)? {
            if !entry.is_removed() {
                visitor.offer(&entry);
            }
        }
        Ok(())
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
