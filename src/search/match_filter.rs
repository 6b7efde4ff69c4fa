use crate::EntryHandle;
use crate::Matcher;
use crate::ScanControl;
use crate::ScanVisitor;
use crate::Template;

/// Applies the deep match before handing a storage candidate on, so the
/// wrapped `offer` only ever sees matching entries.
pub struct MatchFilter<'a, F> {
    matcher: &'a dyn Matcher,
    templates: &'a [Template],
    offer: F,
}

impl<'a, F> MatchFilter<'a, F>
where
    F: FnMut(&EntryHandle) -> ScanControl,
{
    pub fn new(
        matcher: &'a dyn Matcher,
        templates: &'a [Template],
        offer: F,
    ) -> Self {
        Self {
            matcher,
            templates,
            offer,
        }
    }
}

impl<F> ScanVisitor for MatchFilter<'_, F>
where
    F: FnMut(&EntryHandle) -> ScanControl,
{
    fn offer(
        &mut self,
        candidate: &EntryHandle,
    ) -> ScanControl {
        if self.templates.iter().any(|t| self.matcher.matches(t, candidate.entry())) {
            (self.offer)(candidate)
        } else {
            ScanControl::TryAgain
        }
    }
}
