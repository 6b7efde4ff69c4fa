use std::sync::Arc;

use super::*;
use crate::Entry;
use crate::EntryHandle;
use crate::FieldMatcher;
use crate::Oid;
use crate::StoredEntry;
use crate::Template;

struct Collect {
    seen: Vec<Oid>,
    stop_after: Option<usize>,
}

impl ScanVisitor for Collect {
    fn offer(
        &mut self,
        candidate: &EntryHandle,
    ) -> ScanControl {
        self.seen.push(candidate.oid());
        match self.stop_after {
            Some(n) if self.seen.len() >= n => ScanControl::Stop,
            _ => ScanControl::TryAgain,
        }
    }
}

fn collect() -> Collect {
    Collect {
        seen: vec![],
        stop_after: None,
    }
}

fn repo_with_hierarchy() -> MemRepository {
    let matcher = FieldMatcher::new();
    matcher.register_subtype("Car", "Vehicle");
    MemRepository::new(Arc::new(matcher))
}

fn stored(
    oid: u64,
    type_name: &str,
) -> EntryHandle {
    StoredEntry::new(Oid(oid), Entry::new(type_name, vec![Some(b"x".to_vec())]))
}

#[test]
fn test_find_offers_candidates_in_oid_order() {
    let repo = repo_with_hierarchy();
    repo.insert(stored(3, "Vehicle")).unwrap();
    repo.insert(stored(1, "Car")).unwrap();
    repo.insert(stored(2, "Vehicle")).unwrap();

    let mut visitor = collect();
    repo.find(&Template::of_type("Vehicle"), &mut visitor).unwrap();
    assert_eq!(visitor.seen, vec![Oid(1), Oid(2), Oid(3)]);
}

#[test]
fn test_find_excludes_supertypes_and_unrelated() {
    let repo = repo_with_hierarchy();
    repo.insert(stored(1, "Vehicle")).unwrap();
    repo.insert(stored(2, "Car")).unwrap();
    repo.insert(stored(3, "Boat")).unwrap();

    let mut visitor = collect();
    repo.find(&Template::of_type("Car"), &mut visitor).unwrap();
    assert_eq!(visitor.seen, vec![Oid(2)]);
}

#[test]
fn test_find_stops_when_visitor_says_so() {
    let repo = repo_with_hierarchy();
    for i in 1..=5 {
        repo.insert(stored(i, "Car")).unwrap();
    }
    let mut visitor = Collect {
        seen: vec![],
        stop_after: Some(2),
    };
    repo.find(&Template::any(), &mut visitor).unwrap();
    assert_eq!(visitor.seen.len(), 2);
}

#[test]
fn test_removed_entries_are_not_offered() {
    let repo = repo_with_hierarchy();
    let e = stored(1, "Car");
    repo.insert(e.clone()).unwrap();
    repo.insert(stored(2, "Car")).unwrap();
    e.mark_removed();

    let mut visitor = collect();
    repo.find(&Template::any(), &mut visitor).unwrap();
    assert_eq!(visitor.seen, vec![Oid(2)]);

    let mut visitor = collect();
    repo.find_oid(Oid(1), Some(&e), &mut visitor).unwrap();
    assert!(visitor.seen.is_empty());
}

#[test]
fn test_remove_and_get() {
    let repo = repo_with_hierarchy();
    repo.insert(stored(7, "Car")).unwrap();
    assert_eq!(repo.len(), 1);
    assert!(repo.get(Oid(7)).unwrap().is_some());

    let removed = repo.remove(Oid(7)).unwrap();
    assert_eq!(removed.map(|e| e.oid()), Some(Oid(7)));
    assert!(repo.get(Oid(7)).unwrap().is_none());
    assert!(repo.is_empty());
    assert!(repo.remove(Oid(7)).unwrap().is_none());
}

#[test]
fn test_find_oid_offers_live_entry() {
    let repo = repo_with_hierarchy();
    repo.insert(stored(4, "Car")).unwrap();
    let mut visitor = collect();
    repo.find_oid(Oid(4), None, &mut visitor).unwrap();
    assert_eq!(visitor.seen, vec![Oid(4)]);
}
