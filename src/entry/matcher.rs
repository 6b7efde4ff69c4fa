use std::collections::HashMap;
use std::collections::HashSet;

use parking_lot::RwLock;

use super::Entry;
use super::Template;

/// Deep-match predicate consumed by the engine as a black box.
pub trait Matcher: Send + Sync + 'static {
    /// Whether entries of `entry_type` are instances of `template_type`
    fn is_subtype(
        &self,
        template_type: &str,
        entry_type: &str,
    ) -> bool;

    /// Template-vs-entry comparison. The default compares the type through
    /// [`Matcher::is_subtype`] and then every non-wildcard template field by
    /// position.
    fn matches(
        &self,
        template: &Template,
        entry: &Entry,
    ) -> bool {
        if let Some(template_type) = &template.type_name {
            if !self.is_subtype(template_type, &entry.type_name) {
                return false;
            }
        }

        template.fields.iter().enumerate().all(|(i, field)| match field {
            None => true,
            Some(expected) => matches!(entry.fields.get(i), Some(Some(actual)) if actual == expected),
        })
    }
}

/// Positional field matcher with an explicitly registered type hierarchy.
#[derive(Debug, Default)]
pub struct FieldMatcher {
    /// subtype -> direct supertypes
    parents: RwLock<HashMap<String, Vec<String>>>,
}

impl FieldMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `subtype` as a direct subtype of `supertype`
    pub fn register_subtype(
        &self,
        subtype: impl Into<String>,
        supertype: impl Into<String>,
    ) {
        self.parents
            .write()
            .entry(subtype.into())
            .or_default()
            .push(supertype.into());
    }
}

impl Matcher for FieldMatcher {
    fn is_subtype(
        &self,
        template_type: &str,
        entry_type: &str,
    ) -> bool {
        if template_type == entry_type {
            return true;
        }

        let parents = self.parents.read();
        let mut seen = HashSet::new();
        let mut pending = vec![entry_type];
        while let Some(current) = pending.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(supers) = parents.get(current) {
                for s in supers {
                    if s == template_type {
                        return true;
                    }
                    pending.push(s.as_str());
                }
            }
        }
        false
    }
}
