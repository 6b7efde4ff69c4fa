use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::deadline_after;
use super::MatchFilter;
use super::Monitor;
use super::Outcome;
use super::SearchContext;
use crate::metrics::TASKS_COMPLETED;
use crate::BaulkedParty;
use crate::EntryHandle;
use crate::EntryTxnOp;
use crate::EventGenerator;
use crate::Handback;
use crate::LiveTarget;
use crate::LockMode;
use crate::LockOutcome;
use crate::Oid;
use crate::Result;
use crate::ScanControl;
use crate::TaintReason;
use crate::Template;
use crate::TxnId;
use crate::TxnState;

#[derive(Debug, Default)]
struct BulkState {
    taken: Vec<EntryHandle>,
    taken_oids: HashSet<Oid>,
    /// Set once the visitor wants nothing more. `NotFound` is an ordinary
    /// close; anything else is reported as an error.
    closed: Option<Outcome>,
    needs_wakeup: bool,
    scan_complete: bool,
    conflicts: usize,
}

impl BulkState {
    fn have_completed(&self) -> bool {
        self.closed.is_some() || (self.scan_complete && !self.taken.is_empty())
    }
}

/// Greedy take of up to `limit` entries matching any of several templates.
///
/// Unlike [`crate::SingleMatchTask`] it does not stop at the first claim: the
/// scan keeps taking until the quota is filled. A caller blocks only while
/// nothing has been taken yet.
pub struct BulkTakeVisitor {
    me: Weak<BulkTakeVisitor>,
    ctx: SearchContext,
    txn: Arc<TxnState>,
    templates: Vec<Template>,
    limit: usize,
    attempt: Mutex<()>,
    monitor: Monitor<BulkState>,
    generator: Mutex<Option<Arc<EventGenerator>>>,
}

impl std::fmt::Debug for BulkTakeVisitor {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("BulkTakeVisitor")
            .field("txn", &self.txn.id())
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl BulkTakeVisitor {
    pub fn new(
        ctx: SearchContext,
        txn: Arc<TxnState>,
        templates: Vec<Template>,
        limit: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            ctx,
            txn,
            templates,
            limit: limit.max(1),
            attempt: Mutex::new(()),
            monitor: Monitor::new(BulkState::default()),
            generator: Mutex::new(None),
        })
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn as_live_target(&self) -> Weak<dyn LiveTarget> {
        self.me.clone() as Weak<dyn LiveTarget>
    }

    pub fn set_generator(
        &self,
        generator: Arc<EventGenerator>,
    ) {
        *self.generator.lock() = Some(generator);
    }

    /// Whether the quota still has room
    pub fn wants_more(&self) -> bool {
        let state = self.monitor.lock();
        state.closed.is_none() && state.taken.len() < self.limit
    }

    pub fn run_scan(&self) {
        for template in &self.templates {
            if !self.wants_more() {
                break;
            }
            // Every template is tried against every candidate; an entry
            // matching several templates is still taken once
            let mut filter = MatchFilter::new(self.ctx.matcher.as_ref(), &self.templates, |candidate| {
                self.attempt(candidate)
            });
            if let Err(e) = self.ctx.repository.find(template, &mut filter) {
                warn!(txn = ?self.txn.id(), "storage scan failed: {:?}", e);
                self.close(Outcome::StorageError(e.to_string()));
                return;
            }
        }

        let mut state = self.monitor.lock();
        state.scan_complete = true;
        if state.have_completed() && state.needs_wakeup {
            self.monitor.notify_all();
        }
    }

    /// Waits until at least one entry was taken, the quota is full, or the
    /// timeout passes, then closes the visitor.
    pub fn get_entries(
        &self,
        timeout: Duration,
    ) -> Result<Vec<EntryHandle>> {
        let deadline = deadline_after(timeout);
        let (closed, taken) = {
            self.monitor.lock().needs_wakeup = true;
            let mut state = self.monitor.wait_until(deadline, |s| s.have_completed());
            let closed = state.closed.get_or_insert(Outcome::NotFound).clone();
            (closed, state.taken.clone())
        };

        if let Some(generator) = self.generator.lock().take() {
            generator.taint(TaintReason::SearchDone);
        }
        TASKS_COMPLETED.with_label_values(&[closed.as_str()]).inc();
        debug!(txn = ?self.txn.id(), taken = taken.len(), outcome = closed.as_str(), "bulk take finished");

        match closed.error() {
            Some(e) => Err(e),
            None => Ok(taken),
        }
    }

    pub fn interrupt(&self) -> bool {
        self.close(Outcome::Interrupted)
    }

    pub fn taken_count(&self) -> usize {
        self.monitor.lock().taken.len()
    }

    fn close(
        &self,
        outcome: Outcome,
    ) -> bool {
        let mut state = self.monitor.lock();
        if state.closed.is_some() {
            return false;
        }
        state.closed = Some(outcome);
        if state.needs_wakeup {
            self.monitor.notify_all();
        }
        true
    }

    fn attempt(
        &self,
        entry: &EntryHandle,
    ) -> ScanControl {
        let (control, undo) = self.claim(entry);
        if let Some(prior) = undo {
            self.ctx.locks.revert(self.txn.id(), entry.oid(), prior);
            // Removed while we held the claim; its remover may have reclaimed already
            if entry.is_removed() {
                self.ctx.locks.reclaim(entry.oid());
            }
        }
        control
    }

    fn claim(
        &self,
        entry: &EntryHandle,
    ) -> (ScanControl, Option<Option<LockMode>>) {
        let _attempt = self.attempt.lock();
        {
            let state = self.monitor.lock();
            if state.closed.is_some() || state.taken.len() >= self.limit {
                return (ScanControl::Stop, None);
            }
            if state.taken_oids.contains(&entry.oid()) {
                return (ScanControl::TryAgain, None);
            }
        }
        if entry.is_removed() {
            return (ScanControl::TryAgain, None);
        }
        let Some(me) = self.me.upgrade() else {
            return (ScanControl::Stop, None);
        };
        let party: Arc<dyn BaulkedParty> = me;

        self.monitor.lock().conflicts += 1;
        let outcome = self.ctx.locks.acquire(
            self.txn.id(),
            entry.oid(),
            LockMode::Delete,
            Some((
                &party,
                Handback {
                    oid: entry.oid(),
                    entry: entry.clone(),
                },
            )),
            false,
        );
        let prior = match outcome {
            LockOutcome::Baulked => return (ScanControl::TryAgain, None),
            LockOutcome::Granted { prior } => prior,
        };

        let mut state = self.monitor.lock();
        state.conflicts -= 1;
        if prior == Some(LockMode::Delete) {
            return (ScanControl::TryAgain, None);
        }
        if entry.is_removed() {
            return (ScanControl::TryAgain, Some(prior));
        }
        if state.closed.is_some() {
            return (ScanControl::Stop, Some(prior));
        }

        if let Err(e) = self.txn.add(EntryTxnOp::new(entry.clone(), LockMode::Delete)) {
            debug!(txn = ?self.txn.id(), "transaction refused op: {:?}", e);
            state.closed = Some(Outcome::TxnEnded(self.txn.id()));
            if state.needs_wakeup {
                self.monitor.notify_all();
            }
            return (ScanControl::Stop, Some(prior));
        }

        trace!(txn = ?self.txn.id(), oid = ?entry.oid(), "entry taken in bulk");
        state.taken_oids.insert(entry.oid());
        state.taken.push(entry.clone());
        let full = state.taken.len() >= self.limit;
        if full {
            state.closed = Some(Outcome::NotFound);
        }
        if state.have_completed() && state.needs_wakeup {
            self.monitor.notify_all();
        }
        if full {
            (ScanControl::Stop, None)
        } else {
            (ScanControl::TryAgain, None)
        }
    }
}

impl BaulkedParty for BulkTakeVisitor {
    fn blocked(
        &self,
        handback: &Handback,
    ) {
        trace!(txn = ?self.txn.id(), oid = ?handback.oid, "bulk take waiting on conflict");
    }

    fn unblocked(
        &self,
        handback: Handback,
    ) {
        {
            let mut state = self.monitor.lock();
            state.conflicts = state.conflicts.saturating_sub(1);
            if state.closed.is_some() {
                return;
            }
        }

        let mut filter = MatchFilter::new(self.ctx.matcher.as_ref(), &self.templates, |candidate| {
            self.attempt(candidate)
        });
        if let Err(e) = self
            .ctx
            .repository
            .find_oid(handback.oid, Some(&handback.entry), &mut filter)
        {
            warn!(txn = ?self.txn.id(), oid = ?handback.oid, "re-offer after unblock failed: {:?}", e);
        }
    }
}

impl LiveTarget for BulkTakeVisitor {
    fn offer_live(
        &self,
        entry: &EntryHandle,
    ) {
        self.attempt(entry);
    }

    fn resolved(
        &self,
        txn: TxnId,
    ) {
        if txn == self.txn.id() {
            self.close(Outcome::TxnEnded(txn));
        }
    }
}
