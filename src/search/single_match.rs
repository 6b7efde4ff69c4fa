use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::Fairness;
use super::deadline_after;
use super::MatchFilter;
use super::Monitor;
use super::Outcome;
use super::SearchContext;
use super::SearchMode;
use crate::metrics::TASKS_COMPLETED;
use crate::BaulkedParty;
use crate::EntryHandle;
use crate::EntryTxnOp;
use crate::EventGenerator;
use crate::Handback;
use crate::LiveTarget;
use crate::LockMode;
use crate::LockOutcome;
use crate::ScanControl;
use crate::TaintReason;
use crate::Template;
use crate::TxnId;
use crate::TxnState;

#[derive(Debug, Default)]
struct TaskState {
    completion: Option<Outcome>,
    /// A caller is (or was) blocked in `get_entry`. Never reset.
    needs_wakeup: bool,
    scan_complete: bool,
    /// Lock attempts registered as waiters and not yet unblocked
    conflicts: usize,
    /// Live writes held back until the scan completes (FIFO only)
    late_writes: VecDeque<EntryHandle>,
}

/// What to undo once every task mutex has been released
type Undo = Option<Option<LockMode>>;

/// One read, take, read-if-exists or take-if-exists.
///
/// Lock grants are serialized by `attempt`; the completion is written once
/// under the monitor. Lock reverts are always issued after both are
/// released, because a revert can wake other tasks synchronously.
pub struct SingleMatchTask {
    me: Weak<SingleMatchTask>,
    ctx: SearchContext,
    txn: Arc<TxnState>,
    templates: Vec<Template>,
    mode: SearchMode,
    fairness: Fairness,
    if_exists: bool,
    attempt: Mutex<()>,
    monitor: Monitor<TaskState>,
    generator: Mutex<Option<Arc<EventGenerator>>>,
}

impl std::fmt::Debug for SingleMatchTask {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SingleMatchTask")
            .field("txn", &self.txn.id())
            .field("mode", &self.mode)
            .field("fairness", &self.fairness)
            .field("if_exists", &self.if_exists)
            .finish_non_exhaustive()
    }
}

impl SingleMatchTask {
    pub fn new(
        ctx: SearchContext,
        txn: Arc<TxnState>,
        templates: Vec<Template>,
        mode: SearchMode,
        fairness: Fairness,
        if_exists: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            ctx,
            txn,
            templates,
            mode,
            fairness,
            if_exists,
            attempt: Mutex::new(()),
            monitor: Monitor::new(TaskState::default()),
            generator: Mutex::new(None),
        })
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn.id()
    }

    /// Weak handle for live-write registration
    pub fn as_live_target(&self) -> Weak<dyn LiveTarget> {
        self.me.clone() as Weak<dyn LiveTarget>
    }

    /// Attaches the live-write interest; it is tainted when the task ends
    pub fn set_generator(
        &self,
        generator: Arc<EventGenerator>,
    ) {
        *self.generator.lock() = Some(generator);
    }

    /// Offers every stored candidate to the task. Marks the scan complete,
    /// drains held-back live writes and, for if-exists searches, gives up
    /// once no conflict is left to wait for.
    pub fn run_scan(&self) {
        for template in &self.templates {
            if self.is_complete() {
                break;
            }
            let mut filter = MatchFilter::new(self.ctx.matcher.as_ref(), std::slice::from_ref(template), |candidate| {
                self.attempt(candidate)
            });
            if let Err(e) = self.ctx.repository.find(template, &mut filter) {
                warn!(txn = ?self.txn.id(), "storage scan failed: {:?}", e);
                self.complete(Outcome::StorageError(e.to_string()));
                return;
            }
        }

        self.monitor.lock().scan_complete = true;
        loop {
            let next = {
                let mut state = self.monitor.lock();
                if state.completion.is_some() {
                    break;
                }
                state.late_writes.pop_front()
            };
            match next {
                Some(entry) => {
                    self.attempt(&entry);
                }
                None => break,
            }
        }
        self.check_exists_barrier();
    }

    /// Waits for the completion. On timeout the task is forced to
    /// [`Outcome::NotFound`] so nothing arriving later can change the answer.
    pub fn get_entry(
        &self,
        timeout: Duration,
    ) -> Outcome {
        let deadline = deadline_after(timeout);
        let outcome = {
            let mut state = self.monitor.lock();
            state.needs_wakeup = true;
            drop(state);

            let mut state = self.monitor.wait_until(deadline, |s| s.completion.is_some());
            state.completion.get_or_insert(Outcome::NotFound).clone()
        };
        self.finish(&outcome);
        outcome
    }

    /// Completes the task with [`Outcome::Interrupted`] unless it already
    /// completed
    pub fn interrupt(&self) -> bool {
        self.complete(Outcome::Interrupted)
    }

    pub fn is_complete(&self) -> bool {
        self.monitor.lock().completion.is_some()
    }

    /// Current completion, if any
    pub fn completion(&self) -> Option<Outcome> {
        self.monitor.lock().completion.clone()
    }

    pub fn conflicts(&self) -> usize {
        self.monitor.lock().conflicts
    }

    fn finish(
        &self,
        outcome: &Outcome,
    ) {
        if let Some(generator) = self.generator.lock().take() {
            generator.taint(TaintReason::SearchDone);
        }
        TASKS_COMPLETED.with_label_values(&[outcome.as_str()]).inc();
        debug!(txn = ?self.txn.id(), mode = ?self.mode, outcome = outcome.as_str(), "search task finished");
    }

    /// Sets the completion if none is set. Returns true if this call set it.
    fn complete(
        &self,
        outcome: Outcome,
    ) -> bool {
        let mut state = self.monitor.lock();
        if state.completion.is_some() {
            return false;
        }
        trace!(txn = ?self.txn.id(), outcome = outcome.as_str(), "search task completed");
        state.completion = Some(outcome);
        if state.needs_wakeup {
            self.monitor.notify_all();
        }
        true
    }

    fn check_exists_barrier(&self) {
        if !self.if_exists {
            return;
        }
        let mut state = self.monitor.lock();
        if state.completion.is_none() && state.scan_complete && state.conflicts == 0 {
            trace!(txn = ?self.txn.id(), "no match and no conflict left");
            state.completion = Some(Outcome::NotFound);
            if state.needs_wakeup {
                self.monitor.notify_all();
            }
        }
    }

    /// Tries to claim `entry`; `Stop` once the task is complete
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
    ) -> (ScanControl, Undo) {
        let _attempt = self.attempt.lock();
        if self.is_complete() {
            return (ScanControl::Stop, None);
        }
        if entry.is_removed() {
            return (ScanControl::TryAgain, None);
        }
        let Some(me) = self.me.upgrade() else {
            return (ScanControl::Stop, None);
        };
        let party: Arc<dyn BaulkedParty> = me;

        // Counted before the acquire: the unblocked callback may run before
        // acquire returns
        self.monitor.lock().conflicts += 1;
        let outcome = self.ctx.locks.acquire(
            self.txn.id(),
            entry.oid(),
            self.mode.lock_mode(),
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

        // Already taken by this transaction
        if prior == Some(LockMode::Delete) {
            return (ScanControl::TryAgain, None);
        }
        if entry.is_removed() {
            return (ScanControl::TryAgain, Some(prior));
        }
        if state.completion.is_some() {
            return (ScanControl::Stop, Some(prior));
        }

        if let Err(e) = self.txn.add(EntryTxnOp::new(entry.clone(), self.mode.lock_mode())) {
            debug!(txn = ?self.txn.id(), "transaction refused op: {:?}", e);
            state.completion = Some(Outcome::TxnEnded(self.txn.id()));
        } else {
            trace!(txn = ?self.txn.id(), oid = ?entry.oid(), mode = ?self.mode, "entry claimed");
            state.completion = Some(Outcome::Found(entry.clone()));
        }
        if state.needs_wakeup {
            self.monitor.notify_all();
        }
        match state.completion {
            Some(Outcome::Found(_)) => (ScanControl::Stop, None),
            _ => (ScanControl::Stop, Some(prior)),
        }
    }
}

impl BaulkedParty for SingleMatchTask {
    fn blocked(
        &self,
        handback: &Handback,
    ) {
        trace!(txn = ?self.txn.id(), oid = ?handback.oid, "search task waiting on conflict");
    }

    fn unblocked(
        &self,
        handback: Handback,
    ) {
        {
            let mut state = self.monitor.lock();
            state.conflicts = state.conflicts.saturating_sub(1);
            if state.completion.is_some() {
                return;
            }
        }

        // Re-read the stored state: the entry may be gone by now
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
        self.check_exists_barrier();
    }
}

impl LiveTarget for SingleMatchTask {
    fn offer_live(
        &self,
        entry: &EntryHandle,
    ) {
        if self.fairness == Fairness::Fifo {
            let mut state = self.monitor.lock();
            if state.completion.is_some() {
                return;
            }
            if !state.scan_complete {
                trace!(txn = ?self.txn.id(), oid = ?entry.oid(), "live write held until scan completes");
                state.late_writes.push_back(entry.clone());
                return;
            }
        }
        self.attempt(entry);
    }

    fn resolved(
        &self,
        txn: TxnId,
    ) {
        if txn == self.txn.id() && self.complete(Outcome::TxnEnded(txn)) {
            debug!(?txn, "transaction ended under outstanding search");
        }
    }
}
