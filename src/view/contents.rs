use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;

use super::UidSet;
use crate::search::Monitor;
use crate::search::deadline_after;
use crate::EntryHandle;
use crate::EntryTxnOp;
use crate::EventGenerator;
use crate::LiveTarget;
use crate::LockMode;
use crate::LockOutcome;
use crate::MatchFilter;
use crate::Result;
use crate::ScanControl;
use crate::SearchContext;
use crate::TaintReason;
use crate::Template;
use crate::TxnId;
use crate::TxnState;

#[derive(Debug)]
struct ViewState {
    uids: UidSet,
    closed: bool,
}

/// Iteration over the entries matching a set of templates.
///
/// Ids are collected from the storage scan and from live writes into a
/// bounded [`UidSet`]. Each id is re-validated against storage when it is
/// handed out, since the entry may have been taken in the meantime. Under a
/// transaction every returned entry is read-locked by it.
pub struct ContentsView {
    me: Weak<ContentsView>,
    ctx: SearchContext,
    txn: Option<Arc<TxnState>>,
    templates: Vec<Template>,
    monitor: Monitor<ViewState>,
    generator: Mutex<Option<Arc<EventGenerator>>>,
}

impl std::fmt::Debug for ContentsView {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ContentsView")
            .field("txn", &self.txn_id())
            .field("state", &*self.monitor.lock())
            .finish_non_exhaustive()
    }
}

impl ContentsView {
    pub fn new(
        ctx: SearchContext,
        txn: Option<Arc<TxnState>>,
        templates: Vec<Template>,
        capacity: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            ctx,
            txn,
            templates,
            monitor: Monitor::new(ViewState {
                uids: UidSet::new(capacity),
                closed: false,
            }),
            generator: Mutex::new(None),
        })
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn.as_ref().map(|t| t.id()).unwrap_or(TxnId::NONE)
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

    /// Collects matching ids from storage until the set is full
    pub fn run_scan(&self) -> Result<()> {
        for template in &self.templates {
            let mut filter = MatchFilter::new(self.ctx.matcher.as_ref(), std::slice::from_ref(template), |candidate| {
                let mut state = self.monitor.lock();
                state.uids.add(candidate.oid());
                if state.uids.is_full() {
                    ScanControl::Stop
                } else {
                    ScanControl::TryAgain
                }
            });
            self.ctx.repository.find(template, &mut filter)?;
            if self.monitor.lock().uids.is_full() {
                self.stop_live_feed();
                break;
            }
        }
        Ok(())
    }

    /// Next entry still present and readable. While the set can still grow,
    /// waits up to `timeout` for a live write to arrive.
    pub fn next(
        &self,
        timeout: Duration,
    ) -> Result<Option<EntryHandle>> {
        let deadline = deadline_after(timeout);
        loop {
            let oid = {
                let mut state = self
                    .monitor
                    .wait_until(deadline, |s| s.closed || s.uids.remaining() > 0 || s.uids.is_full());
                match state.uids.pop() {
                    Some(oid) => oid,
                    None => return Ok(None),
                }
            };

            let Some(entry) = self.ctx.repository.get(oid)? else {
                continue;
            };
            if entry.is_removed() {
                continue;
            }
            if let Some(entry) = self.claim(entry)? {
                return Ok(Some(entry));
            }
        }
    }

    /// Stops the live feed; ids already collected can still be drained
    pub fn close(&self) {
        self.monitor.lock().closed = true;
        self.monitor.notify_all();
        self.stop_live_feed();
        debug!(txn = ?self.txn_id(), "contents view closed");
    }

    pub fn is_closed(&self) -> bool {
        self.monitor.lock().closed
    }

    /// Ids collected so far, handed out or not
    pub fn collected(&self) -> usize {
        self.monitor.lock().uids.len()
    }

    fn stop_live_feed(&self) {
        if let Some(generator) = self.generator.lock().take() {
            generator.taint(TaintReason::SearchDone);
        }
    }

    fn claim(
        &self,
        entry: EntryHandle,
    ) -> Result<Option<EntryHandle>> {
        let Some(txn) = &self.txn else {
            let readable = self.ctx.locks.is_available(None, entry.oid(), LockMode::Read);
            return Ok(readable.then_some(entry));
        };

        let prior = match self.ctx.locks.acquire(txn.id(), entry.oid(), LockMode::Read, None, false) {
            LockOutcome::Baulked => {
                trace!(txn = ?txn.id(), oid = ?entry.oid(), "view skips conflicting entry");
                return Ok(None);
            }
            LockOutcome::Granted { prior } => prior,
        };
        if prior == Some(LockMode::Delete) {
            return Ok(None);
        }
        if let Err(e) = txn.add(EntryTxnOp::new(entry.clone(), LockMode::Read)) {
            self.ctx.locks.revert(txn.id(), entry.oid(), prior);
            return Err(e.into());
        }
        Ok(Some(entry))
    }
}

impl LiveTarget for ContentsView {
    fn offer_live(
        &self,
        entry: &EntryHandle,
    ) {
        let full = {
            let mut state = self.monitor.lock();
            if state.closed {
                return;
            }
            if state.uids.add(entry.oid()) {
                self.monitor.notify_all();
            }
            state.uids.is_full()
        };
        if full {
            self.stop_live_feed();
        }
    }

    fn resolved(
        &self,
        txn: TxnId,
    ) {
        if txn == self.txn_id() {
            self.close();
        }
    }
}
