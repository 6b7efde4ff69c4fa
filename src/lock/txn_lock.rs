use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::trace;

use super::BaulkedParty;
use super::Handback;
use super::LockMode;
use super::LockOutcome;
use crate::Oid;
use crate::TxnId;

struct Waiter {
    party: Weak<dyn BaulkedParty>,
    handback: Handback,
}

#[derive(Default)]
struct LockInner {
    readers: HashSet<TxnId>,
    /// Single WRITE or DELETE holder. Invariant: `readers` is a subset of
    /// `{owner}` while this is set.
    exclusive: Option<(TxnId, LockMode)>,
    waiters: VecDeque<Waiter>,
}

impl LockInner {
    fn prior_of(
        &self,
        txn: TxnId,
    ) -> Option<LockMode> {
        match self.exclusive {
            Some((owner, mode)) if owner == txn => Some(mode),
            _ if self.readers.contains(&txn) => Some(LockMode::Read),
            _ => None,
        }
    }

    fn others_read(
        &self,
        txn: TxnId,
    ) -> bool {
        self.readers.iter().any(|r| *r != txn)
    }

    fn grantable(
        &self,
        txn: TxnId,
        mode: LockMode,
    ) -> bool {
        let exclusive_ok = match self.exclusive {
            None => true,
            Some((owner, _)) => owner == txn,
        };
        match mode {
            LockMode::Read => exclusive_ok,
            LockMode::Write | LockMode::Delete => exclusive_ok && !self.others_read(txn),
        }
    }

    fn grant(
        &mut self,
        txn: TxnId,
        mode: LockMode,
    ) {
        match mode {
            LockMode::Read => {
                // Reading one's own write or take needs no extra hold
                if self.exclusive.is_none() {
                    self.readers.insert(txn);
                }
            }
            LockMode::Write => {
                if !matches!(self.exclusive, Some((_, LockMode::Delete))) {
                    self.exclusive = Some((txn, LockMode::Write));
                }
            }
            LockMode::Delete => self.exclusive = Some((txn, LockMode::Delete)),
        }
    }

    fn release(
        &mut self,
        txn: TxnId,
    ) -> bool {
        let mut changed = self.readers.remove(&txn);
        if matches!(self.exclusive, Some((owner, _)) if owner == txn) {
            self.exclusive = None;
            changed = true;
        }
        changed
    }

    fn take_waiters(&mut self) -> Vec<Waiter> {
        self.waiters.drain(..).collect()
    }
}

/// Lock state of one stored entry.
pub struct TxnLock {
    oid: Oid,
    inner: Mutex<LockInner>,
}

impl std::fmt::Debug for TxnLock {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TxnLock")
            .field("oid", &self.oid)
            .field("readers", &inner.readers)
            .field("exclusive", &inner.exclusive)
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

impl TxnLock {
    pub fn new(oid: Oid) -> Self {
        Self {
            oid,
            inner: Mutex::new(LockInner::default()),
        }
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Attempts to acquire `mode` for `txn`.
    ///
    /// On conflict, `party` (if any) is registered and its `blocked` callback
    /// runs before this returns. With `restore` set no party is registered:
    /// recovery replay has nobody to wake.
    pub fn acquire(
        &self,
        txn: TxnId,
        mode: LockMode,
        party: Option<(&Arc<dyn BaulkedParty>, Handback)>,
        restore: bool,
    ) -> LockOutcome {
        let registered = {
            let mut inner = self.inner.lock();
            if inner.grantable(txn, mode) {
                let prior = inner.prior_of(txn);
                inner.grant(txn, mode);
                trace!(oid = ?self.oid, ?txn, ?mode, ?prior, "lock granted");
                return LockOutcome::Granted { prior };
            }

            match party {
                Some((party, handback)) if !restore => {
                    inner.waiters.retain(|w| w.party.strong_count() > 0);
                    inner.waiters.push_back(Waiter {
                        party: Arc::downgrade(party),
                        handback: handback.clone(),
                    });
                    Some((party, handback))
                }
                _ => None,
            }
        };

        trace!(oid = ?self.oid, ?txn, ?mode, registered = registered.is_some(), "lock baulked");
        if let Some((party, handback)) = registered {
            party.blocked(&handback);
        }
        LockOutcome::Baulked
    }

    /// Drops every hold `txn` has on this entry and wakes all registered
    /// waiters. `mode` is the operation being resolved.
    pub fn release(
        &self,
        txn: TxnId,
        mode: LockMode,
    ) {
        let waiters = {
            let mut inner = self.inner.lock();
            if !inner.release(txn) {
                return;
            }
            inner.take_waiters()
        };

        trace!(oid = ?self.oid, ?txn, ?mode, waiters = waiters.len(), "lock released");
        notify_waiters(waiters);
    }

    /// Undoes a grant that the caller could not use, restoring the hold
    /// `txn` had before (`prior` as reported by [`LockOutcome::Granted`]).
    pub fn revert(
        &self,
        txn: TxnId,
        prior: Option<LockMode>,
    ) {
        let waiters = {
            let mut inner = self.inner.lock();
            let changed = match prior {
                None => inner.release(txn),
                Some(LockMode::Read) => {
                    if matches!(inner.exclusive, Some((owner, _)) if owner == txn) {
                        inner.exclusive = None;
                        inner.readers.insert(txn);
                        true
                    } else {
                        false
                    }
                }
                Some(mode) => {
                    inner.exclusive = Some((txn, mode));
                    false
                }
            };
            if !changed {
                return;
            }
            inner.take_waiters()
        };
        notify_waiters(waiters);
    }

    /// Whether `mode` would currently be granted to `txn`, without
    /// registering anything. `None` probes on behalf of a transaction that
    /// holds nothing.
    pub fn is_available(
        &self,
        txn: Option<TxnId>,
        mode: LockMode,
    ) -> bool {
        let inner = self.inner.lock();
        match txn {
            Some(txn) => inner.grantable(txn, mode),
            None => match mode {
                LockMode::Read => inner.exclusive.is_none(),
                _ => inner.exclusive.is_none() && inner.readers.is_empty(),
            },
        }
    }

    /// Mode held by `txn`, if any
    pub fn held_by(
        &self,
        txn: TxnId,
    ) -> Option<LockMode> {
        self.inner.lock().prior_of(txn)
    }

    pub fn readers(&self) -> Vec<TxnId> {
        let mut readers: Vec<_> = self.inner.lock().readers.iter().copied().collect();
        readers.sort();
        readers
    }

    pub fn exclusive_holder(&self) -> Option<(TxnId, LockMode)> {
        self.inner.lock().exclusive
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// No holders and no waiters
    pub fn is_idle(&self) -> bool {
        let inner = self.inner.lock();
        inner.readers.is_empty() && inner.exclusive.is_none() && inner.waiters.is_empty()
    }
}

fn notify_waiters(waiters: Vec<Waiter>) {
    for waiter in waiters {
        if let Some(party) = waiter.party.upgrade() {
            party.unblocked(waiter.handback);
        }
    }
}
