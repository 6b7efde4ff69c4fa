use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::time::expiry_from_now;
use crate::time::get_now_as_u64_ms;
use crate::Affinity;
use crate::BulkTakeVisitor;
use crate::ContentsView;
use crate::Entry;
use crate::EntryHandle;
use crate::EntryLog;
use crate::EntryRepository;
use crate::EntryTxnOp;
use crate::Error;
use crate::EventQueue;
use crate::GeneratorKind;
use crate::ListenerResolver;
use crate::LockManager;
use crate::LockMode;
use crate::LoggedOp;
use crate::Matcher;
use crate::Oid;
use crate::QueueEvent;
use crate::RemoteListener;
use crate::Result;
use crate::SearchContext;
use crate::SearchMode;
use crate::SingleMatchTask;
use crate::SpaceConfig;
use crate::StoredEntry;
use crate::Template;
use crate::TxnId;
use crate::TxnManager;
use crate::TxnState;

/// Transaction an operation runs under. Implicit transactions are created
/// for a single call and resolved before it returns.
struct Scope {
    state: Arc<TxnState>,
    implicit: bool,
}

/// A running tuple space.
///
/// Every operation takes an optional [`TxnId`]. Without one, the operation
/// runs in its own transaction that is committed when the operation took
/// effect and aborted otherwise.
pub struct Space {
    pub(super) config: SpaceConfig,
    pub(super) matcher: Arc<dyn Matcher>,
    pub(super) repository: Arc<dyn EntryRepository>,
    pub(super) log: Arc<dyn EntryLog>,
    pub(super) locks: Arc<LockManager>,
    pub(super) events: Arc<EventQueue>,
    pub(super) txns: Arc<TxnManager>,
    pub(super) next_oid: AtomicU64,
}

impl std::fmt::Debug for Space {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("config", &self.config)
            .field("entries", &self.repository.len())
            .field("events", &self.events)
            .field("txns", &self.txns)
            .finish_non_exhaustive()
    }
}

impl Space {
    /// Starts the dispatch workers. Must be called before any operation.
    pub fn start(&self) -> Result<()> {
        self.events.start()?;
        info!(
            workers = self.config.dispatcher.worker_threads,
            "space started"
        );
        Ok(())
    }

    /// Lets queued events drain for up to `shutdown_grace_ms`, then stops
    /// the dispatcher. Events still queued afterwards are abandoned.
    pub fn stop(&self) {
        let grace = Duration::from_millis(self.config.dispatcher.shutdown_grace_ms);
        if !self.events.wait_drained(grace) {
            warn!(pending = self.events.pending(), "events still queued after shutdown grace");
        }
        self.events.stop();
        info!("space stopped");
    }

    pub fn is_running(&self) -> bool {
        self.events.is_running()
    }

    // ---------------------------------------------------------------
    // Transactions

    pub fn begin(&self) -> TxnId {
        self.txns.begin().id()
    }

    pub fn prepare(
        &self,
        txn: TxnId,
    ) -> Result<()> {
        self.txns.prepare(txn)
    }

    pub fn commit(
        &self,
        txn: TxnId,
    ) -> Result<()> {
        self.txns.commit(txn)
    }

    pub fn abort(
        &self,
        txn: TxnId,
    ) -> Result<()> {
        self.txns.abort(txn)
    }

    /// Recovery replay of a transaction that was prepared before a restart
    pub fn restore_transaction(
        &self,
        txn: TxnId,
        ops: Vec<LoggedOp>,
    ) -> Result<()> {
        if let Some(max) = ops.iter().map(|op| op.oid.0).max() {
            self.next_oid.fetch_max(max + 1, Ordering::AcqRel);
        }
        self.txns.restore(txn, ops)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Entries

    /// Stores `entry`. It stays invisible to other transactions until `txn`
    /// commits.
    #[instrument(skip(self, entry), fields(type_name = %entry.type_name))]
    pub fn write(
        &self,
        entry: Entry,
        txn: Option<TxnId>,
    ) -> Result<EntryHandle> {
        let scope = self.scope(txn)?;
        let result = self.write_in(&scope.state, entry);
        self.settle(&scope, result.is_ok())?;
        result
    }

    fn write_in(
        &self,
        state: &Arc<TxnState>,
        entry: Entry,
    ) -> Result<EntryHandle> {
        let txn = state.id();
        let oid = Oid(self.next_oid.fetch_add(1, Ordering::AcqRel));
        let handle = StoredEntry::new(oid, entry);

        // Locked before it is reachable by any scan
        if !self.locks.acquire(txn, oid, LockMode::Write, None, false).is_granted() {
            return Err(Error::Fatal(format!("fresh {oid} already locked")));
        }
        if let Err(e) = state.add(EntryTxnOp::new(handle.clone(), LockMode::Write)) {
            self.locks.release(txn, oid, LockMode::Write);
            self.locks.reclaim(oid);
            return Err(e.into());
        }
        if let Err(e) = self.repository.insert(handle.clone()) {
            // The op stays recorded; ending the transaction cleans it up
            warn!(?txn, ?oid, "repository insert failed: {:?}", e);
            return Err(e);
        }

        if let Err(e) = self.events.add(QueueEvent::entry_write(txn, handle.clone()), false) {
            warn!(?txn, ?oid, "entry write not dispatched: {:?}", e);
        }
        debug!(?txn, ?oid, "entry written");
        Ok(handle)
    }

    /// Waits up to `timeout` for an entry matching any of `templates`
    pub fn read(
        &self,
        templates: Vec<Template>,
        txn: Option<TxnId>,
        timeout: Duration,
    ) -> Result<Option<EntryHandle>> {
        self.single(templates, txn, SearchMode::Read, false, timeout)
    }

    /// Like [`read`](Self::read), but the entry is removed when the
    /// transaction commits
    pub fn take(
        &self,
        templates: Vec<Template>,
        txn: Option<TxnId>,
        timeout: Duration,
    ) -> Result<Option<EntryHandle>> {
        self.single(templates, txn, SearchMode::Take, false, timeout)
    }

    /// Returns `None` as soon as no stored entry matches and no matching
    /// entry is locked by another transaction. Waits only while a conflict
    /// may still resolve.
    pub fn read_if_exists(
        &self,
        templates: Vec<Template>,
        txn: Option<TxnId>,
        timeout: Duration,
    ) -> Result<Option<EntryHandle>> {
        self.single(templates, txn, SearchMode::Read, true, timeout)
    }

    pub fn take_if_exists(
        &self,
        templates: Vec<Template>,
        txn: Option<TxnId>,
        timeout: Duration,
    ) -> Result<Option<EntryHandle>> {
        self.single(templates, txn, SearchMode::Take, true, timeout)
    }

    fn single(
        &self,
        templates: Vec<Template>,
        txn: Option<TxnId>,
        mode: SearchMode,
        if_exists: bool,
        timeout: Duration,
    ) -> Result<Option<EntryHandle>> {
        let scope = self.scope(txn)?;
        let fairness = self
            .config
            .search
            .fairness_for(templates.first().and_then(|t| t.type_name.as_deref()));

        let task = SingleMatchTask::new(
            self.search_context(),
            scope.state.clone(),
            templates.clone(),
            mode,
            fairness,
            if_exists,
        );
        // Interest is registered before the scan so no write can fall between
        let generator = self
            .events
            .register_search(templates, scope.state.id(), task.as_live_target());
        task.set_generator(generator);
        task.run_scan();

        let outcome = task.get_entry(timeout);
        self.settle(&scope, outcome.is_found())?;
        outcome.into_result()
    }

    /// Takes up to `limit` entries matching any of `templates`. Returns as
    /// soon as at least one entry was taken once the stored entries have been
    /// scanned, or when `timeout` passes.
    pub fn take_multiple(
        &self,
        templates: Vec<Template>,
        limit: usize,
        txn: Option<TxnId>,
        timeout: Duration,
    ) -> Result<Vec<EntryHandle>> {
        let scope = self.scope(txn)?;
        let visitor = BulkTakeVisitor::new(self.search_context(), scope.state.clone(), templates.clone(), limit);
        let generator = self
            .events
            .register_search(templates, scope.state.id(), visitor.as_live_target());
        visitor.set_generator(generator);
        visitor.run_scan();

        let result = visitor.get_entries(timeout);
        let took = matches!(&result, Ok(taken) if !taken.is_empty());
        self.settle(&scope, took)?;
        result
    }

    /// Snapshot-plus-live view of the entries matching `templates`, holding
    /// at most `capacity` ids (clamped to the configured bounds). Under a
    /// transaction, every entry handed out is read-locked.
    pub fn contents(
        &self,
        templates: Vec<Template>,
        txn: Option<TxnId>,
        capacity: Option<usize>,
    ) -> Result<Arc<ContentsView>> {
        let state = txn.map(|t| self.txns.resolve_active(t)).transpose()?;
        let capacity = self.config.view.capacity_for(capacity);
        let view = ContentsView::new(self.search_context(), state, templates.clone(), capacity);

        let generator = self
            .events
            .register_search(templates, view.txn_id(), view.as_live_target());
        view.set_generator(generator);
        view.run_scan()?;
        Ok(view)
    }

    // ---------------------------------------------------------------
    // Registrations

    /// Registers `listener` for every committed write matching `templates`.
    /// Without a transaction the registration is persistent. Returns the
    /// registration id.
    pub fn notify(
        &self,
        templates: Vec<Template>,
        listener: Arc<dyn RemoteListener>,
        handback: Vec<u8>,
        lease: Option<Duration>,
        txn: Option<TxnId>,
    ) -> Result<u64> {
        let kind = GeneratorKind::Notify { listener, handback };
        self.register(templates, kind, lease, txn)
    }

    /// Registers `listener` for entries becoming visible to other
    /// transactions. Unless `visible_only`, also for entries that stop being
    /// locked.
    pub fn register_visibility(
        &self,
        templates: Vec<Template>,
        listener: Arc<dyn RemoteListener>,
        handback: Vec<u8>,
        visible_only: bool,
        lease: Option<Duration>,
        txn: Option<TxnId>,
    ) -> Result<u64> {
        let kind = GeneratorKind::Visibility {
            listener,
            handback,
            visible_only,
        };
        self.register(templates, kind, lease, txn)
    }

    fn register(
        &self,
        templates: Vec<Template>,
        kind: GeneratorKind,
        lease: Option<Duration>,
        txn: Option<TxnId>,
    ) -> Result<u64> {
        let affinity = match txn {
            Some(txn) => Affinity::Transactional(self.txns.resolve_active(txn)?.id()),
            None => Affinity::Persistent,
        };
        let generator = self.events.register(templates, kind, affinity, expiry_from_now(lease))?;
        Ok(generator.id())
    }

    /// Extends the lease of registration `id`. `None` never expires.
    pub fn renew(
        &self,
        id: u64,
        lease: Option<Duration>,
    ) -> Result<bool> {
        self.events.renew(id, expiry_from_now(lease))
    }

    pub fn cancel(
        &self,
        id: u64,
    ) -> bool {
        self.events.cancel(id)
    }

    /// Retires every registration whose lease has run out
    pub fn reap_expired(&self) -> usize {
        self.events.reap_expired(get_now_as_u64_ms())
    }

    /// Re-creates the persistent registrations found in the registration
    /// store
    pub fn restore_registrations(
        &self,
        resolver: &dyn ListenerResolver,
    ) -> Result<usize> {
        self.events.restore_registrations(resolver)
    }

    // ---------------------------------------------------------------
    // Accessors

    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn events(&self) -> &Arc<EventQueue> {
        &self.events
    }

    pub fn txns(&self) -> &Arc<TxnManager> {
        &self.txns
    }

    pub fn repository(&self) -> &Arc<dyn EntryRepository> {
        &self.repository
    }

    pub fn entry_log(&self) -> &Arc<dyn EntryLog> {
        &self.log
    }

    fn search_context(&self) -> SearchContext {
        SearchContext {
            locks: self.locks.clone(),
            repository: self.repository.clone(),
            matcher: self.matcher.clone(),
        }
    }

    fn scope(
        &self,
        txn: Option<TxnId>,
    ) -> Result<Scope> {
        match txn {
            Some(txn) => Ok(Scope {
                state: self.txns.resolve_active(txn)?,
                implicit: false,
            }),
            None => Ok(Scope {
                state: self.txns.begin(),
                implicit: true,
            }),
        }
    }

    /// Resolves an implicit transaction: commit if the operation took effect
    fn settle(
        &self,
        scope: &Scope,
        took_effect: bool,
    ) -> Result<()> {
        if !scope.implicit {
            return Ok(());
        }
        let txn = scope.state.id();
        if took_effect {
            self.txns.commit(txn)
        } else {
            self.txns.abort(txn)
        }
    }
}

impl Drop for Space {
    fn drop(&mut self) {
        self.events.stop();
    }
}

