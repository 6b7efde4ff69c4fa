use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::MementoKind;
use super::QueueEvent;
use super::QueueEventKind;
use super::RegistrationMemento;
use super::RemoteEvent;
use super::RemoteListener;
use crate::metrics::DELIVERY_FAILURES;
use crate::metrics::GENERATORS_TAINTED;
use crate::time::is_expired;
use crate::EntryHandle;
use crate::Matcher;
use crate::RegistrationStore;
use crate::Result;
use crate::Template;
use crate::TxnId;

/// Receiver of live entries on behalf of an in-flight search or view
pub trait LiveTarget: Send + Sync {
    /// Offers an entry that showed up after the storage scan began
    fn offer_live(
        &self,
        entry: &EntryHandle,
    );

    /// The transaction the interest belongs to ended
    fn resolved(
        &self,
        txn: TxnId,
    );
}

pub enum GeneratorKind {
    /// Remote notification on every matching committed write
    Notify {
        listener: Arc<dyn RemoteListener>,
        handback: Vec<u8>,
    },
    /// Remote notification when a matching entry becomes visible, and unless
    /// `visible_only` also when it stops being conflicted
    Visibility {
        listener: Arc<dyn RemoteListener>,
        handback: Vec<u8>,
        visible_only: bool,
    },
    /// Interest of a local search task or view
    Search { target: Weak<dyn LiveTarget> },
}

impl std::fmt::Debug for GeneratorKind {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            GeneratorKind::Notify { listener, .. } => f.debug_struct("Notify").field("listener", &listener.address()).finish(),
            GeneratorKind::Visibility {
                listener, visible_only, ..
            } => f
                .debug_struct("Visibility")
                .field("listener", &listener.address())
                .field("visible_only", visible_only)
                .finish(),
            GeneratorKind::Search { .. } => f.write_str("Search"),
        }
    }
}

/// Which transaction a generator belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// Outlives transactions; may be persisted
    Persistent,
    /// Dies with the transaction
    Transactional(TxnId),
}

impl Affinity {
    pub fn owned_by(
        &self,
        txn: TxnId,
    ) -> bool {
        matches!(self, Affinity::Transactional(t) if *t == txn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaintReason {
    Cancelled,
    LeaseExpired,
    TxnEnded,
    DeliveryFailed,
    SearchDone,
}

impl TaintReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaintReason::Cancelled => "cancelled",
            TaintReason::LeaseExpired => "lease_expired",
            TaintReason::TxnEnded => "txn_ended",
            TaintReason::DeliveryFailed => "delivery_failed",
            TaintReason::SearchDone => "search_done",
        }
    }
}

pub(crate) struct Persistence {
    pub(crate) store: Arc<dyn RegistrationStore>,
    pub(crate) save_interval: u64,
}

/// One notification subscription or transient search interest.
///
/// `ACTIVE -> TAINTED` is the only transition. Once tainted, `can_see`,
/// `matches` and `ping` are inert and the reaper has been asked to drop the
/// generator from the registry.
pub struct EventGenerator {
    id: u64,
    source_id: u64,
    templates: Vec<Template>,
    kind: GeneratorKind,
    affinity: Affinity,
    expiry: AtomicU64,
    seq: AtomicU64,
    saved_seq: AtomicU64,
    checkpointing: Mutex<()>,
    tainted: AtomicBool,
    reaper: Sender<u64>,
    persistence: Option<Persistence>,
}

impl std::fmt::Debug for EventGenerator {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EventGenerator")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("affinity", &self.affinity)
            .field("seq", &self.seq)
            .field("tainted", &self.tainted)
            .finish_non_exhaustive()
    }
}

impl EventGenerator {
    pub fn new(
        id: u64,
        source_id: u64,
        templates: Vec<Template>,
        kind: GeneratorKind,
        affinity: Affinity,
        expiry: u64,
        reaper: Sender<u64>,
    ) -> Self {
        Self {
            id,
            source_id,
            templates,
            kind,
            affinity,
            expiry: AtomicU64::new(expiry),
            seq: AtomicU64::new(0),
            saved_seq: AtomicU64::new(0),
            checkpointing: Mutex::new(()),
            tainted: AtomicBool::new(false),
            reaper,
            persistence: None,
        }
    }

    pub(crate) fn with_persistence(
        mut self,
        persistence: Persistence,
    ) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Rebuilds a persistent registration. The sequence number is padded by
    /// `restart_jump` past the last checkpoint so no number handed out before
    /// the crash is ever reused.
    pub(crate) fn restore(
        memento: RegistrationMemento,
        listener: Arc<dyn RemoteListener>,
        reaper: Sender<u64>,
        persistence: Persistence,
        restart_jump: u64,
    ) -> Result<Self> {
        let kind = match memento.kind {
            MementoKind::Notify => GeneratorKind::Notify {
                listener,
                handback: memento.handback,
            },
            MementoKind::Visibility { visible_only } => GeneratorKind::Visibility {
                listener,
                handback: memento.handback,
                visible_only,
            },
        };
        let seq = memento.seq.saturating_add(restart_jump);
        persistence.store.save_sequence(memento.id, seq)?;

        let generator = Self::new(
            memento.id,
            memento.source_id,
            memento.templates,
            kind,
            Affinity::Persistent,
            memento.expiry,
            reaper,
        )
        .with_persistence(persistence);
        generator.seq.store(seq, Ordering::Release);
        generator.saved_seq.store(seq, Ordering::Release);
        debug!(generator_id = generator.id, seq, "registration restored");
        Ok(generator)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    pub fn kind(&self) -> &GeneratorKind {
        &self.kind
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn expiry(&self) -> u64 {
        self.expiry.load(Ordering::Acquire)
    }

    /// Last sequence number handed out
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted.load(Ordering::Acquire)
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    /// Visibility filter. Also where lease expiry and transaction end are
    /// noticed: both taint the generator and hide the event.
    pub fn can_see(
        &self,
        event: &QueueEvent,
        now: u64,
    ) -> bool {
        if self.is_tainted() {
            return false;
        }
        if is_expired(self.expiry(), now) {
            self.taint(TaintReason::LeaseExpired);
            return false;
        }

        if event.kind() == QueueEventKind::TransactionEnded {
            if self.affinity.owned_by(event.txn()) {
                if let GeneratorKind::Search { target } = &self.kind {
                    if let Some(target) = target.upgrade() {
                        target.resolved(event.txn());
                    }
                }
                self.taint(TaintReason::TxnEnded);
            }
            return false;
        }

        kind_sees(&self.kind, self.affinity, event)
    }

    pub fn matches(
        &self,
        entry: &EntryHandle,
        matcher: &dyn Matcher,
    ) -> bool {
        !self.is_tainted() && self.templates.iter().any(|t| matcher.matches(t, entry.entry()))
    }

    /// Dispatches `event` to the generator's target
    pub fn ping(
        &self,
        event: &QueueEvent,
    ) {
        if self.is_tainted() {
            return;
        }
        let Some(entry) = event.entry() else {
            return;
        };

        match &self.kind {
            GeneratorKind::Search { target } => match target.upgrade() {
                Some(target) => {
                    trace!(generator_id = self.id, oid = ?entry.oid(), "ping search target");
                    target.offer_live(entry);
                }
                None => {
                    self.taint(TaintReason::SearchDone);
                }
            },
            GeneratorKind::Notify { listener, handback } | GeneratorKind::Visibility { listener, handback, .. } => {
                self.deliver(listener.as_ref(), handback, event, entry)
            }
        }
    }

    fn deliver(
        &self,
        listener: &dyn RemoteListener,
        handback: &[u8],
        event: &QueueEvent,
        entry: &EntryHandle,
    ) {
        let seq_num = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        let remote = RemoteEvent {
            source_id: self.source_id,
            registration_id: self.id,
            seq_num,
            handback: handback.to_vec(),
            kind: event.kind(),
            entry: entry.entry().clone(),
        };

        match listener.notify(&remote) {
            Ok(()) => {
                trace!(generator_id = self.id, seq_num, kind = event.kind().as_str(), "remote event delivered");
                self.checkpoint(seq_num);
            }
            Err(e) => {
                warn!(
                    generator_id = self.id,
                    listener = %listener.address(),
                    "delivery failed, tainting registration: {:?}",
                    e
                );
                DELIVERY_FAILURES.inc();
                self.taint(TaintReason::DeliveryFailed);
            }
        }
    }

    fn checkpoint(
        &self,
        seq: u64,
    ) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let due = |saved: u64| seq >= saved.saturating_add(persistence.save_interval);
        if !due(self.saved_seq.load(Ordering::Acquire)) {
            return;
        }

        // saved_seq only advances once the store holds the checkpoint
        let _guard = self.checkpointing.lock();
        if !due(self.saved_seq.load(Ordering::Acquire)) {
            return;
        }
        match persistence.store.save_sequence(self.id, seq) {
            Ok(()) => {
                self.saved_seq.fetch_max(seq, Ordering::AcqRel);
            }
            Err(e) => warn!(generator_id = self.id, seq, "sequence checkpoint failed: {:?}", e),
        }
    }

    /// One-way deactivation. Only the call that flips the flag schedules
    /// cleanup and returns true.
    pub fn taint(
        &self,
        reason: TaintReason,
    ) -> bool {
        if self
            .tainted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        GENERATORS_TAINTED.with_label_values(&[reason.as_str()]).inc();
        debug!(generator_id = self.id, reason = reason.as_str(), "generator tainted");
        if self.reaper.send(self.id).is_err() {
            trace!(generator_id = self.id, "reaper gone, cleanup skipped");
        }
        true
    }

    /// Extends the lease. Returns false if the generator is already tainted.
    pub fn renew(
        &self,
        expiry: u64,
    ) -> Result<bool> {
        if self.is_tainted() {
            return Ok(false);
        }
        self.expiry.store(expiry, Ordering::Release);
        if let (Some(persistence), Some(memento)) = (&self.persistence, self.memento()) {
            persistence.store.save(&memento)?;
            // Cancelled while saving: the reaper may already have dropped the record
            if self.is_tainted() {
                persistence.store.remove(self.id)?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Durable form of a remote registration; `None` for search interest
    pub fn memento(&self) -> Option<RegistrationMemento> {
        let (kind, listener, handback) = match &self.kind {
            GeneratorKind::Notify { listener, handback } => (MementoKind::Notify, listener, handback),
            GeneratorKind::Visibility {
                listener,
                handback,
                visible_only,
            } => (
                MementoKind::Visibility {
                    visible_only: *visible_only,
                },
                listener,
                handback,
            ),
            GeneratorKind::Search { .. } => return None,
        };
        Some(RegistrationMemento {
            id: self.id,
            source_id: self.source_id,
            templates: self.templates.clone(),
            kind,
            listener: listener.address(),
            handback: handback.clone(),
            expiry: self.expiry(),
            seq: self.seq(),
        })
    }
}

/// Event-kind and affinity filter shared by all generator variants.
///
/// A generator sees uncommitted writes only from its own transaction, and
/// committed or visibility events only from other transactions (its own
/// writes already reached it as `EntryWrite`).
pub(crate) fn kind_sees(
    kind: &GeneratorKind,
    affinity: Affinity,
    event: &QueueEvent,
) -> bool {
    let own = affinity.owned_by(event.txn());
    match event.kind() {
        QueueEventKind::TransactionEnded => false,
        QueueEventKind::EntryWrite => own,
        QueueEventKind::EntryWritten => {
            !own && matches!(kind, GeneratorKind::Notify { .. } | GeneratorKind::Search { .. })
        }
        QueueEventKind::EntryVisible => !own && matches!(kind, GeneratorKind::Visibility { .. }),
        QueueEventKind::EntryNotConflicted => matches!(
            kind,
            GeneratorKind::Visibility {
                visible_only: false,
                ..
            }
        ),
    }
}
