use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam_channel::bounded;
use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::SendTimeoutError;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::Affinity;
use super::DispatchBarrier;
use super::EventGenerator;
use super::GeneratorKind;
use super::ListenerResolver;
use super::LiveTarget;
use super::Persistence;
use super::QueueEvent;
use super::TaintReason;
use crate::constants::DISPATCH_WORKER_THREAD_PREFIX;
use crate::constants::REAPER_THREAD_NAME;
use crate::metrics::EVENTS_DISPATCHED;
use crate::metrics::EVENTS_POSTED;
use crate::search::deadline_after;
use crate::search::Monitor;
use crate::time::get_now_as_u64_ms;
use crate::time::is_expired;
use crate::time::FOREVER_MS;
use crate::DispatchError;
use crate::DispatcherConfig;
use crate::Matcher;
use crate::RegistrationConfig;
use crate::RegistrationStore;
use crate::Result;
use crate::StorageError;
use crate::Template;
use crate::TxnId;

const SEND_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct Job {
    event: QueueEvent,
    barrier: Option<Arc<DispatchBarrier>>,
}

/// Generators keyed by id. Iterating in id order gives older interest
/// first refusal of a new entry.
type Registry = BTreeMap<u64, Arc<EventGenerator>>;

struct QueueInner {
    generators: ArcSwap<Registry>,
    next_id: AtomicU64,
    matcher: Arc<dyn Matcher>,
    store: Arc<dyn RegistrationStore>,
    dispatcher: DispatcherConfig,
    registration: RegistrationConfig,
    started: AtomicBool,
    stopped: AtomicBool,
    /// Jobs posted and not yet dispatched or abandoned
    in_flight: Monitor<usize>,
}

impl QueueInner {
    fn insert(
        &self,
        generator: Arc<EventGenerator>,
    ) {
        let id = generator.id();
        self.generators.rcu(|current| {
            let mut next = Registry::clone(current);
            next.insert(id, generator.clone());
            next
        });
        // Tainted before it was visible to the reaper
        if generator.is_tainted() {
            self.remove(id);
        }
    }

    fn remove(
        &self,
        id: u64,
    ) {
        let mut removed = None;
        self.generators.rcu(|current| {
            let mut next = Registry::clone(current);
            removed = next.remove(&id);
            next
        });

        if let Some(generator) = removed {
            if generator.is_persistent() {
                if let Err(e) = self.store.remove(id) {
                    warn!(generator_id = id, "failed to drop persisted registration: {:?}", e);
                }
            }
            trace!(generator_id = id, "generator reaped");
        }
    }

    fn dispatch(
        &self,
        job: Job,
    ) {
        let Job { event, barrier } = job;
        let now = get_now_as_u64_ms();
        let generators = self.generators.load_full();

        for generator in generators.values() {
            if !generator.can_see(&event, now) {
                continue;
            }
            let Some(entry) = event.entry() else {
                continue;
            };
            if !generator.matches(entry, self.matcher.as_ref()) {
                continue;
            }

            if let Some(barrier) = &barrier {
                barrier.begin();
            }
            generator.ping(&event);
            if let Some(barrier) = &barrier {
                barrier.end();
            }
        }

        if let Some(barrier) = &barrier {
            barrier.enable_resolve();
        }
        EVENTS_DISPATCHED.with_label_values(&[event.kind().as_str()]).inc();
    }

    fn is_shut_down(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn job_done(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.in_flight.notify_all();
        }
    }
}

/// Central pub/sub bus of the engine.
///
/// Events are fanned out by a pool of `worker_threads` OS threads reading a
/// bounded job channel. There is no ordering guarantee across events; a
/// synchronous [`add`](Self::add) returns only after every generator that
/// accepted the event has been pinged.
pub struct EventQueue {
    inner: Arc<QueueInner>,
    job_tx: Sender<Job>,
    job_rx: Receiver<Job>,
    reaper_tx: Sender<u64>,
    reaper_rx: Receiver<u64>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
}

impl std::fmt::Debug for EventQueue {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("generators", &self.inner.generators.load().len())
            .field("pending_jobs", &self.job_rx.len())
            .field("dispatcher", &self.inner.dispatcher)
            .finish_non_exhaustive()
    }
}

impl EventQueue {
    pub fn new(
        dispatcher: DispatcherConfig,
        registration: RegistrationConfig,
        matcher: Arc<dyn Matcher>,
        store: Arc<dyn RegistrationStore>,
    ) -> Self {
        let (job_tx, job_rx) = bounded(dispatcher.queue_capacity);
        let (reaper_tx, reaper_rx) = unbounded();

        let inner = Arc::new(QueueInner {
            generators: ArcSwap::from_pointee(Registry::new()),
            next_id: AtomicU64::new(1),
            matcher,
            store,
            dispatcher,
            registration,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            in_flight: Monitor::new(0),
        });

        Self {
            inner,
            job_tx,
            job_rx,
            reaper_tx,
            reaper_rx,
            threads: Mutex::new(Vec::new()),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Spawns the dispatch workers and the reaper. Idempotent.
    pub fn start(&self) -> Result<()> {
        let mut threads = self.threads.lock();
        if !threads.is_empty() || self.inner.is_shut_down() {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        for i in 0..self.inner.dispatcher.worker_threads {
            let inner = self.inner.clone();
            let jobs = self.job_rx.clone();
            let shutdown = shutdown_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{DISPATCH_WORKER_THREAD_PREFIX}{i}"))
                .spawn(move || {
                    debug!(worker = i, "dispatch worker started");
                    loop {
                        crossbeam_channel::select! {
                            recv(jobs) -> job => match job {
                                Ok(job) => {
                                    inner.dispatch(job);
                                    inner.job_done();
                                }
                                Err(_) => {
                                    warn!(worker = i, "job channel closed unexpectedly");
                                    break;
                                }
                            },
                            recv(shutdown) -> _ => {
                                debug!(worker = i, "dispatch worker received shutdown signal");
                                break;
                            }
                        }
                    }
                    debug!(worker = i, "dispatch worker stopped");
                })
                .map_err(StorageError::IoError)?;
            threads.push(handle);
        }

        let inner = self.inner.clone();
        let reaped = self.reaper_rx.clone();
        let handle = std::thread::Builder::new()
            .name(REAPER_THREAD_NAME.to_string())
            .spawn(move || {
                loop {
                    crossbeam_channel::select! {
                        recv(reaped) -> id => match id {
                            Ok(id) => inner.remove(id),
                            Err(_) => break,
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!("reaper stopped");
            })
            .map_err(StorageError::IoError)?;
        threads.push(handle);

        *self.shutdown_tx.lock() = Some(shutdown_tx);
        self.inner.started.store(true, Ordering::Release);
        debug!(workers = self.inner.dispatcher.worker_threads, "event queue started");
        Ok(())
    }

    /// Stops all threads. Events still queued are abandoned and their
    /// synchronous posters released with [`DispatchError::ShutDown`].
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the sender disconnects every worker's shutdown receiver
        drop(self.shutdown_tx.lock().take());
        for handle in self.threads.lock().drain(..) {
            if handle.join().is_err() {
                error!("event queue thread panicked");
            }
        }

        let mut abandoned = 0;
        while let Ok(job) = self.job_rx.try_recv() {
            if let Some(barrier) = job.barrier {
                barrier.abandon();
            }
            self.inner.job_done();
            abandoned += 1;
        }
        while let Ok(id) = self.reaper_rx.try_recv() {
            self.inner.remove(id);
        }
        if let Err(e) = self.inner.store.flush() {
            warn!("registration store flush failed on stop: {:?}", e);
        }
        debug!(abandoned, "event queue stopped");
    }

    /// Events posted but not yet dispatched
    pub fn pending(&self) -> usize {
        *self.inner.in_flight.lock()
    }

    /// Blocks until every posted event was dispatched or `timeout` passes.
    /// Returns whether the queue drained.
    pub fn wait_drained(
        &self,
        timeout: Duration,
    ) -> bool {
        let in_flight = self.inner.in_flight.wait_until(deadline_after(timeout), |n| *n == 0);
        *in_flight == 0
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::Acquire) && !self.inner.is_shut_down()
    }

    /// Posts `event`. With `wait` set, blocks until every generator that
    /// accepted the event has been pinged.
    pub fn add(
        &self,
        event: QueueEvent,
        wait: bool,
    ) -> Result<()> {
        if self.inner.is_shut_down() {
            return Err(DispatchError::ShutDown.into());
        }
        if !self.inner.started.load(Ordering::Acquire) {
            return Err(DispatchError::NotStarted.into());
        }

        EVENTS_POSTED.with_label_values(&[event.kind().as_str()]).inc();
        trace!(kind = event.kind().as_str(), txn = ?event.txn(), wait, "event posted");

        let barrier = wait.then(|| Arc::new(DispatchBarrier::new()));
        let mut job = Job {
            event,
            barrier: barrier.clone(),
        };
        *self.inner.in_flight.lock() += 1;
        loop {
            match self.job_tx.send_timeout(job, SEND_POLL_INTERVAL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if self.inner.is_shut_down() {
                        self.inner.job_done();
                        return Err(DispatchError::ShutDown.into());
                    }
                    job = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    self.inner.job_done();
                    return Err(DispatchError::ShutDown.into());
                }
            }
        }

        if let Some(barrier) = barrier {
            barrier.wait(|| self.inner.is_shut_down())?;
        }
        Ok(())
    }

    /// Registers a remote notify or visibility subscription. Persistent
    /// registrations are written to the registration store before they
    /// become live.
    pub fn register(
        &self,
        templates: Vec<Template>,
        kind: GeneratorKind,
        affinity: Affinity,
        expiry: u64,
    ) -> Result<Arc<EventGenerator>> {
        let id = self.inner.next_id.fetch_add(1, Ordering::AcqRel);
        let mut generator = EventGenerator::new(
            id,
            self.inner.registration.source_id,
            templates,
            kind,
            affinity,
            expiry,
            self.reaper_tx.clone(),
        );

        if affinity == Affinity::Persistent {
            if let Some(memento) = generator.memento() {
                self.inner.store.save(&memento)?;
                generator = generator.with_persistence(Persistence {
                    store: self.inner.store.clone(),
                    save_interval: self.inner.registration.save_interval,
                });
            }
        }

        let generator = Arc::new(generator);
        self.inner.insert(generator.clone());
        debug!(generator_id = id, ?affinity, "generator registered");
        Ok(generator)
    }

    /// Registers the live-write interest of a search or view running under
    /// `txn`
    pub fn register_search(
        &self,
        templates: Vec<Template>,
        txn: TxnId,
        target: Weak<dyn LiveTarget>,
    ) -> Arc<EventGenerator> {
        let id = self.inner.next_id.fetch_add(1, Ordering::AcqRel);
        let generator = Arc::new(EventGenerator::new(
            id,
            self.inner.registration.source_id,
            templates,
            GeneratorKind::Search { target },
            Affinity::Transactional(txn),
            FOREVER_MS,
            self.reaper_tx.clone(),
        ));
        self.inner.insert(generator.clone());
        trace!(generator_id = id, ?txn, "search interest registered");
        generator
    }

    /// Re-creates persistent registrations from the registration store.
    /// Registrations whose lease already ran out, or whose listener cannot
    /// be resolved, are dropped from the store.
    pub fn restore_registrations(
        &self,
        resolver: &dyn ListenerResolver,
    ) -> Result<usize> {
        let now = get_now_as_u64_ms();
        let mut restored = 0;

        for memento in self.inner.store.load_all()? {
            let id = memento.id;
            self.inner.next_id.fetch_max(id + 1, Ordering::AcqRel);

            if is_expired(memento.expiry, now) {
                debug!(generator_id = id, "persisted registration expired, dropping");
                self.inner.store.remove(id)?;
                continue;
            }
            let Some(listener) = resolver.resolve(&memento.listener) else {
                warn!(generator_id = id, listener = %memento.listener, "listener unresolvable, dropping registration");
                self.inner.store.remove(id)?;
                continue;
            };

            let generator = EventGenerator::restore(
                memento,
                listener,
                self.reaper_tx.clone(),
                Persistence {
                    store: self.inner.store.clone(),
                    save_interval: self.inner.registration.save_interval,
                },
                self.inner.registration.restart_jump,
            )?;
            self.inner.insert(Arc::new(generator));
            restored += 1;
        }

        debug!(restored, "persistent registrations restored");
        Ok(restored)
    }

    pub fn generator(
        &self,
        id: u64,
    ) -> Option<Arc<EventGenerator>> {
        self.inner.generators.load().get(&id).cloned()
    }

    /// Taints registration `id`. Returns false if it is unknown or already
    /// tainted.
    pub fn cancel(
        &self,
        id: u64,
    ) -> bool {
        self.generator(id)
            .map(|g| g.taint(TaintReason::Cancelled))
            .unwrap_or(false)
    }

    /// Extends the lease of registration `id`
    pub fn renew(
        &self,
        id: u64,
        expiry: u64,
    ) -> Result<bool> {
        match self.generator(id) {
            Some(generator) => generator.renew(expiry),
            None => Ok(false),
        }
    }

    /// Taints every generator whose lease elapsed by `now`
    pub fn reap_expired(
        &self,
        now: u64,
    ) -> usize {
        self.inner
            .generators
            .load()
            .values()
            .filter(|g| !g.is_tainted() && is_expired(g.expiry(), now))
            .filter(|g| g.taint(TaintReason::LeaseExpired))
            .count()
    }

    /// Untainted generators in the registry
    pub fn live_count(&self) -> usize {
        self.inner.generators.load().values().filter(|g| !g.is_tainted()).count()
    }

    /// Generators still in the registry, tainted or not
    pub fn registered_count(&self) -> usize {
        self.inner.generators.load().len()
    }

    pub fn matcher(&self) -> &Arc<dyn Matcher> {
        &self.inner.matcher
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
