//! Assembles a [`Space`] from a [`SpaceConfig`].
//!
//! Every collaborator has a default: a [`FieldMatcher`], an in-memory
//! repository and entry log, and the registration store named by
//! `registration.store`. Any of them can be replaced before
//! [`build`](SpaceBuilder::build).
//!
//! ## Example
//! ```ignore
//! let space = SpaceBuilder::new(Some("config/space.toml"))?
//!     .matcher(Arc::new(my_matcher))
//!     .build()?;
//! space.start()?;
//! ```

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tracing::debug;
use tracing::info;

use super::Space;
use crate::EntryLog;
use crate::EntryRepository;
use crate::EventQueue;
use crate::FieldMatcher;
use crate::LockManager;
use crate::Matcher;
use crate::MemEntryLog;
use crate::MemRegistrationStore;
use crate::MemRepository;
use crate::RegistrationStore;
use crate::RegistrationStoreKind;
use crate::Result;
use crate::SledRegistrationStore;
use crate::SpaceConfig;
use crate::TxnManager;

pub struct SpaceBuilder {
    pub(super) config: SpaceConfig,
    pub(super) matcher: Option<Arc<dyn Matcher>>,
    pub(super) repository: Option<Arc<dyn EntryRepository>>,
    pub(super) log: Option<Arc<dyn EntryLog>>,
    pub(super) registration_store: Option<Arc<dyn RegistrationStore>>,
}

impl SpaceBuilder {
    /// Loads the configuration from its hierarchical sources, then applies
    /// `config_path` on top if given
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let mut config = SpaceConfig::new()?;
        if let Some(p) = config_path {
            info!("with_override_config from: {}", &p);
            config = config.with_override_config(p)?;
        }
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: SpaceConfig) -> Self {
        Self {
            config,
            matcher: None,
            repository: None,
            log: None,
            registration_store: None,
        }
    }

    /// Sets the template matcher. A custom repository must use the same
    /// matcher for its scans.
    pub fn matcher(
        mut self,
        matcher: Arc<dyn Matcher>,
    ) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn repository(
        mut self,
        repository: Arc<dyn EntryRepository>,
    ) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn entry_log(
        mut self,
        log: Arc<dyn EntryLog>,
    ) -> Self {
        self.log = Some(log);
        self
    }

    /// Overrides the store selected by `registration.store`
    pub fn registration_store(
        mut self,
        store: Arc<dyn RegistrationStore>,
    ) -> Self {
        self.registration_store = Some(store);
        self
    }

    /// Validates the configuration and wires the components. The space is
    /// returned stopped.
    pub fn build(self) -> Result<Space> {
        let config = self.config.validate()?;

        let matcher = self.matcher.unwrap_or_else(|| Arc::new(FieldMatcher::new()));
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(MemRepository::new(matcher.clone())));
        let log = self.log.unwrap_or_else(|| Arc::new(MemEntryLog::new()));
        let store = match self.registration_store {
            Some(store) => store,
            None => open_registration_store(&config.registration.store)?,
        };

        let locks = Arc::new(LockManager::new());
        let events = Arc::new(EventQueue::new(
            config.dispatcher.clone(),
            config.registration.clone(),
            matcher.clone(),
            store,
        ));
        let txns = Arc::new(TxnManager::new(
            locks.clone(),
            events.clone(),
            repository.clone(),
            log.clone(),
        ));

        debug!(?config, "space assembled");
        Ok(Space {
            config,
            matcher,
            repository,
            log,
            locks,
            events,
            txns,
            next_oid: AtomicU64::new(1),
        })
    }
}

fn open_registration_store(kind: &RegistrationStoreKind) -> Result<Arc<dyn RegistrationStore>> {
    match kind {
        RegistrationStoreKind::Memory => Ok(Arc::new(MemRegistrationStore::new())),
        RegistrationStoreKind::Sled { path } => Ok(Arc::new(SledRegistrationStore::open(path)?)),
    }
}
