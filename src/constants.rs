// -
// Database namespaces

/// Sled tree holding persistent registration mementos
pub(crate) const REGISTRATION_TREE: &str = "_registration_tree";

// -
// Thread names

pub(crate) const DISPATCH_WORKER_THREAD_PREFIX: &str = "tspace-dispatch-";
pub(crate) const REAPER_THREAD_NAME: &str = "tspace-reaper";
