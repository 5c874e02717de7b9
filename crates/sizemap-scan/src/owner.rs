//! Owner name resolution with a per-provider uid cache.

use std::fs::Metadata;

use dashmap::DashMap;

/// Caches uid → user name lookups. Each uid is resolved once.
#[derive(Debug, Default)]
pub struct OwnerCache {
    names: DashMap<u32, Option<String>>,
}

impl OwnerCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the owner of an entry, if the platform exposes one.
    #[cfg(unix)]
    pub fn resolve(&self, metadata: &Metadata) -> Option<String> {
        use std::os::unix::fs::MetadataExt;

        let uid = metadata.uid();
        if let Some(cached) = self.names.get(&uid) {
            return cached.value().clone();
        }
        let name =
            uzers::get_user_by_uid(uid).map(|user| user.name().to_string_lossy().into_owned());
        self.names.insert(uid, name.clone());
        name
    }

    #[cfg(not(unix))]
    pub fn resolve(&self, _metadata: &Metadata) -> Option<String> {
        None
    }
}
