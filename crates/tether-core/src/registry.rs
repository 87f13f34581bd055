// ABOUTME: Process-wide map from cache key to shared channel entry.
// ABOUTME: Deduplicates identical channel requests; injectable for tests, global for processes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::args::ChannelArgs;
use crate::config::RegistryConfig;
use crate::digest::ArgsDigest;
use crate::entry::SharedChannelEntry;
use crate::error::ChannelError;
use crate::handle::ChannelHandle;
use crate::key::{CacheKey, KeyBuilder};
use crate::resource::{ChannelConnector, ChannelResource};

static GLOBAL: OnceLock<ChannelRegistry> = OnceLock::new();

/// How `lookup_or_insert` satisfied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Attached to a live entry already in the map.
    Attached,
    /// No entry under the key; a new one was inserted.
    Created,
    /// The mapped entry was closed but not yet unlinked; replaced.
    ReplacedClosed,
    /// The mapped entry had the same rendered key but a different identity;
    /// replaced, leaving the old entry to its current handles.
    ReplacedCollision,
}

struct RegistryInner {
    entries: Mutex<HashMap<String, Arc<SharedChannelEntry>>>,
    connector: Arc<dyn ChannelConnector>,
    keys: KeyBuilder,
    config: RegistryConfig,
}

/// Registry of shared channels.
///
/// Cloning is cheap and yields the same registry. Lock rules: the registry
/// lock is never held across a possibly-blocking wait, so no entry lock is
/// taken under it, and it is never taken while an entry lock is held.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<RegistryInner>,
}

impl ChannelRegistry {
    pub fn new(connector: impl ChannelConnector + 'static) -> Self {
        Self::with_config(connector, RegistryConfig::default())
    }

    pub fn with_config(connector: impl ChannelConnector + 'static, config: RegistryConfig) -> Self {
        Self::with_parts(Arc::new(connector), KeyBuilder::default(), config)
    }

    /// Registry using a custom argument digest.
    pub fn with_digest(
        connector: impl ChannelConnector + 'static,
        digest: Arc<dyn ArgsDigest>,
        config: RegistryConfig,
    ) -> Self {
        Self::with_parts(Arc::new(connector), KeyBuilder::new(digest), config)
    }

    fn with_parts(
        connector: Arc<dyn ChannelConnector>,
        keys: KeyBuilder,
        config: RegistryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(HashMap::new()),
                connector,
                keys,
                config,
            }),
        }
    }

    /// Install the process-wide registry. Succeeds once per process.
    pub fn init_global(registry: ChannelRegistry) -> Result<&'static ChannelRegistry, ChannelError> {
        GLOBAL
            .set(registry)
            .map_err(|_| ChannelError::Internal("global channel registry already initialized".into()))?;
        Self::global()
    }

    /// The process-wide registry installed by [`ChannelRegistry::init_global`].
    pub fn global() -> Result<&'static ChannelRegistry, ChannelError> {
        GLOBAL
            .get()
            .ok_or_else(|| ChannelError::Internal("global channel registry not initialized".into()))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub(crate) fn keys(&self) -> &KeyBuilder {
        &self.inner.keys
    }

    pub(crate) fn connector(&self) -> &dyn ChannelConnector {
        self.inner.connector.as_ref()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Arc<SharedChannelEntry>>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Construct a handle to `target` through this registry.
    pub fn construct(&self, target: &str, args: ChannelArgs) -> Result<ChannelHandle, ChannelError> {
        ChannelHandle::construct_in(self, target, args)
    }

    /// Return the live entry for `key`, attaching to it, or build one with
    /// `factory` and insert it. The factory only runs on a miss and runs
    /// under the registry lock, so it must not block.
    pub fn lookup_or_insert<F>(
        &self,
        key: &CacheKey,
        factory: F,
    ) -> Result<(Arc<SharedChannelEntry>, Lookup), ChannelError>
    where
        F: FnOnce() -> Result<Arc<dyn ChannelResource>, ChannelError>,
    {
        let mut stale: Option<Arc<SharedChannelEntry>> = None;
        let (mut entries, outcome) = loop {
            let entries = self.lock_entries();
            let existing = match entries.get(key.as_str()).cloned() {
                None => break (entries, Lookup::Created),
                Some(existing) if !existing.key().same_identity(key) => {
                    // Same rendered key, different components. Digests make
                    // this unlikely; the newer channel takes the slot.
                    tracing::warn!(
                        key = %key,
                        entry = existing.id(),
                        "cache key collision, replacing registry entry"
                    );
                    break (entries, Lookup::ReplacedCollision);
                }
                Some(existing) if stale.as_ref().is_some_and(|s| Arc::ptr_eq(s, &existing)) => {
                    // Its last handle is between release and unlink.
                    break (entries, Lookup::ReplacedClosed);
                }
                Some(existing) => existing,
            };
            drop(entries);

            // Attach outside the registry lock: a serialized watch may hold
            // this entry's lock for its whole wait.
            if existing.try_attach() {
                return Ok((existing, Lookup::Attached));
            }
            stale = Some(existing);
        };

        let resource = factory()?;
        let entry = Arc::new(SharedChannelEntry::new(key.clone(), resource));
        entries.insert(key.as_str().to_string(), entry.clone());
        tracing::debug!(
            key = %key,
            entry = entry.id(),
            outcome = ?outcome,
            "created shared channel"
        );
        Ok((entry, outcome))
    }

    /// Unlink `key` only if it still maps to exactly `entry`.
    pub fn remove(&self, key: &CacheKey, entry: &Arc<SharedChannelEntry>) -> bool {
        let mut entries = self.lock_entries();
        match entries.get(key.as_str()) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                entries.remove(key.as_str());
                tracing::debug!(key = %key, entry = entry.id(), "removed shared channel");
                true
            }
            _ => false,
        }
    }

    /// The entry currently mapped under `key`, live or not.
    pub fn entry(&self, key: &CacheKey) -> Option<Arc<SharedChannelEntry>> {
        self.lock_entries().get(key.as_str()).cloned()
    }

    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.lock_entries().contains_key(key.as_str())
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Close every registered channel and empty the map. Intended for
    /// process exit; handles still attached see `AlreadyClosed` afterwards.
    /// Returns the number of channels destroyed.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<Arc<SharedChannelEntry>> = {
            let mut entries = self.lock_entries();
            entries.drain().map(|(_, entry)| entry).collect()
        };

        // Registry lock is released; entry locks are taken one at a time.
        let mut destroyed = 0;
        for entry in drained {
            if let Some(resource) = entry.retire() {
                resource.destroy();
                destroyed += 1;
            }
        }
        tracing::debug!(destroyed, "channel registry shut down");
        destroyed
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("entries", &self.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryConnector;
    use std::collections::BTreeMap;

    fn registry() -> (ChannelRegistry, Arc<InMemoryConnector>) {
        let connector = Arc::new(InMemoryConnector::new());
        (ChannelRegistry::new(connector.clone()), connector)
    }

    fn factory(
        connector: &Arc<InMemoryConnector>,
    ) -> impl FnOnce() -> Result<Arc<dyn ChannelResource>, ChannelError> + '_ {
        move || connector.create("mem:1", &BTreeMap::new(), None)
    }

    #[test]
    fn test_miss_then_hit() {
        let (registry, connector) = registry();
        let key = CacheKey::new("mem:1", "aa", None);

        let (first, outcome) = registry.lookup_or_insert(&key, factory(&connector)).unwrap();
        assert_eq!(outcome, Lookup::Created);
        assert_eq!(first.ref_count(), 1);

        let (second, outcome) = registry
            .lookup_or_insert(&key, || panic!("factory must not run on a hit"))
            .unwrap();
        assert_eq!(outcome, Lookup::Attached);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.ref_count(), 2);
        assert_eq!(connector.created_count(), 1);
    }

    #[test]
    fn test_factory_error_commits_nothing() {
        let registry = ChannelRegistry::new(InMemoryConnector::new());
        let key = CacheKey::new("mem:1", "aa", None);
        let err = registry
            .lookup_or_insert(&key, || Err(ChannelError::ConnectionFailed("down".into())))
            .unwrap_err();
        assert!(matches!(err, ChannelError::ConnectionFailed(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_only_matching_entry() {
        let (registry, connector) = registry();
        let key = CacheKey::new("mem:1", "aa", None);
        let (entry, _) = registry.lookup_or_insert(&key, factory(&connector)).unwrap();

        let stranger = Arc::new(SharedChannelEntry::new(
            key.clone(),
            connector.create("mem:1", &BTreeMap::new(), None).unwrap(),
        ));
        assert!(!registry.remove(&key, &stranger));
        assert!(registry.contains_key(&key));

        assert!(registry.remove(&key, &entry));
        assert!(!registry.contains_key(&key));
        assert!(!registry.remove(&key, &entry));
    }

    #[test]
    fn test_closed_entry_is_replaced() {
        let (registry, connector) = registry();
        let key = CacheKey::new("mem:1", "aa", None);
        let (stale, _) = registry.lookup_or_insert(&key, factory(&connector)).unwrap();
        // Closed but still mapped, as between release and unlink.
        assert!(stale.release().is_some());

        let (fresh, outcome) = registry.lookup_or_insert(&key, factory(&connector)).unwrap();
        assert_eq!(outcome, Lookup::ReplacedClosed);
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert!(!registry.remove(&key, &stale));
        assert!(Arc::ptr_eq(&registry.entry(&key).unwrap(), &fresh));
    }

    #[test]
    fn test_collision_replaces_and_keeps_old_entry_alive() {
        let (registry, connector) = registry();
        let original = CacheKey::new("ab", "cd", None);
        let colliding = CacheKey::new("a", "bcd", None);
        assert_eq!(original.as_str(), colliding.as_str());

        let (old, _) = registry.lookup_or_insert(&original, factory(&connector)).unwrap();
        let (new, outcome) = registry.lookup_or_insert(&colliding, factory(&connector)).unwrap();

        assert_eq!(outcome, Lookup::ReplacedCollision);
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.is_valid());
        assert_eq!(old.ref_count(), 1);
        assert_eq!(registry.len(), 1);
        assert!(!registry.remove(&original, &old));
    }

    #[test]
    fn test_shutdown_destroys_live_channels() {
        let (registry, connector) = registry();
        let a = CacheKey::new("mem:1", "aa", None);
        let b = CacheKey::new("mem:1", "bb", None);
        let (entry_a, _) = registry.lookup_or_insert(&a, factory(&connector)).unwrap();
        registry.lookup_or_insert(&b, factory(&connector)).unwrap();

        assert_eq!(registry.shutdown(), 2);
        assert!(registry.is_empty());
        assert!(!entry_a.is_valid());
        for channel in connector.channels() {
            assert_eq!(channel.destroy_count(), 1);
        }
        assert_eq!(registry.shutdown(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let (registry, connector) = registry();
        let clone = registry.clone();
        let key = CacheKey::new("mem:1", "aa", None);
        registry.lookup_or_insert(&key, factory(&connector)).unwrap();
        assert!(clone.contains_key(&key));
        assert!(format!("{:?}", clone).contains("entries: 1"));
    }
}
