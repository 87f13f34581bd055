// ABOUTME: Reference-counted, lock-guarded wrapper around one underlying channel.
// ABOUTME: Implements the Active -> Closed transition that destroys the channel exactly once.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::error::ChannelError;
use crate::key::CacheKey;
use crate::resource::ChannelResource;
use crate::state::ConnectivityState;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

struct EntryState {
    underlying: Option<Arc<dyn ChannelResource>>,
    ref_count: usize,
    valid: bool,
}

/// The unit of sharing: one underlying channel plus the handles attached to it.
///
/// `underlying` goes from `Some` to `None` at most once, and `valid` flips to
/// `false` in the same critical section. The struct itself lives as long as
/// any handle holds an `Arc` to it.
pub struct SharedChannelEntry {
    id: u64,
    key: CacheKey,
    state: Mutex<EntryState>,
}

/// Result of a state query that may have observed an out-of-band shutdown.
pub(crate) struct StateCheck {
    pub state: ConnectivityState,
    /// Set when this query moved the entry to Closed; the caller destroys it.
    pub retired: Option<Arc<dyn ChannelResource>>,
}

impl SharedChannelEntry {
    /// A fresh Active entry with one attached handle.
    pub(crate) fn new(key: CacheKey, underlying: Arc<dyn ChannelResource>) -> Self {
        Self {
            id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
            key,
            state: Mutex::new(EntryState {
                underlying: Some(underlying),
                ref_count: 1,
                valid: true,
            }),
        }
    }

    /// Process-unique id, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn ref_count(&self) -> usize {
        self.lock().ref_count
    }

    /// True while the entry is Active.
    pub fn is_valid(&self) -> bool {
        self.lock().valid
    }

    // No critical section leaves EntryState half-updated.
    fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach one more handle. Fails once the entry is Closed.
    pub(crate) fn try_attach(&self) -> bool {
        let mut state = self.lock();
        if !state.valid {
            return false;
        }
        state.ref_count += 1;
        tracing::debug!(
            entry = self.id,
            key = %self.key,
            ref_count = state.ref_count,
            "attached to shared channel"
        );
        true
    }

    /// Detach one handle. When the last handle of an Active entry leaves,
    /// the entry becomes Closed and the resource is handed back for
    /// destruction outside the lock.
    pub(crate) fn release(&self) -> Option<Arc<dyn ChannelResource>> {
        let mut state = self.lock();
        state.ref_count = state.ref_count.saturating_sub(1);
        tracing::debug!(
            entry = self.id,
            key = %self.key,
            ref_count = state.ref_count,
            "released shared channel"
        );
        if state.ref_count == 0 && state.valid {
            state.valid = false;
            return state.underlying.take();
        }
        None
    }

    /// Move to Closed regardless of attached handles.
    pub(crate) fn retire(&self) -> Option<Arc<dyn ChannelResource>> {
        let mut state = self.lock();
        if !state.valid {
            return None;
        }
        state.valid = false;
        state.underlying.take()
    }

    /// Run `f` against the underlying channel while holding the entry lock.
    pub(crate) fn with_resource<T>(
        &self,
        f: impl FnOnce(&dyn ChannelResource) -> T,
    ) -> Result<T, ChannelError> {
        let state = self.lock();
        match state.underlying.as_deref() {
            Some(resource) => Ok(f(resource)),
            None => Err(ChannelError::AlreadyClosed),
        }
    }

    /// A reference to the underlying channel, captured under the lock.
    pub(crate) fn resource(&self) -> Result<Arc<dyn ChannelResource>, ChannelError> {
        self.lock()
            .underlying
            .clone()
            .ok_or(ChannelError::AlreadyClosed)
    }

    /// Query the channel state. A SHUTDOWN answer means the channel died
    /// out-of-band: the entry is closed here so later calls fail fast.
    pub(crate) fn check_state(&self, try_to_connect: bool) -> Result<StateCheck, ChannelError> {
        let mut state = self.lock();
        let current = match state.underlying.as_deref() {
            Some(resource) => resource.check_state(try_to_connect),
            None => return Err(ChannelError::AlreadyClosed),
        };
        let retired = if current == ConnectivityState::Shutdown {
            state.valid = false;
            state.underlying.take()
        } else {
            None
        };
        Ok(StateCheck {
            state: current,
            retired,
        })
    }

    /// Watch for a state change while holding the entry lock. Every other
    /// operation on this entry waits until the watch returns.
    pub(crate) fn watch_locked(
        &self,
        last: ConnectivityState,
        deadline: Instant,
    ) -> Result<bool, ChannelError> {
        self.with_resource(|resource| resource.watch_state(last, deadline))
    }
}

impl fmt::Debug for SharedChannelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SharedChannelEntry")
            .field("id", &self.id)
            .field("key", &self.key.as_str())
            .field("ref_count", &state.ref_count)
            .field("valid", &state.valid)
            .finish()
    }
}
