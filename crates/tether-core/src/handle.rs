// ABOUTME: Caller-facing channel handle, shared through the registry or exclusive.
// ABOUTME: Exposes target, connectivity state, watch, wait-for-ready and idempotent close.

use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::args::ChannelArgs;
use crate::config::WatchMode;
use crate::entry::SharedChannelEntry;
use crate::error::ChannelError;
use crate::key::CacheKey;
use crate::registry::{ChannelRegistry, Lookup};
use crate::state::ConnectivityState;

enum Attachment {
    Shared {
        entry: Arc<SharedChannelEntry>,
        registry: ChannelRegistry,
    },
    Exclusive {
        entry: Arc<SharedChannelEntry>,
    },
    Closed,
}

/// One logical use of a channel.
///
/// Handles built with identical target and arguments share one underlying
/// channel, which is destroyed when the last of them closes. Dropping a
/// handle closes it.
pub struct ChannelHandle {
    attachment: Attachment,
    watch_mode: WatchMode,
}

impl ChannelHandle {
    /// Construct a handle through the process-wide registry.
    pub fn construct(target: &str, args: ChannelArgs) -> Result<Self, ChannelError> {
        Self::construct_in(ChannelRegistry::global()?, target, args)
    }

    /// Construct a handle through `registry`.
    ///
    /// With `force_new`, or credentials carrying call credentials, the
    /// channel is private to this handle and never enters the registry.
    pub fn construct_in(
        registry: &ChannelRegistry,
        target: &str,
        args: ChannelArgs,
    ) -> Result<Self, ChannelError> {
        let parsed = args.parse()?;
        let key = registry.keys().build(target, &parsed)?;
        let watch_mode = registry.config().watch_mode;
        let connector = registry.connector();

        if parsed.is_exclusive() {
            let resource = connector.create(target, &parsed.args, parsed.credentials.as_ref())?;
            let entry = Arc::new(SharedChannelEntry::new(key, resource));
            tracing::debug!(
                address = target,
                entry = entry.id(),
                force_new = parsed.force_new,
                "created exclusive channel"
            );
            return Ok(Self {
                attachment: Attachment::Exclusive { entry },
                watch_mode,
            });
        }

        let (entry, lookup) = registry.lookup_or_insert(&key, || {
            connector.create(target, &parsed.args, parsed.credentials.as_ref())
        })?;
        if lookup == Lookup::Attached {
            tracing::debug!(address = target, entry = entry.id(), "reusing shared channel");
        }
        Ok(Self {
            attachment: Attachment::Shared {
                entry,
                registry: registry.clone(),
            },
            watch_mode,
        })
    }

    fn entry(&self) -> Result<&Arc<SharedChannelEntry>, ChannelError> {
        match &self.attachment {
            Attachment::Shared { entry, .. } | Attachment::Exclusive { entry } => Ok(entry),
            Attachment::Closed => Err(ChannelError::AlreadyClosed),
        }
    }

    /// The target reported by the underlying channel.
    pub fn target(&self) -> Result<String, ChannelError> {
        self.entry()?.with_resource(|resource| resource.target())
    }

    /// Run `f` against the concrete underlying channel of type `T`.
    pub fn with_channel<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ChannelError> {
        self.entry()?
            .with_resource(|resource| resource.as_any().downcast_ref::<T>().map(f))?
            .ok_or_else(|| {
                ChannelError::invalid(format!(
                    "underlying channel is not a {}",
                    std::any::type_name::<T>()
                ))
            })
    }

    /// Current connectivity state; with `try_to_connect`, an idle channel
    /// starts connecting.
    ///
    /// A SHUTDOWN answer closes the entry for every handle sharing it.
    pub fn connectivity_state(&self, try_to_connect: bool) -> Result<ConnectivityState, ChannelError> {
        let entry = self.entry()?;
        let check = entry.check_state(try_to_connect)?;

        // The entry lock is released here; unlinking takes the registry lock.
        if let Some(resource) = check.retired {
            tracing::warn!(
                key = %entry.key(),
                entry = entry.id(),
                "channel shut down out-of-band"
            );
            resource.destroy();
            if let Attachment::Shared { registry, .. } = &self.attachment {
                registry.remove(entry.key(), entry);
            }
        }
        Ok(check.state)
    }

    /// Block until the state differs from `last_state` (`true`) or
    /// `deadline` passes (`false`).
    ///
    /// In [`WatchMode::Serialized`] the wait holds the entry lock, so other
    /// handles sharing this channel block until it returns.
    pub fn watch_connectivity_state(
        &self,
        last_state: ConnectivityState,
        deadline: Instant,
    ) -> Result<bool, ChannelError> {
        let entry = self.entry()?;
        match self.watch_mode {
            WatchMode::Serialized => entry.watch_locked(last_state, deadline),
            WatchMode::Concurrent => {
                let resource = entry.resource()?;
                Ok(resource.watch_state(last_state, deadline))
            }
        }
    }

    /// Kick a connection attempt and wait up to `timeout` for READY.
    ///
    /// Returns `false` when the deadline passes first. TRANSIENT_FAILURE is
    /// reported as [`ChannelError::ConnectFailed`].
    pub fn wait_for_ready(&self, timeout: Duration) -> Result<bool, ChannelError> {
        let deadline = Instant::now() + timeout;

        let mut state = self.connectivity_state(true)?;
        if ready(state)? {
            return Ok(true);
        }
        while self.watch_connectivity_state(state, deadline)? {
            state = self.connectivity_state(false)?;
            if ready(state)? {
                return Ok(true);
            }
        }
        ready(self.connectivity_state(false)?)
    }

    /// Release this handle's reference. Idempotent.
    pub fn close(&mut self) {
        match mem::replace(&mut self.attachment, Attachment::Closed) {
            Attachment::Shared { entry, registry } => {
                // release() drops the entry lock before returning; the
                // registry lock is never taken under an entry lock.
                if let Some(resource) = entry.release() {
                    registry.remove(entry.key(), &entry);
                    resource.destroy();
                    tracing::debug!(key = %entry.key(), entry = entry.id(), "destroyed shared channel");
                }
            }
            Attachment::Exclusive { entry } => {
                if let Some(resource) = entry.release() {
                    resource.destroy();
                    tracing::debug!(entry = entry.id(), "destroyed exclusive channel");
                }
            }
            Attachment::Closed => {}
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.attachment, Attachment::Closed)
    }

    /// True when attached through the registry.
    pub fn is_shared(&self) -> bool {
        matches!(self.attachment, Attachment::Shared { .. })
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.entry().ok().map(|entry| entry.key())
    }

    /// Handles currently attached to this handle's entry; 0 once closed.
    pub fn ref_count(&self) -> usize {
        self.entry().map_or(0, |entry| entry.ref_count())
    }

    /// True when both handles use the same entry.
    pub fn shares_channel_with(&self, other: &ChannelHandle) -> bool {
        match (self.entry(), other.entry()) {
            (Ok(a), Ok(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

fn ready(state: ConnectivityState) -> Result<bool, ChannelError> {
    match state {
        ConnectivityState::Ready => Ok(true),
        ConnectivityState::TransientFailure => {
            Err(ChannelError::ConnectFailed(state.to_string()))
        }
        ConnectivityState::Shutdown => Err(ChannelError::AlreadyClosed),
        ConnectivityState::Idle | ConnectivityState::Connecting => Ok(false),
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.attachment {
            Attachment::Shared { .. } => "shared",
            Attachment::Exclusive { .. } => "exclusive",
            Attachment::Closed => "closed",
        };
        f.debug_struct("ChannelHandle")
            .field("kind", &kind)
            .field("key", &self.key().map(CacheKey::as_str))
            .finish()
    }
}
