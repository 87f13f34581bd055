// ABOUTME: In-process channel resource with scriptable connectivity.
// ABOUTME: Used as a loopback transport and to drive the registry in tests.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Instant;

use crate::args::ChannelArg;
use crate::credentials::ChannelCredentials;
use crate::error::ChannelError;
use crate::resource::{ChannelConnector, ChannelResource};
use crate::state::ConnectivityState;

/// What an idle in-memory channel does when asked to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    /// Goes straight to READY.
    #[default]
    Succeed,
    /// Goes to TRANSIENT_FAILURE.
    Fail,
    /// Stays CONNECTING until [`InMemoryChannel::set_state`] moves it.
    Manual,
}

#[derive(Debug)]
pub struct InMemoryChannel {
    target: String,
    args: BTreeMap<String, ChannelArg>,
    secure: bool,
    behavior: ConnectBehavior,
    state: Mutex<ConnectivityState>,
    changed: Condvar,
    destroyed: AtomicUsize,
}

impl InMemoryChannel {
    fn new(
        target: &str,
        args: &BTreeMap<String, ChannelArg>,
        secure: bool,
        behavior: ConnectBehavior,
    ) -> Self {
        Self {
            target: target.to_string(),
            args: args.clone(),
            secure,
            behavior,
            state: Mutex::new(ConnectivityState::Idle),
            changed: Condvar::new(),
            destroyed: AtomicUsize::new(0),
        }
    }

    /// Force a state transition and wake watchers.
    pub fn set_state(&self, next: ConnectivityState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = next;
        self.changed.notify_all();
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// How many times `destroy` ran.
    pub fn destroy_count(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn args(&self) -> &BTreeMap<String, ChannelArg> {
        &self.args
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl ChannelResource for InMemoryChannel {
    fn target(&self) -> String {
        self.target.clone()
    }

    fn check_state(&self, try_to_connect: bool) -> ConnectivityState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *state;
        if try_to_connect && current == ConnectivityState::Idle {
            *state = match self.behavior {
                ConnectBehavior::Succeed => ConnectivityState::Ready,
                ConnectBehavior::Fail => ConnectivityState::TransientFailure,
                ConnectBehavior::Manual => ConnectivityState::Connecting,
            };
            self.changed.notify_all();
        }
        current
    }

    fn watch_state(&self, last: ConnectivityState, deadline: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *state == last {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        true
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectivityState::Shutdown);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Connector producing [`InMemoryChannel`]s and remembering each one.
#[derive(Debug, Default)]
pub struct InMemoryConnector {
    behavior: ConnectBehavior,
    refuse: Option<String>,
    created: Mutex<Vec<Arc<InMemoryChannel>>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: ConnectBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    /// A connector whose `create` always fails with `reason`.
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            refuse: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn created_count(&self) -> usize {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Every channel created so far, oldest first.
    pub fn channels(&self) -> Vec<Arc<InMemoryChannel>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_channel(&self) -> Option<Arc<InMemoryChannel>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl ChannelConnector for InMemoryConnector {
    fn create(
        &self,
        target: &str,
        args: &BTreeMap<String, ChannelArg>,
        credentials: Option<&ChannelCredentials>,
    ) -> Result<Arc<dyn ChannelResource>, ChannelError> {
        if let Some(reason) = &self.refuse {
            return Err(ChannelError::ConnectionFailed(reason.clone()));
        }
        let channel = Arc::new(InMemoryChannel::new(
            target,
            args,
            credentials.is_some(),
            self.behavior,
        ));
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(channel.clone());
        Ok(channel)
    }
}
