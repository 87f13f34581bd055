// ABOUTME: Interface of the underlying network channel and its factory.
// ABOUTME: Transports implement these; the registry only ever talks to the traits.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::args::ChannelArg;
use crate::credentials::ChannelCredentials;
use crate::error::ChannelError;
use crate::state::ConnectivityState;

/// An established (or lazily connecting) channel to one target.
///
/// Implementations must be safe to call from many threads. `destroy` is
/// called exactly once by the owning entry; afterwards the channel reports
/// [`ConnectivityState::Shutdown`].
pub trait ChannelResource: Send + Sync + fmt::Debug {
    /// The target this channel was created for.
    fn target(&self) -> String;

    /// Current state. With `try_to_connect`, an idle channel starts connecting.
    fn check_state(&self, try_to_connect: bool) -> ConnectivityState;

    /// Block until the state differs from `last` (returns `true`) or
    /// `deadline` passes (returns `false`).
    fn watch_state(&self, last: ConnectivityState, deadline: Instant) -> bool;

    /// Tear the channel down.
    fn destroy(&self);

    /// Access to the concrete transport, e.g. to hand its channel to stubs.
    fn as_any(&self) -> &dyn Any;
}

/// Builds channel resources. Called with the registry lock held, so
/// `create` must not block on the network.
pub trait ChannelConnector: Send + Sync {
    fn create(
        &self,
        target: &str,
        args: &BTreeMap<String, ChannelArg>,
        credentials: Option<&ChannelCredentials>,
    ) -> Result<Arc<dyn ChannelResource>, ChannelError>;
}

impl<C: ChannelConnector + ?Sized> ChannelConnector for Arc<C> {
    fn create(
        &self,
        target: &str,
        args: &BTreeMap<String, ChannelArg>,
        credentials: Option<&ChannelCredentials>,
    ) -> Result<Arc<dyn ChannelResource>, ChannelError> {
        (**self).create(target, args, credentials)
    }
}
