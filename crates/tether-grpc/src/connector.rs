// ABOUTME: tonic-backed ChannelConnector and ChannelResource implementations.
// ABOUTME: Connectivity is tracked in a watch channel driven by a background connect task.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tether_core::{
    CallCredentials, ChannelArg, ChannelConnector, ChannelCredentials, ChannelError, ChannelHandle,
    ChannelResource, ConnectivityState, TransportConfig,
};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tonic::transport::{Channel, Endpoint};

use crate::endpoint::build_endpoint;
use crate::error::TransportError;

/// Where channel tasks run.
#[derive(Debug, Clone)]
enum Driver {
    Owned(Arc<Runtime>),
    Borrowed(Handle),
}

impl Driver {
    fn handle(&self) -> &Handle {
        match self {
            Driver::Owned(runtime) => runtime.handle(),
            Driver::Borrowed(handle) => handle,
        }
    }
}

/// Creates [`TonicChannel`]s for the registry.
///
/// The blocking channel API drives tokio futures with `Handle::block_on`, so
/// handles backed by this connector must not be used from inside an async
/// task.
#[derive(Debug)]
pub struct TonicConnector {
    config: TransportConfig,
    driver: Driver,
}

impl TonicConnector {
    /// Connector with its own single-worker runtime.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("tether-transport")
            .enable_all()
            .build()?;
        Ok(Self {
            config,
            driver: Driver::Owned(Arc::new(runtime)),
        })
    }

    /// Connector that spawns onto an existing multi-threaded runtime.
    pub fn with_handle(config: TransportConfig, handle: Handle) -> Self {
        Self {
            config,
            driver: Driver::Borrowed(handle),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl ChannelConnector for TonicConnector {
    fn create(
        &self,
        target: &str,
        args: &BTreeMap<String, ChannelArg>,
        credentials: Option<&ChannelCredentials>,
    ) -> Result<Arc<dyn ChannelResource>, ChannelError> {
        let endpoint = build_endpoint(target, args, credentials, &self.config)?;
        let channel = TonicChannel::new(
            target,
            endpoint,
            credentials.and_then(ChannelCredentials::call_credentials).cloned(),
            self.driver.clone(),
        );
        tracing::debug!(address = target, uri = %channel.endpoint.uri(), "created tonic channel");
        Ok(Arc::new(channel))
    }
}

/// A tonic channel plus the connectivity state the registry observes.
///
/// tonic does not report connectivity of an established channel, so the
/// state reflects the most recent explicit connect attempt.
#[derive(Debug)]
pub struct TonicChannel {
    target: String,
    endpoint: Endpoint,
    call_credentials: Option<CallCredentials>,
    driver: Driver,
    lazy: Channel,
    connected: Arc<Mutex<Option<Channel>>>,
    state: Arc<watch::Sender<ConnectivityState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TonicChannel {
    fn new(
        target: &str,
        endpoint: Endpoint,
        call_credentials: Option<CallCredentials>,
        driver: Driver,
    ) -> Self {
        // connect_lazy spawns its buffer worker onto the current runtime.
        let lazy = {
            let _guard = driver.handle().enter();
            endpoint.connect_lazy()
        };
        let (state, _) = watch::channel(ConnectivityState::Idle);
        Self {
            target: target.to_string(),
            endpoint,
            call_credentials,
            driver,
            lazy,
            connected: Arc::new(Mutex::new(None)),
            state: Arc::new(state),
            task: Mutex::new(None),
        }
    }

    /// Channel for generated client stubs. Prefers the connection made by
    /// the last successful connect attempt.
    pub fn channel(&self) -> Channel {
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| self.lazy.clone())
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Metadata to attach to each call, from composite credentials.
    pub fn call_metadata(&self) -> Vec<(String, String)> {
        self.call_credentials
            .as_ref()
            .map(|call| call.metadata_for(&self.endpoint.uri().to_string()))
            .unwrap_or_default()
    }

    fn start_connect(&self) {
        let started = self.state.send_if_modified(|state| {
            if matches!(
                *state,
                ConnectivityState::Idle | ConnectivityState::TransientFailure
            ) {
                *state = ConnectivityState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return;
        }

        let endpoint = self.endpoint.clone();
        let state = Arc::clone(&self.state);
        let connected = Arc::clone(&self.connected);
        let target = self.target.clone();
        let task = self.driver.handle().spawn(async move {
            let (next, result) = match endpoint.connect().await {
                Ok(channel) => {
                    *connected.lock().unwrap_or_else(PoisonError::into_inner) = Some(channel);
                    (ConnectivityState::Ready, None)
                }
                Err(err) => (ConnectivityState::TransientFailure, Some(err.to_string())),
            };
            // A destroy that raced the connect keeps SHUTDOWN.
            state.send_if_modified(|current| {
                if *current == ConnectivityState::Connecting {
                    *current = next;
                    true
                } else {
                    false
                }
            });
            match result {
                None => tracing::debug!(address = %target, "channel connected"),
                Some(error) => tracing::warn!(address = %target, %error, "channel connect failed"),
            }
        });

        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl ChannelResource for TonicChannel {
    fn target(&self) -> String {
        self.target.clone()
    }

    fn check_state(&self, try_to_connect: bool) -> ConnectivityState {
        let current = *self.state.borrow();
        if try_to_connect {
            self.start_connect();
        }
        current
    }

    fn watch_state(&self, last: ConnectivityState, deadline: Instant) -> bool {
        let mut rx = self.state.subscribe();
        if *rx.borrow_and_update() != last {
            return true;
        }
        let deadline = tokio::time::Instant::from_std(deadline);
        self.driver.handle().block_on(async move {
            matches!(
                tokio::time::timeout_at(deadline, rx.wait_for(|state| *state != last)).await,
                Ok(Ok(_))
            )
        })
    }

    fn destroy(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.state.send_replace(ConnectivityState::Shutdown);
        tracing::debug!(address = %self.target, "tonic channel destroyed");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Access to the tonic channel behind a handle.
pub trait TonicHandleExt {
    /// The tonic channel, or `InvalidArgument` when the handle is backed by
    /// another transport.
    fn tonic_channel(&self) -> Result<Channel, ChannelError>;
}

impl TonicHandleExt for ChannelHandle {
    fn tonic_channel(&self) -> Result<Channel, ChannelError> {
        self.with_channel(TonicChannel::channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tether_core::{ChannelArgs, ChannelRegistry};

    fn quick_config() -> TransportConfig {
        TransportConfig {
            connect_timeout_secs: Some(2),
            ..TransportConfig::default()
        }
    }

    fn registry() -> ChannelRegistry {
        ChannelRegistry::new(TonicConnector::new(quick_config()).unwrap())
    }

    #[test]
    fn test_new_channel_is_idle() {
        let registry = registry();
        let handle = registry.construct("127.0.0.1:1", ChannelArgs::new()).unwrap();
        assert_eq!(
            handle.connectivity_state(false).unwrap(),
            ConnectivityState::Idle
        );
        assert_eq!(handle.target().unwrap(), "127.0.0.1:1");
    }

    #[test]
    fn test_refused_connection_reports_connect_failed() {
        let registry = registry();
        let handle = registry.construct("127.0.0.1:1", ChannelArgs::new()).unwrap();
        let err = handle.wait_for_ready(Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, ChannelError::ConnectFailed(_)));
        assert_eq!(
            handle.connectivity_state(false).unwrap(),
            ConnectivityState::TransientFailure
        );
    }

    #[test]
    fn test_watch_times_out_while_idle() {
        let registry = registry();
        let handle = registry.construct("127.0.0.1:1", ChannelArgs::new()).unwrap();
        let deadline = Instant::now() + Duration::from_millis(50);
        assert!(!handle
            .watch_connectivity_state(ConnectivityState::Idle, deadline)
            .unwrap());
    }

    #[test]
    fn test_destroy_publishes_shutdown() {
        let connector = TonicConnector::new(quick_config()).unwrap();
        let resource = connector
            .create("127.0.0.1:1", &BTreeMap::new(), None)
            .unwrap();
        resource.destroy();
        assert_eq!(resource.check_state(false), ConnectivityState::Shutdown);
        assert!(resource.watch_state(ConnectivityState::Idle, Instant::now()));
    }

    #[test]
    fn test_invalid_address_rejected_at_construct() {
        let registry = registry();
        let err = registry
            .construct("bad host:1", ChannelArgs::new())
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidAddress(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handles_share_one_tonic_channel() {
        let registry = registry();
        let a = registry.construct("127.0.0.1:1", ChannelArgs::new()).unwrap();
        let b = registry.construct("127.0.0.1:1", ChannelArgs::new()).unwrap();
        assert!(a.shares_channel_with(&b));
        assert!(a.tonic_channel().is_ok());
    }

    #[test]
    fn test_call_metadata_from_composite_credentials() {
        let call = CallCredentials::from_plugin(|url: &str| {
            vec![("x-service".to_string(), url.to_string())]
        });
        let connector = TonicConnector::new(quick_config()).unwrap();
        let endpoint = Endpoint::from_static("http://127.0.0.1:1");
        let channel = TonicChannel::new("127.0.0.1:1", endpoint, Some(call), connector.driver.clone());
        let metadata = channel.call_metadata();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].0, "x-service");
        assert!(metadata[0].1.starts_with("http://127.0.0.1:1"));
    }

    #[test]
    fn test_tonic_channel_on_other_transport_is_invalid() {
        let registry = ChannelRegistry::new(tether_core::InMemoryConnector::new());
        let handle = registry.construct("mem:1", ChannelArgs::new()).unwrap();
        let err = handle.tonic_channel().unwrap_err();
        assert!(matches!(err, ChannelError::InvalidArgument(_)));
    }
}
