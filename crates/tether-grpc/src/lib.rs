// ABOUTME: tonic transport for tether shared channels.
// ABOUTME: Builds endpoints from channel args and credentials and tracks their connectivity.

pub mod connector;
pub mod endpoint;
pub mod error;

// Connector and resource
pub use connector::{TonicChannel, TonicConnector, TonicHandleExt};

// Endpoint construction
pub use endpoint::{
    build_endpoint, target_uri, ARG_KEEPALIVE_PERMIT_WITHOUT_CALLS, ARG_KEEPALIVE_TIMEOUT_MS,
    ARG_KEEPALIVE_TIME_MS, ARG_PRIMARY_USER_AGENT, ARG_SSL_TARGET_NAME_OVERRIDE,
};

// Error types
pub use error::TransportError;
