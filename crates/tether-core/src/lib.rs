// ABOUTME: Core library for tether - shared, reference-counted client channels
// ABOUTME: Keys, entries, the process-wide registry and the handles callers hold

pub mod args;
pub mod config;
pub mod credentials;
pub mod digest;
pub mod entry;
pub mod error;
pub mod handle;
pub mod key;
pub mod memory;
pub mod registry;
pub mod resource;
pub mod state;

pub use args::{ArgValue, ChannelArg, ChannelArgs, ParsedArgs, CREDENTIALS_KEY, FORCE_NEW_KEY};
pub use config::{Config, KeepAliveConfig, RegistryConfig, TransportConfig, WatchMode};
pub use credentials::{CallCredentials, ChannelCredentials};
pub use digest::{ArgsDigest, Sha256Digest};
pub use entry::SharedChannelEntry;
pub use error::ChannelError;
pub use handle::ChannelHandle;
pub use key::{CacheKey, KeyBuilder};
pub use memory::{ConnectBehavior, InMemoryChannel, InMemoryConnector};
pub use registry::{ChannelRegistry, Lookup};
pub use resource::{ChannelConnector, ChannelResource};
pub use state::ConnectivityState;
