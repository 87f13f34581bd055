// ABOUTME: Probe logic behind the tether command-line tool.
// ABOUTME: Opens handles through a registry and reports sharing and connectivity.

//! # tether-cli
//!
//! ```text
//! tether
//! ├── probe <target>        # Open handles, optionally connect, report state
//! ├── config
//! │   ├── init              # Write the default config file
//! │   └── show              # Print the effective config
//! └── version
//! ```
//!
//! ```bash
//! # Three handles to one target share a single channel
//! tether probe localhost:50051 --handles 3 --connect
//!
//! # A private channel with a custom user agent
//! tether probe localhost:50051 --force-new --arg grpc.primary_user_agent=probe/1
//! ```

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tether_core::{
    ArgValue, ChannelArgs, ChannelCredentials, ChannelError, ChannelHandle, ChannelRegistry,
    ConnectivityState,
};

/// Version of the tether CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// What `tether probe` should do.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub target: String,
    pub args: Vec<(String, ArgValue)>,
    pub handles: usize,
    pub connect: bool,
    pub wait: Duration,
    pub force_new: bool,
    pub tls: bool,
}

impl ProbeOptions {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            args: Vec::new(),
            handles: 1,
            connect: false,
            wait: Duration::from_secs(5),
            force_new: false,
            tls: false,
        }
    }

    fn channel_args(&self) -> ChannelArgs {
        let mut args = self
            .args
            .iter()
            .fold(ChannelArgs::new(), |args, (key, value)| {
                args.set(key.clone(), value.clone())
            });
        if self.tls {
            args = args.with_credentials(ChannelCredentials::default_ssl());
        }
        if self.force_new {
            args = args.force_new();
        }
        args
    }
}

/// Parse a `key=value` flag. Integer-looking values become ints.
pub fn parse_arg(raw: &str) -> Result<(String, ArgValue)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected key=value, got '{raw}'");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("empty key in '{raw}'");
    }
    let value = match value.parse::<i64>() {
        Ok(n) => ArgValue::Int(n),
        Err(_) => ArgValue::Str(value.to_string()),
    };
    Ok((key.to_string(), value))
}

/// Result of a probe, printed by the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub target: String,
    pub key: Option<String>,
    pub handles: usize,
    pub channels: usize,
    pub ref_count: usize,
    pub registry_entries: usize,
    pub state: ConnectivityState,
    pub ready: Option<bool>,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "target:    {}", self.target)?;
        match &self.key {
            Some(key) => writeln!(f, "key:       {key}")?,
            None => writeln!(f, "key:       (private)")?,
        }
        writeln!(
            f,
            "handles:   {} over {} channel(s)",
            self.handles, self.channels
        )?;
        writeln!(f, "ref count: {}", self.ref_count)?;
        writeln!(f, "registry:  {} entr(ies)", self.registry_entries)?;
        writeln!(f, "state:     {}", self.state)?;
        let ready = match self.ready {
            Some(true) => "yes",
            Some(false) => "no",
            None => "not requested",
        };
        write!(f, "ready:     {ready}")
    }
}

fn distinct_channels(handles: &[ChannelHandle]) -> usize {
    handles
        .iter()
        .enumerate()
        .filter(|(i, handle)| !handles[..*i].iter().any(|h| h.shares_channel_with(handle)))
        .count()
}

/// Open `handles` handles to the target, optionally wait for READY, and
/// report. Handles are closed before returning.
pub fn probe(registry: &ChannelRegistry, options: &ProbeOptions) -> Result<ProbeReport> {
    let args = options.channel_args();
    let count = options.handles.max(1);

    let mut handles = Vec::with_capacity(count);
    for _ in 0..count {
        let handle = registry
            .construct(&options.target, args.clone())
            .with_context(|| format!("Failed to open channel to {}", options.target))?;
        handles.push(handle);
    }
    let first = &handles[0];

    let ready = if options.connect {
        match first.wait_for_ready(options.wait) {
            Ok(ready) => Some(ready),
            Err(ChannelError::ConnectFailed(state)) => {
                tracing::warn!(target_addr = %options.target, %state, "connect attempt failed");
                Some(false)
            }
            Err(err) => return Err(err).context("Failed waiting for channel"),
        }
    } else {
        None
    };

    let report = ProbeReport {
        target: first.target()?,
        key: first
            .key()
            .filter(|_| first.is_shared())
            .map(ToString::to_string),
        handles: handles.len(),
        channels: distinct_channels(&handles),
        ref_count: first.ref_count(),
        registry_entries: registry.len(),
        state: first.connectivity_state(false)?,
        ready,
    };

    for mut handle in handles {
        handle.close();
    }
    Ok(report)
}
