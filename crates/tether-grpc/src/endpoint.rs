// ABOUTME: tonic endpoint construction from a target, channel args and credentials.
// ABOUTME: Applies scheme normalization, keep-alive, timeouts, user agent and TLS settings.

use std::collections::BTreeMap;
use std::time::Duration;

use tether_core::{ChannelArg, ChannelCredentials, KeepAliveConfig, TransportConfig};
use tonic::transport::{Certificate, ClientTlsConfig, Endpoint, Identity};

use crate::error::TransportError;

/// Keep-alive ping interval in milliseconds.
pub const ARG_KEEPALIVE_TIME_MS: &str = "grpc.keepalive_time_ms";
/// Keep-alive ping timeout in milliseconds.
pub const ARG_KEEPALIVE_TIMEOUT_MS: &str = "grpc.keepalive_timeout_ms";
/// Non-zero to ping while no calls are active.
pub const ARG_KEEPALIVE_PERMIT_WITHOUT_CALLS: &str = "grpc.keepalive_permit_without_calls";
/// User agent sent with every request.
pub const ARG_PRIMARY_USER_AGENT: &str = "grpc.primary_user_agent";
/// TLS server name to verify instead of the target host.
pub const ARG_SSL_TARGET_NAME_OVERRIDE: &str = "grpc.ssl_target_name_override";

/// Build the URI tonic connects to.
///
/// Bare `host:port` targets get a scheme matching `use_tls`; explicit
/// schemes are normalized to match it (case-insensitive).
pub fn target_uri(target: &str, use_tls: bool) -> String {
    let addr = target.trim();
    let lower = addr.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        normalize_scheme(addr, use_tls)
    } else if use_tls {
        format!("https://{addr}")
    } else {
        format!("http://{addr}")
    }
}

fn normalize_scheme(addr: &str, use_tls: bool) -> String {
    let lower = addr.to_lowercase();
    if use_tls && lower.starts_with("http://") {
        format!("https://{}", &addr[7..])
    } else if !use_tls && lower.starts_with("https://") {
        format!("http://{}", &addr[8..])
    } else {
        addr.to_string()
    }
}

fn millis_arg(
    args: &BTreeMap<String, ChannelArg>,
    key: &str,
) -> Result<Option<Duration>, TransportError> {
    match args.get(key) {
        None => Ok(None),
        Some(ChannelArg::Int(ms)) if *ms >= 0 => Ok(Some(Duration::from_millis(*ms as u64))),
        Some(other) => Err(TransportError::InvalidArg {
            key: key.to_string(),
            reason: format!("expected a non-negative integer, got {other:?}"),
        }),
    }
}

fn str_arg<'a>(
    args: &'a BTreeMap<String, ChannelArg>,
    key: &str,
) -> Result<Option<&'a str>, TransportError> {
    match args.get(key) {
        None => Ok(None),
        Some(ChannelArg::Str(value)) => Ok(Some(value)),
        Some(other) => Err(TransportError::InvalidArg {
            key: key.to_string(),
            reason: format!("expected a string, got {other:?}"),
        }),
    }
}

fn is_recognised(key: &str) -> bool {
    matches!(
        key,
        ARG_KEEPALIVE_TIME_MS
            | ARG_KEEPALIVE_TIMEOUT_MS
            | ARG_KEEPALIVE_PERMIT_WITHOUT_CALLS
            | ARG_PRIMARY_USER_AGENT
            | ARG_SSL_TARGET_NAME_OVERRIDE
    )
}

/// Keep-alive from config, overridden by channel args.
fn keep_alive(
    config: &TransportConfig,
    args: &BTreeMap<String, ChannelArg>,
) -> Result<Option<(Duration, Duration, bool)>, TransportError> {
    let interval = millis_arg(args, ARG_KEEPALIVE_TIME_MS)?;
    let timeout = millis_arg(args, ARG_KEEPALIVE_TIMEOUT_MS)?;
    let while_idle = match args.get(ARG_KEEPALIVE_PERMIT_WITHOUT_CALLS) {
        None => None,
        Some(ChannelArg::Int(v)) => Some(*v != 0),
        Some(other) => {
            return Err(TransportError::InvalidArg {
                key: ARG_KEEPALIVE_PERMIT_WITHOUT_CALLS.to_string(),
                reason: format!("expected an integer, got {other:?}"),
            })
        }
    };

    let overridden = interval.is_some() || timeout.is_some() || while_idle.is_some();
    let base = match (&config.keep_alive, overridden) {
        (Some(ka), _) => ka.clone(),
        (None, true) => KeepAliveConfig::default(),
        (None, false) => return Ok(None),
    };
    Ok(Some((
        interval.unwrap_or_else(|| base.interval()),
        timeout.unwrap_or_else(|| base.timeout()),
        while_idle.unwrap_or(base.while_idle),
    )))
}

fn tls_config(credentials: Option<&ChannelCredentials>, domain: Option<&str>) -> ClientTlsConfig {
    let mut tls = ClientTlsConfig::new();
    tls = match credentials.and_then(ChannelCredentials::root_certs) {
        Some(pem) => tls.ca_certificate(Certificate::from_pem(pem)),
        None => tls.with_native_roots(),
    };
    if let Some((chain, key)) = credentials.and_then(ChannelCredentials::identity) {
        tls = tls.identity(Identity::from_pem(chain, key));
    }
    if let Some(domain) = domain {
        tls = tls.domain_name(domain);
    }
    tls
}

/// Create a tonic endpoint for `target`.
///
/// TLS is used when credentials are given or the config asks for it by
/// default. Unrecognised args are accepted and ignored.
pub fn build_endpoint(
    target: &str,
    args: &BTreeMap<String, ChannelArg>,
    credentials: Option<&ChannelCredentials>,
    config: &TransportConfig,
) -> Result<Endpoint, TransportError> {
    let use_tls = credentials.is_some() || config.default_tls;
    let uri = target_uri(target, use_tls);
    let mut endpoint =
        Endpoint::from_shared(uri).map_err(|e| TransportError::InvalidAddress(e.to_string()))?;

    if use_tls {
        let domain = str_arg(args, ARG_SSL_TARGET_NAME_OVERRIDE)?;
        endpoint = endpoint
            .tls_config(tls_config(credentials, domain))
            .map_err(|e| TransportError::TlsConfig(e.to_string()))?;
    }

    if let Some((interval, timeout, while_idle)) = keep_alive(config, args)? {
        endpoint = endpoint
            .http2_keep_alive_interval(interval)
            .keep_alive_timeout(timeout)
            .keep_alive_while_idle(while_idle);
    }

    if let Some(timeout) = config.connect_timeout() {
        endpoint = endpoint.connect_timeout(timeout);
    }

    if let Some(agent) = str_arg(args, ARG_PRIMARY_USER_AGENT)? {
        endpoint = endpoint
            .user_agent(agent.to_string())
            .map_err(|e| TransportError::InvalidArg {
                key: ARG_PRIMARY_USER_AGENT.to_string(),
                reason: e.to_string(),
            })?;
    }

    for key in args.keys().filter(|k| !is_recognised(k)) {
        tracing::trace!(key = %key, "channel arg not applied by tonic transport");
    }

    Ok(endpoint)
}
