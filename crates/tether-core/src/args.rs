// ABOUTME: Loosely typed channel arguments and their validation.
// ABOUTME: Strips the credentials/force_new control entries and checks value types.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::credentials::ChannelCredentials;
use crate::error::ChannelError;

/// Control entry carrying channel credentials.
pub const CREDENTIALS_KEY: &str = "credentials";
/// Control entry requesting a private, never-shared channel.
pub const FORCE_NEW_KEY: &str = "force_new";

/// A value as supplied by the caller, before validation.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Credentials(ChannelCredentials),
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Str(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::Str(v)
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<ChannelCredentials> for ArgValue {
    fn from(v: ChannelCredentials) -> Self {
        ArgValue::Credentials(v)
    }
}

/// A validated argument forwarded to the underlying channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum ChannelArg {
    Int(i64),
    Str(String),
}

impl ChannelArg {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ChannelArg::Int(v) => Some(*v),
            ChannelArg::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ChannelArg::Str(v) => Some(v),
            ChannelArg::Int(_) => None,
        }
    }
}

/// The argument set passed to a channel construct call.
#[derive(Debug, Clone, Default)]
pub struct ChannelArgs {
    entries: BTreeMap<String, ArgValue>,
}

impl ChannelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing any previous value.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn with_int(self, key: impl Into<String>, value: i64) -> Self {
        self.set(key, ArgValue::Int(value))
    }

    pub fn with_str(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, ArgValue::Str(value.into()))
    }

    pub fn with_credentials(self, creds: ChannelCredentials) -> Self {
        self.set(CREDENTIALS_KEY, ArgValue::Credentials(creds))
    }

    pub fn force_new(self) -> Self {
        self.set(FORCE_NEW_KEY, ArgValue::Bool(true))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build from a JSON value. Only objects have string keys; arrays and
    /// scalars are rejected.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ChannelError> {
        let map = match value {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Array(_) => {
                return Err(ChannelError::invalid("args keys must be strings"))
            }
            _ => return Err(ChannelError::invalid("channel args must be a map")),
        };

        let mut args = ChannelArgs::new();
        for (key, value) in map {
            let value = match value {
                serde_json::Value::Null => ArgValue::Null,
                serde_json::Value::Bool(b) => ArgValue::Bool(b),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => ArgValue::Int(i),
                    None => ArgValue::Float(n.as_f64().unwrap_or(f64::NAN)),
                },
                serde_json::Value::String(s) => ArgValue::Str(s),
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    return Err(ChannelError::invalid(format!(
                        "args values must be int or string (key '{key}')"
                    )))
                }
            };
            args.entries.insert(key, value);
        }
        Ok(args)
    }

    /// Split off the control entries and validate everything else.
    pub fn parse(mut self) -> Result<ParsedArgs, ChannelError> {
        let credentials = match self.entries.remove(CREDENTIALS_KEY) {
            None | Some(ArgValue::Null) => None,
            Some(ArgValue::Credentials(creds)) => Some(creds),
            Some(_) => {
                return Err(ChannelError::invalid(
                    "credentials must be a ChannelCredentials object",
                ))
            }
        };

        // Only a literal `true` enables force_new; anything else is dropped.
        let force_new = matches!(
            self.entries.remove(FORCE_NEW_KEY),
            Some(ArgValue::Bool(true))
        );

        let mut args = BTreeMap::new();
        for (key, value) in self.entries {
            let arg = match value {
                ArgValue::Int(v) => ChannelArg::Int(v),
                ArgValue::Str(v) => ChannelArg::Str(v),
                _ => {
                    return Err(ChannelError::invalid(format!(
                        "args values must be int or string (key '{key}')"
                    )))
                }
            };
            args.insert(key, arg);
        }

        Ok(ParsedArgs {
            args,
            credentials,
            force_new,
        })
    }
}

impl<K: Into<String>, V: Into<ArgValue>> FromIterator<(K, V)> for ChannelArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self { entries }
    }
}

/// Arguments after control entries were removed.
#[derive(Debug, Clone)]
pub struct ParsedArgs {
    /// Remaining arguments, forwarded to the connector and digested.
    pub args: BTreeMap<String, ChannelArg>,
    pub credentials: Option<ChannelCredentials>,
    pub force_new: bool,
}

impl ParsedArgs {
    /// Whether this channel must stay out of the registry.
    pub fn is_exclusive(&self) -> bool {
        self.force_new
            || self
                .credentials
                .as_ref()
                .is_some_and(ChannelCredentials::has_call_level_credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CallCredentials;
    use serde_json::json;

    #[test]
    fn test_parse_strips_control_entries() {
        let parsed = ChannelArgs::new()
            .with_int("grpc.keepalive_time_ms", 1000)
            .with_credentials(ChannelCredentials::default_ssl())
            .force_new()
            .parse()
            .unwrap();

        assert!(parsed.force_new);
        assert!(parsed.credentials.is_some());
        assert_eq!(parsed.args.len(), 1);
        assert!(!parsed.args.contains_key(CREDENTIALS_KEY));
        assert!(!parsed.args.contains_key(FORCE_NEW_KEY));
    }

    #[test]
    fn test_null_credentials_is_insecure() {
        let parsed = ChannelArgs::new()
            .set(CREDENTIALS_KEY, ArgValue::Null)
            .parse()
            .unwrap();
        assert!(parsed.credentials.is_none());
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn test_wrong_credentials_type_rejected() {
        let err = ChannelArgs::new()
            .with_str(CREDENTIALS_KEY, "not credentials")
            .parse()
            .unwrap_err();
        assert_eq!(
            err,
            ChannelError::InvalidArgument(
                "credentials must be a ChannelCredentials object".to_string()
            )
        );
    }

    #[test]
    fn test_force_new_only_on_literal_true() {
        let parsed = ChannelArgs::new().with_int(FORCE_NEW_KEY, 1).parse().unwrap();
        assert!(!parsed.force_new);
        assert!(parsed.args.is_empty());

        let parsed = ChannelArgs::new().set(FORCE_NEW_KEY, false).parse().unwrap();
        assert!(!parsed.force_new);
    }

    #[test]
    fn test_invalid_value_types_rejected() {
        for value in [ArgValue::Bool(true), ArgValue::Float(1.5), ArgValue::Null] {
            let err = ChannelArgs::new().set("opt", value).parse().unwrap_err();
            assert!(matches!(err, ChannelError::InvalidArgument(msg) if msg.contains("int or string")));
        }

        let err = ChannelArgs::new()
            .set("other", ChannelCredentials::default_ssl())
            .parse()
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidArgument(_)));
    }

    #[test]
    fn test_from_json_object() {
        let args = ChannelArgs::from_json(json!({
            "grpc.primary_user_agent": "probe/1.0",
            "timeout": 30,
            "force_new": true,
            "credentials": null,
        }))
        .unwrap();
        let parsed = args.parse().unwrap();
        assert!(parsed.force_new);
        assert!(parsed.credentials.is_none());
        assert_eq!(parsed.args.get("timeout"), Some(&ChannelArg::Int(30)));
        assert_eq!(
            parsed.args.get("grpc.primary_user_agent").and_then(ChannelArg::as_str),
            Some("probe/1.0")
        );
    }

    #[test]
    fn test_from_json_rejects_non_string_keys() {
        let err = ChannelArgs::from_json(json!([1, 2, 3])).unwrap_err();
        assert_eq!(
            err,
            ChannelError::InvalidArgument("args keys must be strings".to_string())
        );

        let err = ChannelArgs::from_json(json!("host")).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidArgument(_)));
    }

    #[test]
    fn test_from_json_nested_and_float_values() {
        let err = ChannelArgs::from_json(json!({"nested": {"a": 1}})).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidArgument(_)));

        let args = ChannelArgs::from_json(json!({"ratio": 0.5})).unwrap();
        assert!(args.parse().is_err());
    }

    #[test]
    fn test_exclusive_with_call_credentials() {
        let creds = ChannelCredentials::default_ssl()
            .composite(CallCredentials::from_plugin(|_| Vec::new()));
        let parsed = ChannelArgs::new().with_credentials(creds).parse().unwrap();
        assert!(parsed.is_exclusive());

        let parsed = ChannelArgs::new()
            .with_credentials(ChannelCredentials::default_ssl())
            .parse()
            .unwrap();
        assert!(!parsed.is_exclusive());
    }

    #[test]
    fn test_from_iterator() {
        let args: ChannelArgs = vec![("a", ArgValue::Int(1)), ("b", ArgValue::from("x"))]
            .into_iter()
            .collect();
        assert_eq!(args.len(), 2);
    }
}
