// Component model
// A component is a capability exposed as one or more remote procedures

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityKind {
    BrightnessControl,
    CursorControl,
    ServiceDiscovery,
    ScreenLock,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 4] = [
        CapabilityKind::BrightnessControl,
        CapabilityKind::CursorControl,
        CapabilityKind::ServiceDiscovery,
        CapabilityKind::ScreenLock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::BrightnessControl => "brightness-control",
            CapabilityKind::CursorControl => "cursor-control",
            CapabilityKind::ServiceDiscovery => "service-discovery",
            CapabilityKind::ScreenLock => "screen-lock",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CapabilityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = CapabilityKind::ALL.iter().map(|k| k.as_str()).collect();
                Error::Parse(format!(
                    "Unknown capability kind '{}'. Valid kinds: {}",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

/// Positional and keyword arguments of a single call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Invocation {
    pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }

    pub fn with_args(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }

    /// Integer argument at `index`
    pub fn arg_i64(&self, index: usize) -> Result<i64> {
        match self.args.get(index) {
            Some(value) => value.as_i64().ok_or_else(|| {
                Error::invalid_argument(format!(
                    "argument {} must be an integer, got {}",
                    index, value
                ))
            }),
            None => Err(Error::invalid_argument(format!(
                "missing argument {} (integer)",
                index
            ))),
        }
    }

    /// String argument at `index`
    pub fn arg_str(&self, index: usize) -> Result<&str> {
        match self.args.get(index) {
            Some(value) => value.as_str().ok_or_else(|| {
                Error::invalid_argument(format!(
                    "argument {} must be a string, got {}",
                    index, value
                ))
            }),
            None => Err(Error::invalid_argument(format!(
                "missing argument {} (string)",
                index
            ))),
        }
    }

    /// Positional argument, or keyword argument `name` when no positional one is given
    pub fn arg_or_kwarg(&self, index: usize, name: &str) -> Option<&Value> {
        self.args.get(index).or_else(|| self.kwargs.get(name))
    }
}

/// Result of a successful call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl CallResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            args: vec![value.into()],
            kwargs: Map::new(),
        }
    }

    pub fn values(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }

    pub fn keywords(kwargs: Map<String, Value>) -> Self {
        Self {
            args: Vec::new(),
            kwargs,
        }
    }
}

/// A capability hosted by the daemon and callable through the router
#[async_trait]
pub trait Component: Send + Sync {
    fn kind(&self) -> CapabilityKind;

    /// Procedure suffixes, joined to the configured prefix at registration
    fn procedures(&self) -> &'static [&'static str];

    async fn invoke(&self, procedure: &str, invocation: Invocation) -> Result<CallResult>;

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capability_kind_names() {
        for kind in CapabilityKind::ALL {
            assert_eq!(kind.as_str().parse::<CapabilityKind>().unwrap(), kind);
        }
        assert!("brightness".parse::<CapabilityKind>().is_err());
    }

    #[test]
    fn test_capability_kind_serde_matches_display() {
        let encoded = serde_json::to_string(&CapabilityKind::ScreenLock).unwrap();
        assert_eq!(encoded, "\"screen-lock\"");
    }

    #[test]
    fn test_invocation_accessors() {
        let inv = Invocation::with_args(vec![json!(70), json!("left")]);
        assert_eq!(inv.arg_i64(0).unwrap(), 70);
        assert_eq!(inv.arg_str(1).unwrap(), "left");

        let err = inv.arg_i64(1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(inv.arg_i64(5).is_err());
    }

    #[test]
    fn test_arg_or_kwarg() {
        let mut kwargs = Map::new();
        kwargs.insert("steps".into(), json!(3));
        let inv = Invocation::new(vec![json!("up")], kwargs);

        assert_eq!(inv.arg_or_kwarg(0, "direction"), Some(&json!("up")));
        assert_eq!(inv.arg_or_kwarg(1, "steps"), Some(&json!(3)));
        assert_eq!(inv.arg_or_kwarg(2, "missing"), None);
    }
}
