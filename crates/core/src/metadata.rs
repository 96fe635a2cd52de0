//! Typed access to the build metadata handed over by the build pipeline.
//!
//! Upstream builders disagree on key names (`SSHHost` vs. `Host`) and on
//! integer widths (`Port` arrives as a narrow integer from older hosts and as
//! a wide one from newer hosts). Every lookup goes through a [`KeyChain`]
//! that declares the keys to try in order, and coercion happens here instead
//! of at the call sites.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::{MetadataError, ResolveError};

// ---------------------------------------------------------------------------
// Well-known keys
// ---------------------------------------------------------------------------

/// Key names populated by the build pipeline.
pub mod keys {
    pub const CONN_TYPE: &str = "ConnType";
    pub const ID: &str = "ID";

    pub const USER: &str = "User";
    pub const HOST: &str = "Host";
    pub const PORT: &str = "Port";
    pub const PASSWORD: &str = "Password";

    pub const SSH_USERNAME: &str = "SSHUsername";
    pub const SSH_HOST: &str = "SSHHost";
    pub const SSH_PORT: &str = "SSHPort";
    pub const SSH_PASSWORD: &str = "SSHPassword";
    pub const SSH_PRIVATE_KEY: &str = "SSHPrivateKey";
    pub const SSH_PRIVATE_KEY_FILE: &str = "SSHPrivateKeyFile";
    pub const SSH_CERTIFICATE_FILE: &str = "SSHCertificateFile";
    pub const SSH_AGENT_AUTH: &str = "SSHAgentAuth";
    pub const SSH_TIMEOUT: &str = "SSHTimeout";

    pub const WINRM_USER: &str = "WinRMUser";
    pub const WINRM_HOST: &str = "WinRMHost";
    pub const WINRM_PORT: &str = "WinRMPort";
    pub const WINRM_PASSWORD: &str = "WinRMPassword";
    pub const WINRM_USE_SSL: &str = "WinRMUseSSL";
    pub const WINRM_INSECURE: &str = "WinRMInsecure";
    pub const WINRM_TIMEOUT: &str = "WinRMTimeout";
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A single metadata value.
#[derive(Clone, PartialEq)]
pub enum MetaValue {
    Str(String),
    Bool(bool),
    /// Narrow integer, as emitted by older hosts.
    Int(i32),
    /// Wide integer, as emitted by newer hosts.
    Int64(i64),
    Duration(Duration),
}

impl MetaValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Int64(_) => "int64",
            Self::Duration(_) => "duration",
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

// Values may be credentials, so only the type is printed.
impl fmt::Debug for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Int(v) => write!(f, "Int({v})"),
            Self::Int64(v) => write!(f, "Int64({v})"),
            Self::Duration(v) => write!(f, "Duration({v:?})"),
            Self::Str(_) => f.write_str("Str(..)"),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for MetaValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<Duration> for MetaValue {
    fn from(v: Duration) -> Self {
        Self::Duration(v)
    }
}

// ---------------------------------------------------------------------------
// Key chains
// ---------------------------------------------------------------------------

/// Ordered list of keys consulted for one logical value.
///
/// The first key holding a usable value wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChain(&'static [&'static str]);

impl KeyChain {
    pub const fn new(keys: &'static [&'static str]) -> Self {
        Self(keys)
    }

    pub fn keys(&self) -> &'static [&'static str] {
        self.0
    }
}

// ---------------------------------------------------------------------------
// BuildMetadata
// ---------------------------------------------------------------------------

/// Flat key/value data describing how to reach the just-built instance.
///
/// Supplied once per execution and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct BuildMetadata {
    values: HashMap<String, MetaValue>,
}

impl BuildMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetaValue>,
    ) -> Option<MetaValue> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<MetaValue> {
        self.values.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Decode a JSON object into metadata.
    ///
    /// Integers that fit in 32 bits become [`MetaValue::Int`], larger ones
    /// [`MetaValue::Int64`]. `null` entries are skipped. Nested arrays,
    /// objects and non-integral numbers are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, MetadataError> {
        let obj = value.as_object().ok_or(MetadataError::NotAnObject)?;

        let mut metadata = Self::new();
        for (key, raw) in obj {
            let value = match raw {
                serde_json::Value::Null => continue,
                serde_json::Value::Bool(v) => MetaValue::Bool(*v),
                serde_json::Value::String(v) => MetaValue::Str(v.clone()),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(v) => match i32::try_from(v) {
                        Ok(narrow) => MetaValue::Int(narrow),
                        Err(_) => MetaValue::Int64(v),
                    },
                    None => {
                        return Err(MetadataError::UnsupportedValue {
                            key: key.clone(),
                            kind: "non-integral number",
                        })
                    }
                },
                serde_json::Value::Array(_) => {
                    return Err(MetadataError::UnsupportedValue {
                        key: key.clone(),
                        kind: "array",
                    })
                }
                serde_json::Value::Object(_) => {
                    return Err(MetadataError::UnsupportedValue {
                        key: key.clone(),
                        kind: "object",
                    })
                }
            };
            metadata.values.insert(key.clone(), value);
        }

        Ok(metadata)
    }

    /// Decode metadata from a JSON document.
    pub fn from_json_str(document: &str) -> Result<Self, MetadataError> {
        let value: serde_json::Value = serde_json::from_str(document)?;
        Self::from_json(&value)
    }

    /// First non-empty string along `chain`.
    pub fn string(&self, chain: KeyChain) -> Option<&str> {
        chain.keys().iter().find_map(|key| match self.values.get(*key) {
            Some(MetaValue::Str(v)) if !v.is_empty() => Some(v.as_str()),
            _ => None,
        })
    }

    /// First non-zero port along `chain`, accepting either integer width.
    pub fn port(&self, chain: KeyChain) -> Option<u16> {
        chain.keys().iter().find_map(|key| {
            self.values
                .get(*key)
                .and_then(MetaValue::as_i64)
                .and_then(|v| u16::try_from(v).ok())
                .filter(|port| *port != 0)
        })
    }

    /// Boolean flag; `None` when absent or not a boolean.
    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(MetaValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Timeout-like duration stored under `key`.
    ///
    /// Absent keys yield `Ok(None)`. Strings use Go duration syntax
    /// (`20m5s`), integers are nanoseconds. Zero and malformed values are
    /// rejected with [`ResolveError::InvalidTimeout`].
    pub fn duration(&self, key: &'static str) -> Result<Option<Duration>, ResolveError> {
        let Some(raw) = self.values.get(key) else {
            return Ok(None);
        };

        let invalid = |value: String| ResolveError::InvalidTimeout { key, value };

        let parsed = match raw {
            MetaValue::Duration(d) => Some(*d),
            MetaValue::Str(s) => parse_go_duration(s),
            MetaValue::Int(_) | MetaValue::Int64(_) => raw
                .as_i64()
                .and_then(|nanos| u64::try_from(nanos).ok())
                .map(Duration::from_nanos),
            MetaValue::Bool(_) => None,
        };

        match parsed {
            Some(d) if !d.is_zero() => Ok(Some(d)),
            Some(d) => Err(invalid(format!("{d:?}"))),
            None => Err(invalid(match raw {
                MetaValue::Str(s) => s.clone(),
                other => other.kind().to_string(),
            })),
        }
    }
}

// ---------------------------------------------------------------------------
// Go duration syntax
// ---------------------------------------------------------------------------

/// Parse a Go-style duration string such as `1h5m2s`, `300ms` or `1.5h`.
///
/// Returns `None` for malformed or negative input. A bare `0` is accepted.
pub fn parse_go_duration(input: &str) -> Option<Duration> {
    let s = input.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    if s.is_empty() || s.starts_with('-') {
        return None;
    }
    if s == "0" {
        return Some(Duration::ZERO);
    }

    let mut rest = s;
    let mut total_nanos: u128 = 0;

    while !rest.is_empty() {
        let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (int_part, after_int) = rest.split_at(int_len);

        let (frac_part, after_number) = match after_int.strip_prefix('.') {
            Some(tail) => {
                let frac_len = tail.find(|c: char| !c.is_ascii_digit()).unwrap_or(tail.len());
                tail.split_at(frac_len)
            }
            None => ("", after_int),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }

        let unit_len = after_number
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_number.len());
        let (unit, remaining) = after_number.split_at(unit_len);
        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            _ => return None,
        };

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().ok()?
        };
        total_nanos = total_nanos.checked_add(whole.checked_mul(unit_nanos)?)?;

        if !frac_part.is_empty() {
            let digits = &frac_part[..frac_part.len().min(18)];
            let numerator: u128 = digits.parse().ok()?;
            let denominator = 10u128.pow(digits.len() as u32);
            total_nanos = total_nanos.checked_add(numerator * unit_nanos / denominator)?;
        }

        rest = remaining;
    }

    let nanos = u64::try_from(total_nanos).ok()?;
    Some(Duration::from_nanos(nanos))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
