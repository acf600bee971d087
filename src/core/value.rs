//! core::value
//!
//! Typed setting values and text coercion.
//!
//! # Architecture
//!
//! Persisted configuration is a JSON object of string keys to values. Every
//! value whose key is a registered setting is decoded into [`Value`], a
//! tagged sum over the four setting kinds. Keys the registry does not know
//! (and values that do not fit their kind) are kept as [`Value::Raw`] so
//! that a read followed by a write never loses or reorders data.
//!
//! # Coercion Rules
//!
//! | Kind | Accepted text |
//! |------|---------------|
//! | string | anything |
//! | int | decimal, optional sign |
//! | bool | `true,y,yes,1,on` / `false,n,no,0,off` (case-insensitive) |
//! | string-list | comma separated, elements trimmed, empty text is `[]` |
//!
//! # Example
//!
//! ```
//! use minicluster::core::value::{Kind, Value};
//!
//! let v = Kind::StringList.coerce(" a, b ,c").unwrap();
//! assert_eq!(v, Value::List(vec!["a".into(), "b".into(), "c".into()]));
//! assert_eq!(Kind::Bool.coerce("YES").unwrap(), Value::Bool(true));
//! ```

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when text cannot be coerced into a kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse '{raw}' as {kind}")]
pub struct CoercionError {
    /// The kind that was requested.
    pub kind: Kind,
    /// The rejected input.
    pub raw: String,
}

/// The type of a registered setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    String,
    Int,
    Bool,
    StringList,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::String => "string",
            Kind::Int => "int",
            Kind::Bool => "bool",
            Kind::StringList => "string-list",
        };
        f.write_str(name)
    }
}

impl Kind {
    /// Coerce raw text into a value of this kind.
    pub fn coerce(self, raw: &str) -> Result<Value, CoercionError> {
        let fail = || CoercionError {
            kind: self,
            raw: raw.to_string(),
        };
        match self {
            Kind::String => Ok(Value::String(raw.to_string())),
            Kind::Int => raw.trim().parse::<i64>().map(Value::Int).map_err(|_| fail()),
            Kind::Bool => parse_bool(raw).map(Value::Bool).ok_or_else(fail),
            Kind::StringList => Ok(Value::List(split_list(raw))),
        }
    }

    /// Decode a JSON value into this kind.
    ///
    /// Strings are coerced as text so that `{"v": "999"}` decodes into an
    /// int setting. Anything that still does not fit is returned as
    /// [`Value::Raw`].
    pub fn from_json(self, json: &serde_json::Value) -> Value {
        use serde_json::Value as J;
        let decoded = match (self, json) {
            (Kind::String, J::String(s)) => Some(Value::String(s.clone())),
            (Kind::Int, J::Number(n)) => n.as_i64().map(Value::Int),
            (Kind::Bool, J::Bool(b)) => Some(Value::Bool(*b)),
            (Kind::StringList, J::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            (kind, J::String(s)) if kind != Kind::String => kind.coerce(s).ok(),
            _ => None,
        };
        decoded.unwrap_or_else(|| Value::Raw(json.clone()))
    }
}

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<String>),
    /// A value whose key or shape the registry does not know.
    Raw(serde_json::Value),
}

impl Value {
    /// Encode for persistence.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .cloned()
                    .map(serde_json::Value::String)
                    .collect(),
            ),
            Value::Raw(json) => json.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::String(s) => f.write_str(s),
            Value::List(items) => write!(f, "[{}]", items.join(" ")),
            Value::Raw(serde_json::Value::String(s)) => f.write_str(s),
            Value::Raw(json) => write!(f, "{}", json),
        }
    }
}

/// Parse the accepted truthy and falsy spellings.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "y" | "yes" | "1" | "on" => Some(true),
        "false" | "n" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Split comma-separated text into trimmed elements.
pub fn split_list(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|item| item.trim().to_string()).collect()
}

// =============================================================================
// Human-readable sizes
// =============================================================================

const KB: f64 = 1000.0;
const KIB: f64 = 1024.0;

fn size_regex() -> &'static Regex {
    static SIZE: OnceLock<Regex> = OnceLock::new();
    SIZE.get_or_init(|| {
        Regex::new(r"^(\d+(?:\.\d+)?) ?([kKmMgGtTpP])?[iI]?[bB]?$").expect("size pattern is valid")
    })
}

fn parse_size(raw: &str, base: f64) -> Option<f64> {
    let caps = size_regex().captures(raw.trim())?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;
    let exponent = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 0,
        Some(unit) => match unit.as_str() {
            "k" => 1,
            "m" => 2,
            "g" => 3,
            "t" => 4,
            "p" => 5,
            _ => return None,
        },
    };
    Some(number * base.powi(exponent))
}

/// Parse a decimal human size (`20g`, `1000MB`) into bytes.
pub fn human_size_bytes(raw: &str) -> Option<u64> {
    parse_size(raw, KB).map(|bytes| bytes as u64)
}

/// Parse a memory size into MiB.
///
/// Units are binary (`2GB` is 2048 MiB). A bare number is already MiB.
pub fn memory_mib(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if let Ok(mib) = trimmed.parse::<u64>() {
        return Some(mib);
    }
    parse_size(trimmed, KIB).map(|bytes| (bytes / (KIB * KIB)) as u64)
}

/// Parse a disk size into MB (decimal units).
pub fn disk_mb(raw: &str) -> Option<u64> {
    human_size_bytes(raw).map(|bytes| bytes / 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_string_accepts_anything() {
        assert_eq!(
            Kind::String.coerce(" x,y ").unwrap(),
            Value::String(" x,y ".into())
        );
    }

    #[test]
    fn coerce_int() {
        assert_eq!(Kind::Int.coerce("42").unwrap(), Value::Int(42));
        assert_eq!(Kind::Int.coerce("-3").unwrap(), Value::Int(-3));
        assert!(Kind::Int.coerce("4.2").is_err());
        assert!(Kind::Int.coerce("abc").is_err());
    }

    #[test]
    fn coerce_bool_truthy_and_falsy() {
        for raw in ["true", "Y", "yes", "1", "ON"] {
            assert_eq!(Kind::Bool.coerce(raw).unwrap(), Value::Bool(true), "{raw}");
        }
        for raw in ["FALSE", "n", "No", "0", "off"] {
            assert_eq!(Kind::Bool.coerce(raw).unwrap(), Value::Bool(false), "{raw}");
        }
        assert!(Kind::Bool.coerce("maybe").is_err());
    }

    #[test]
    fn coerce_list() {
        assert_eq!(Kind::StringList.coerce("").unwrap(), Value::List(vec![]));
        assert_eq!(
            Kind::StringList.coerce("a , b").unwrap(),
            Value::List(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn from_json_coerces_strings_for_typed_kinds() {
        let json = serde_json::json!("999");
        assert_eq!(Kind::Int.from_json(&json), Value::Int(999));
        assert_eq!(Kind::String.from_json(&json), Value::String("999".into()));
    }

    #[test]
    fn from_json_keeps_mismatches_raw() {
        let json = serde_json::json!({"nested": true});
        assert_eq!(Kind::Int.from_json(&json), Value::Raw(json.clone()));
    }

    #[test]
    fn display_formats() {
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::List(vec!["a".into(), "b".into()]).to_string(), "[a b]");
    }

    #[test]
    fn memory_is_binary_mib() {
        assert_eq!(memory_mib("2GB"), Some(2048));
        assert_eq!(memory_mib("2g"), Some(2048));
        assert_eq!(memory_mib("4096"), Some(4096));
        assert_eq!(memory_mib("512MB"), Some(512));
        assert_eq!(memory_mib("lots"), None);
    }

    #[test]
    fn disk_is_decimal_mb() {
        assert_eq!(disk_mb("20g"), Some(20_000));
        assert_eq!(disk_mb("1000MB"), Some(1000));
        assert_eq!(disk_mb("x"), None);
    }
}
