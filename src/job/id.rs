use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Number;

/// Opaque job identifier.
///
/// Servers hand out either numeric or string ids. Equality is by value *and*
/// representation: `JobId::Number(1)` never equals `JobId::Text("1")`.
///
/// Numeric ids keep the full JSON number range. An integral float such as
/// `3.0` decodes to the integer `3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum JobId {
    Number(Number),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawJobId {
    Number(Number),
    Text(String),
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawJobId::deserialize(deserializer)? {
            RawJobId::Number(n) => JobId::Number(normalize_number(n)),
            RawJobId::Text(s) => JobId::Text(s),
        })
    }
}

fn normalize_number(n: Number) -> Number {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
            Number::from(f as i64)
        }
        _ => n,
    }
}

impl JobId {
    /// URL path segment for this id.
    pub fn path_segment(&self) -> Cow<'_, str> {
        match self {
            JobId::Number(n) => Cow::Owned(n.to_string()),
            JobId::Text(s) => urlencoding::encode(s),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobId::Number(n) => write!(f, "{}", n),
            JobId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        JobId::Number(value.into())
    }
}

impl From<i32> for JobId {
    fn from(value: i32) -> Self {
        JobId::Number(value.into())
    }
}

impl From<u32> for JobId {
    fn from(value: u32) -> Self {
        JobId::Number(value.into())
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        JobId::Number(value.into())
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        JobId::Text(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        JobId::Text(value)
    }
}
