//! Override records and the limit policy resolved for a request.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::identifier::Identifier;
use crate::error::{FloodgateError, Result};

/// Hash field holding the request limit.
pub const LIMIT_FIELD: &str = "limit";
/// Hash field holding the cooldown in whole seconds.
pub const COOLDOWN_FIELD: &str = "cooldown";

/// An administratively configured limit/cooldown pair for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    /// Requests allowed per one-second window
    pub limit: u64,
    /// Block duration once the limit is exceeded
    #[serde(rename = "cooldown_secs", with = "duration_secs")]
    pub cooldown: Duration,
}

impl OverrideRecord {
    pub fn new(limit: u64, cooldown: Duration) -> Self {
        Self { limit, cooldown }
    }

    /// Build a record from raw hash fields.
    ///
    /// Returns `Ok(None)` when neither field is present (no record). A record
    /// that exists but is incomplete or unparsable is an error: defaulting it
    /// would silently lift the limit for that identifier.
    pub fn from_fields(
        key: &str,
        limit: Option<&str>,
        cooldown: Option<&str>,
    ) -> Result<Option<Self>> {
        match (limit, cooldown) {
            (None, None) => Ok(None),
            _ => Self::from_present_fields(key, limit, cooldown).map(Some),
        }
    }

    /// Build a record from the fields of a hash known to exist at `key`.
    ///
    /// Every missing field is an error, including when both are missing.
    pub fn from_present_fields(
        key: &str,
        limit: Option<&str>,
        cooldown: Option<&str>,
    ) -> Result<Self> {
        let (limit, cooldown) = match (limit, cooldown) {
            (Some(limit), Some(cooldown)) => (limit, cooldown),
            (None, None) => return Err(malformed(key, "missing fields `limit` and `cooldown`")),
            (None, Some(_)) => return Err(malformed(key, "missing field `limit`")),
            (Some(_), None) => return Err(malformed(key, "missing field `cooldown`")),
        };

        let limit = parse_positive(key, LIMIT_FIELD, limit)?;
        let cooldown_secs = parse_positive(key, COOLDOWN_FIELD, cooldown)?;

        Ok(Self {
            limit,
            cooldown: Duration::from_secs(cooldown_secs),
        })
    }

    /// Field/value pairs as written to the store.
    pub fn to_fields(&self) -> [(&'static str, String); 2] {
        [
            (LIMIT_FIELD, self.limit.to_string()),
            (COOLDOWN_FIELD, self.cooldown.as_secs().to_string()),
        ]
    }
}

fn parse_positive(key: &str, field: &str, raw: &str) -> Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(malformed(key, &format!("field `{}` must be positive", field))),
        Ok(value) => Ok(value),
        Err(e) => Err(malformed(
            key,
            &format!("field `{}` is not an integer ({:?}): {}", field, raw, e),
        )),
    }
}

fn malformed(key: &str, reason: &str) -> FloodgateError {
    FloodgateError::MalformedOverride {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Where a resolved policy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySource {
    /// Override record keyed by the credential token
    Token,
    /// Override record keyed by the network address
    Address,
    /// Process-wide defaults, keyed by the network address
    Default,
}

impl std::fmt::Display for PolicySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PolicySource::Token => "token",
            PolicySource::Address => "address",
            PolicySource::Default => "default",
        };
        f.write_str(name)
    }
}

/// The identifier, limit and cooldown governing a single decision.
///
/// Limit and cooldown always come from the same source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitPolicy {
    pub identifier: Identifier,
    pub limit: u64,
    pub cooldown: Duration,
    pub source: PolicySource,
}

impl LimitPolicy {
    pub fn from_override(identifier: Identifier, record: OverrideRecord, source: PolicySource) -> Self {
        Self {
            identifier,
            limit: record.limit,
            cooldown: record.cooldown,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fields_absent() {
        let record = OverrideRecord::from_fields("rate_limit:x", None, None).unwrap();
        assert!(record.is_none());
    }

    #[test]
    fn test_from_fields_valid() {
        let record = OverrideRecord::from_fields("rate_limit:x", Some("5"), Some("15"))
            .unwrap()
            .unwrap();
        assert_eq!(record.limit, 5);
        assert_eq!(record.cooldown, Duration::from_secs(15));
    }

    #[test]
    fn test_from_fields_not_an_integer() {
        let err = OverrideRecord::from_fields("rate_limit:x", Some("five"), Some("15")).unwrap_err();
        match err {
            FloodgateError::MalformedOverride { key, reason } => {
                assert_eq!(key, "rate_limit:x");
                assert!(reason.contains("limit"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_fields_missing_cooldown() {
        let err = OverrideRecord::from_fields("rate_limit:x", Some("5"), None).unwrap_err();
        assert!(matches!(err, FloodgateError::MalformedOverride { .. }));
    }

    #[test]
    fn test_present_record_without_fields_is_malformed() {
        let err = OverrideRecord::from_present_fields("rate_limit:x", None, None).unwrap_err();
        match err {
            FloodgateError::MalformedOverride { key, reason } => {
                assert_eq!(key, "rate_limit:x");
                assert!(reason.contains("limit") && reason.contains("cooldown"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let record = OverrideRecord::from_present_fields("rate_limit:x", Some("5"), Some("15")).unwrap();
        assert_eq!(record, OverrideRecord::new(5, Duration::from_secs(15)));
    }

    #[test]
    fn test_from_fields_zero_rejected() {
        assert!(OverrideRecord::from_fields("k", Some("0"), Some("15")).is_err());
        assert!(OverrideRecord::from_fields("k", Some("5"), Some("0")).is_err());
        assert!(OverrideRecord::from_fields("k", Some("-1"), Some("15")).is_err());
    }

    #[test]
    fn test_to_fields() {
        let record = OverrideRecord::new(5, Duration::from_secs(15));
        let fields = record.to_fields();
        assert_eq!(fields[0], ("limit", "5".to_string()));
        assert_eq!(fields[1], ("cooldown", "15".to_string()));
    }

    #[test]
    fn test_record_json() {
        let record = OverrideRecord::new(5, Duration::from_secs(15));
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"limit":5,"cooldown_secs":15}"#);
    }
}
