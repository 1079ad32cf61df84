//! Identifier handling and store key derivation.

/// Prefix of the administratively created override hash.
pub const OVERRIDE_PREFIX: &str = "rate_limit";
/// Prefix of the per-window request counter.
pub const COUNT_PREFIX: &str = "count";
/// Prefix of the cooldown sentinel.
pub const BLOCK_PREFIX: &str = "block";

/// The resolved key a caller's requests are tracked against.
///
/// This is either the caller's credential token or its network address,
/// never a combination of both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the override record, `rate_limit:<identifier>`.
    pub fn override_key(&self) -> String {
        format!("{}:{}", OVERRIDE_PREFIX, self.0)
    }

    /// Key of the window counter, `count:<identifier>`.
    pub fn count_key(&self) -> String {
        format!("{}:{}", COUNT_PREFIX, self.0)
    }

    /// Key of the block flag, `block:<identifier>`.
    pub fn block_key(&self) -> String {
        format!("{}:{}", BLOCK_PREFIX, self.0)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_patterns() {
        let id = Identifier::new("127.0.0.1");

        assert_eq!(id.override_key(), "rate_limit:127.0.0.1");
        assert_eq!(id.count_key(), "count:127.0.0.1");
        assert_eq!(id.block_key(), "block:127.0.0.1");
    }

    #[test]
    fn test_token_identifier() {
        let id = Identifier::new("abc123");

        assert_eq!(id.as_str(), "abc123");
        assert_eq!(id.to_string(), "abc123");
        assert_eq!(id.block_key(), "block:abc123");
    }

    #[test]
    fn test_identifier_equality() {
        assert_eq!(Identifier::new("a"), Identifier::new(String::from("a")));
        assert_ne!(Identifier::new("a"), Identifier::new("b"));
    }
}
