//! Domain types for the AMTP gateway
//!
//! Strongly-typed wrappers around primitive values to prevent primitive
//! obsession and keep validation close to construction.

use nutype::nutype;
use thiserror::Error;

/// Maximum size of a message body, in bytes.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 104_857_600), // up to 100MiB ceiling
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        TryFrom, Into
    ),
)]
pub struct MessageSizeBytes(usize);

impl MessageSizeBytes {
    /// Default maximum message size: 10 MiB.
    #[must_use]
    pub fn default_max() -> Self {
        Self::try_new(10 * 1024 * 1024).expect("10 MiB is within range")
    }

    /// Gets the value as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// A positive timeout, in whole seconds.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 86_400),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        TryFrom, Into
    ),
)]
pub struct TimeoutSecs(u64);

impl TimeoutSecs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.into_inner())
    }
}

/// Retry attempt counter (1-based: the first attempt is attempt 1).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 32),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        TryFrom, Into
    ),
)]
pub struct RetryAttempt(u8);

impl RetryAttempt {
    /// The first attempt.
    ///
    /// # Panics
    /// Never: 1 is always in range.
    #[must_use]
    pub fn first() -> Self {
        Self::try_new(1).expect("1 is a valid retry attempt")
    }

    /// Gets the value as `u8`.
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.into_inner()
    }

    /// The next attempt, if still within range.
    pub fn next(self) -> Result<Self, RetryAttemptError> {
        Self::try_new(self.into_inner() + 1)
    }
}

/// Maximum number of in-flight deliveries to a single peer domain.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        Default, TryFrom, Into
    ),
    default = 16
)]
pub struct PerPeerConcurrency(usize);

impl PerPeerConcurrency {
    /// Gets the value as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Maximum number of in-flight deliveries globally.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        Default, TryFrom, Into
    ),
    default = 512
)]
pub struct GlobalConcurrency(usize);

impl GlobalConcurrency {
    /// Gets the value as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Bound on a generic TTL cache's entry count.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000_000),
    derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
        Default, TryFrom, Into
    ),
    default = 1000
)]
pub struct CacheMaxSize(usize);

impl CacheMaxSize {
    /// Gets the value as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// A syntactically valid `local-part@domain` email-form address.
#[nutype(
    sanitize(trim),
    validate(predicate = is_plausible_address),
    derive(
        Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into, AsRef
    ),
)]
pub struct EmailAddress(String);

fn is_plausible_address(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty() && !domain.is_empty() && domain.contains('.') && !value.contains(' ')
}

impl EmailAddress {
    /// The domain portion (after the `@`).
    ///
    /// # Panics
    /// Never: construction guarantees exactly one `@`.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.as_ref().split_once('@').expect("validated address").1
    }

    /// The local-part portion (before the `@`).
    ///
    /// # Panics
    /// Never: construction guarantees exactly one `@`.
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.as_ref().split_once('@').expect("validated address").0
    }
}

/// A bare agent name (the local-part only, before it is qualified with a domain).
#[nutype(
    sanitize(trim),
    validate(regex = r"^[A-Za-z0-9]([A-Za-z0-9._-]{0,62}[A-Za-z0-9])?$"),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into),
)]
pub struct AgentName(String);

/// Domain-level validation errors shared across subsystems.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field failed validation for the given reason.
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// A required field was missing entirely.
    #[error("missing required field: {field}")]
    MissingField { field: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_address_requires_at_and_dot() {
        assert!(EmailAddress::try_new("a@example.com").is_ok());
        assert!(EmailAddress::try_new("no-at-sign").is_err());
        assert!(EmailAddress::try_new("a@localhost").is_err());
        assert!(EmailAddress::try_new("has space@example.com").is_err());
    }

    #[test]
    fn email_address_splits_local_and_domain() {
        let addr = EmailAddress::try_new("alice@example.com").unwrap();
        assert_eq!(addr.local_part(), "alice");
        assert_eq!(addr.domain(), "example.com");
    }

    #[test]
    fn agent_name_rejects_full_address() {
        assert!(AgentName::try_new("alice@example.com").is_err());
        assert!(AgentName::try_new("alice").is_ok());
        assert!(AgentName::try_new("").is_err());
    }

    #[test]
    fn retry_attempt_increments_within_range() {
        let first = RetryAttempt::first();
        assert_eq!(first.as_u8(), 1);
        let second = first.next().unwrap();
        assert_eq!(second.as_u8(), 2);
    }
}
