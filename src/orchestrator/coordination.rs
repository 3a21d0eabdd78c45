//! Conditional coordination evaluation.
//!
//! Only the documented subset is supported: the literal `"always"`, and
//! otherwise an address compared against the delivered/failed sets of
//! already-attempted recipients in the same send. Unknown expressions are
//! a validation error, never a silent `false`.

use std::collections::HashSet;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("unsupported conditional expression: {0}")]
    Unsupported(String),
}

/// Validates a conditional rule's `if` clause against the supported
/// grammar, without evaluating it.
pub fn validate_condition(expr: &str) -> Result<(), ConditionError> {
    if expr == "always" {
        return Ok(());
    }
    if let Some(rest) = expr.strip_prefix("delivered:") {
        if !rest.is_empty() {
            return Ok(());
        }
    }
    if let Some(rest) = expr.strip_prefix("failed:") {
        if !rest.is_empty() {
            return Ok(());
        }
    }
    Err(ConditionError::Unsupported(expr.to_string()))
}

/// Evaluates a validated `if` clause against the sets of addresses that
/// have already reached `delivered` or `failed` in the same send.
#[must_use]
pub fn evaluate_conditional(
    expr: &str,
    delivered: &HashSet<String>,
    failed: &HashSet<String>,
) -> bool {
    if expr == "always" {
        return true;
    }
    if let Some(address) = expr.strip_prefix("delivered:") {
        return delivered.contains(address);
    }
    if let Some(address) = expr.strip_prefix("failed:") {
        return failed.contains(address);
    }
    false // unknown identifiers evaluate to false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_is_always_true() {
        let empty = HashSet::new();
        assert!(evaluate_conditional("always", &empty, &empty));
    }

    #[test]
    fn delivered_membership_checked() {
        let mut delivered = HashSet::new();
        delivered.insert("a@example.com".to_string());
        let failed = HashSet::new();
        assert!(evaluate_conditional("delivered:a@example.com", &delivered, &failed));
        assert!(!evaluate_conditional("delivered:b@example.com", &delivered, &failed));
    }

    #[test]
    fn unknown_identifier_evaluates_false() {
        let empty = HashSet::new();
        assert!(!evaluate_conditional("nonsense", &empty, &empty));
    }

    #[test]
    fn validate_rejects_unsupported_grammar() {
        assert!(validate_condition("always").is_ok());
        assert!(validate_condition("delivered:a@example.com").is_ok());
        assert!(validate_condition("nonsense").is_err());
    }
}
