//! Struct validation failures
//!
//! Resolvers collect every violated field into a [`FieldViolations`] and raise
//! it; the default detailer turns it into a `StructValidation` error with one
//! human-readable detail per field.

use std::fmt;

use thiserror::Error;

/// The rule a field broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Min(i64),
    OneOf(Vec<String>),
    Email,
    /// Free-form message, already phrased for the client.
    Custom(String),
}

/// A single violated field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub rule: Rule,
}

impl FieldViolation {
    /// Message for API clients, e.g. `password must be at least 8 characters in length`.
    pub fn message(&self) -> String {
        let field = &self.field;
        match &self.rule {
            Rule::Required => format!("{field} is a required field"),
            Rule::MinLength(n) => format!("{field} must be at least {n} characters in length"),
            Rule::MaxLength(n) => {
                format!("{field} must be a maximum of {n} characters in length")
            }
            Rule::Min(n) => format!("{field} must be {n} or greater"),
            Rule::OneOf(options) => format!("{field} must be one of [{}]", options.join(" ")),
            Rule::Email => format!("{field} must be a valid email address"),
            Rule::Custom(message) => format!("{field} {message}"),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Every field that failed validation, in the order they were checked.
#[derive(Error, Debug, Clone, Default, PartialEq, Eq)]
#[error("{} field(s) failed validation: {}", .0.len(), messages(.0))]
pub struct FieldViolations(Vec<FieldViolation>);

fn messages(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(FieldViolation::message)
        .collect::<Vec<_>>()
        .join("; ")
}

impl FieldViolations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, rule: Rule) {
        self.0.push(FieldViolation {
            field: field.into(),
            rule,
        });
    }

    pub fn required(mut self, field: impl Into<String>) -> Self {
        self.push(field, Rule::Required);
        self
    }

    pub fn min_length(mut self, field: impl Into<String>, min: usize) -> Self {
        self.push(field, Rule::MinLength(min));
        self
    }

    pub fn max_length(mut self, field: impl Into<String>, max: usize) -> Self {
        self.push(field, Rule::MaxLength(max));
        self
    }

    pub fn email(mut self, field: impl Into<String>) -> Self {
        self.push(field, Rule::Email);
        self
    }

    /// Record `rule` against `field` only when `failed` is true.
    pub fn check(mut self, failed: bool, field: impl Into<String>, rule: Rule) -> Self {
        if failed {
            self.push(field, rule);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldViolation> {
        self.0.iter()
    }

    /// One message per violated field.
    pub fn details(&self) -> Vec<String> {
        self.0.iter().map(FieldViolation::message).collect()
    }

    /// `Ok` when nothing was violated.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_per_rule() {
        let violations = FieldViolations::new()
            .required("email")
            .min_length("password", 8)
            .check(true, "role", Rule::OneOf(vec!["admin".into(), "member".into()]));

        assert_eq!(
            violations.details(),
            vec![
                "email is a required field".to_string(),
                "password must be at least 8 characters in length".to_string(),
                "role must be one of [admin member]".to_string(),
            ]
        );
    }

    #[test]
    fn test_into_result() {
        assert!(FieldViolations::new().into_result().is_ok());

        let err = FieldViolations::new()
            .check(false, "name", Rule::Required)
            .email("email")
            .into_result()
            .unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(
            err.to_string(),
            "1 field(s) failed validation: email must be a valid email address"
        );
    }
}
