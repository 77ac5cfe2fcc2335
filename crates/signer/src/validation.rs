//! Boundary validation for inbound messages and records.
//!
//! Every message type accepted by a [`Handlers`](crate::handlers::Handlers)
//! entry point implements [`Validate`]. Validation runs after decoding and
//! before any core logic, and reports every offending field at once rather
//! than stopping at the first.

use std::fmt;

use serde::Serialize;

use crate::{
    events::{AvailableKey, SeedDocumentsCommand, SignBatchCommand, StartSignCommand},
    model::{Document, Key, Signature},
};

/// Minimum length of a record id.
pub const MIN_ID_LENGTH: usize = 10;

/// One rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Wire name of the field, e.g. `batchSize` or `messageIds[3]`.
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl FieldError {
    /// Creates a field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every field error found while validating one value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    /// Creates an empty error list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a list holding a single error.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![FieldError::new(field, message)])
    }

    /// Records an error.
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    /// Returns `true` if no errors were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of recorded errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the recorded errors.
    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// Returns the names of the rejected fields, in the order recorded.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.field.as_str()).collect()
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    ///
    /// # Errors
    ///
    /// Returns `self` if any error was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }

    fn min_len(&mut self, field: &str, value: &str, min: usize) {
        if value.chars().count() < min {
            self.push(field, format!("must be at least {min} characters long"));
        }
    }

    fn non_empty(&mut self, field: &str, value: &str) {
        if value.is_empty() {
            self.push(field, "must not be empty");
        }
    }

    fn at_least(&mut self, field: &str, value: usize, min: usize) {
        if value < min {
            self.push(field, format!("must be at least {min}"));
        }
    }
}

impl From<Vec<FieldError>> for ValidationErrors {
    fn from(errors: Vec<FieldError>) -> Self {
        Self(errors)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Checks a decoded value against its field rules.
pub trait Validate {
    /// Returns every rule the value breaks.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] listing each offending field.
    fn validate(&self) -> Result<(), ValidationErrors>;
}

impl Validate for StartSignCommand {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.at_least("batchSize", self.batch_size, 1);
        errors.into_result()
    }
}

impl Validate for SignBatchCommand {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for (i, id) in self.message_ids.iter().enumerate() {
            errors.non_empty(&format!("messageIds[{i}]"), id);
        }
        errors.into_result()
    }
}

impl Validate for SeedDocumentsCommand {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.at_least("count", self.count, 1);
        errors.into_result()
    }
}

impl Validate for AvailableKey {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.min_len("id", &self.id, MIN_ID_LENGTH);
        errors.non_empty("private", &self.private);
        errors.into_result()
    }
}

impl Validate for Key {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.min_len("id", &self.id, MIN_ID_LENGTH);
        errors.non_empty("private", &self.private);
        errors.non_empty("public", &self.public);
        errors.into_result()
    }
}

impl Validate for Document {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.min_len("id", &self.id, MIN_ID_LENGTH);
        errors.into_result()
    }
}

impl Validate for Signature {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.non_empty("id", &self.id);
        errors.min_len("keyId", &self.key_id, MIN_ID_LENGTH);
        errors.non_empty("signature", &self.signature);
        errors.into_result()
    }
}
