//! Response schema validation.
//!
//! A [`ResponseValidator`] checks the unwrapped response payload. What happens
//! on a mismatch depends on the client's `ValidationMode`: strict fails the
//! call, lenient logs and returns the data anyway.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// Checks a response payload against an expected shape.
pub trait ResponseValidator: Send + Sync {
    /// `Ok` if `value` has the expected shape, else a human-readable reason.
    ///
    /// # Errors
    ///
    /// Returns the mismatch description.
    fn validate(&self, value: &Value) -> Result<(), String>;

    /// Name used in logs and errors.
    fn name(&self) -> &str {
        "response"
    }
}

/// Validates that the payload deserializes into `T`.
///
/// # Example
///
/// ```
/// use concord_rpc::schema::{ResponseValidator, TypedSchema};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Invoice { id: String, amount_cents: u64 }
///
/// let schema = TypedSchema::<Invoice>::new();
/// assert!(schema.validate(&serde_json::json!({"id": "inv_1", "amount_cents": 500})).is_ok());
/// assert!(schema.validate(&serde_json::json!({"id": "inv_1"})).is_err());
/// ```
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    /// Schema for `T`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedSchema<{}>", std::any::type_name::<T>())
    }
}

impl<T: DeserializeOwned> ResponseValidator for TypedSchema<T> {
    fn validate(&self, value: &Value) -> Result<(), String> {
        T::deserialize(value).map(|_| ()).map_err(|e| e.to_string())
    }

    fn name(&self) -> &str {
        std::any::type_name::<T>()
    }
}

/// Validator backed by a closure.
pub struct FnValidator<F> {
    name: String,
    check: F,
}

impl<F> ResponseValidator for FnValidator<F>
where
    F: Fn(&Value) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<(), String> {
        (self.check)(value)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap `check` as a named validator.
///
/// ```
/// use concord_rpc::schema::{ResponseValidator, validator_fn};
///
/// let has_id = validator_fn("has_id", |v| {
///     v.get("id").map(|_| ()).ok_or_else(|| "missing id".to_string())
/// });
/// assert!(has_id.validate(&serde_json::json!({"id": 1})).is_ok());
/// ```
pub fn validator_fn<F>(name: impl Into<String>, check: F) -> FnValidator<F>
where
    F: Fn(&Value) -> Result<(), String> + Send + Sync,
{
    FnValidator {
        name: name.into(),
        check,
    }
}
