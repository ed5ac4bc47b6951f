//! Validation helpers shared by the configuration containers
//!
//! Configuration structs implement [`Validate`] by composing these helpers, so a
//! bad value is reported with the offending field name before any model is built.

/// Validation result for configuration checks
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Errors that can occur while validating configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Field '{field}' must be {constraint}")]
    ConstraintViolation { field: String, constraint: String },

    #[error("Malformed configuration document: {0}")]
    Malformed(String),
}

/// Trait for validating configuration values
pub trait Validate {
    /// Check that all field values are valid and consistent with each other.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` naming the first offending field.
    fn validate(&self) -> ValidationResult<()>;
}

/// Helper for validating numeric ranges
pub fn validate_range<T: PartialOrd + std::fmt::Display>(
    field: &str,
    value: T,
    min: T,
    max: T,
) -> ValidationResult<()> {
    if value < min || value > max {
        Err(ValidationError::ConstraintViolation {
            field: field.to_string(),
            constraint: format!("between {min} and {max}"),
        })
    } else {
        Ok(())
    }
}

/// Helper for validating that a value is positive
pub fn validate_positive<T: PartialOrd + Default + std::fmt::Display>(
    field: &str,
    value: T,
) -> ValidationResult<()> {
    if value <= T::default() {
        Err(ValidationError::ConstraintViolation {
            field: field.to_string(),
            constraint: "positive".to_string(),
        })
    } else {
        Ok(())
    }
}

/// Helper for validating that a value is non-negative
pub fn validate_non_negative<T: PartialOrd + Default + std::fmt::Display>(
    field: &str,
    value: T,
) -> ValidationResult<()> {
    if value < T::default() {
        Err(ValidationError::ConstraintViolation {
            field: field.to_string(),
            constraint: "non-negative".to_string(),
        })
    } else {
        Ok(())
    }
}

/// Helper for validating that `low <= high` for a pair of bound fields
pub fn validate_ordered<T: PartialOrd + std::fmt::Display>(
    low_field: &str,
    low: T,
    high_field: &str,
    high: T,
) -> ValidationResult<()> {
    if low > high {
        Err(ValidationError::ConstraintViolation {
            field: low_field.to_string(),
            constraint: format!("at most '{high_field}' ({high}), got {low}"),
        })
    } else {
        Ok(())
    }
}

/// Helper for rejecting a Pareto shape of exactly one, where the mean is undefined
pub fn validate_pareto_shape(field: &str, shape: f64) -> ValidationResult<()> {
    validate_positive(field, shape)?;
    if (shape - 1.0).abs() < f64::EPSILON {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: "Pareto shape must not be 1.0".to_string(),
        });
    }
    Ok(())
}
