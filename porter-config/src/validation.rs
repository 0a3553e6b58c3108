// Configuration validation

use crate::{ConfigError, Result};
use std::fmt::Display;

/// Implemented by settings structs that check their own invariants.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable validation rules.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    pub fn in_range<T: PartialOrd + Display>(value: T, min: T, max: T, field: &str) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {} (got {})",
                field, min, max, value
            )));
        }
        Ok(())
    }

    pub fn at_least<T: PartialOrd + Display>(value: T, min: T, field: &str) -> Result<()> {
        if value < min {
            return Err(ConfigError::ValidationError(format!(
                "{} must be at least {} (got {})",
                field, min, value
            )));
        }
        Ok(())
    }

    pub fn is_postgres_url(value: &str, field: &str) -> Result<()> {
        if !value.starts_with("postgres://") && !value.starts_with("postgresql://") {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a postgres:// connection string",
                field
            )));
        }
        Ok(())
    }
}
