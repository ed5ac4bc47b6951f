//! Error types for the simulation framework

use thiserror::Error;

use crate::validate::ValidationError;

/// Top-level error type for simulation operations
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ValidationError),

    #[error("Distribution error: {0}")]
    Distribution(#[from] DistributionError),

    #[error("Component not found with ID: {id}")]
    ComponentNotFound { id: String },
}

/// Rejected parameters for a bounded random variable.
///
/// These are setup-time errors: a variable is never constructed from them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DistributionError {
    #[error("lower bound {low} exceeds upper bound {high}")]
    InvertedBounds { low: f64, high: f64 },

    #[error("Pareto shape must not be 1.0 (got {shape})")]
    ParetoShapeOne { shape: f64 },

    #[error("invalid value for '{name}': {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}
