//! Error types for the segmentation core

use thiserror::Error;

/// Errors raised by feature building, scaling, clustering and scoring
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SegmentError {
    /// No transaction survived validation
    #[error("No valid transactions to build features from ({dropped} rows dropped)")]
    EmptyInput { dropped: usize },

    /// Requested cluster count cannot be satisfied by the data
    #[error("Number of clusters ({k}) must be between 1 and the number of distinct points ({distinct})")]
    InvalidClusterCount { k: usize, distinct: usize },

    /// Invalid clustering or sweep parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Matrix, vector or label shape does not match what it is paired with
    #[error("Dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Quality metric is not defined for the given partition
    #[error("Metric undefined: {0}")]
    UndefinedMetric(String),
}
