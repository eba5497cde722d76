//! Error taxonomy for the transformation core.
//!
//! Every failure raised by mapping resolution, the editor stages, the
//! serializers, the aggregate report, and the storage/persistence adapters is
//! a [`PipelineError`]. Command handlers wrap these in `anyhow` with context.

use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or contradictory column mapping or customer configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Concern check or final-frame validation failed. `details` holds one
    /// line per problem found.
    #[error("Customer: {customer}\n{}", details.join("\n"))]
    Validation {
        customer: String,
        details: Vec<String>,
    },

    #[error("Column '{column}': cannot cast '{value}' to {dtype}")]
    Cast {
        column: String,
        value: String,
        dtype: String,
    },

    #[error("Column '{column}': invalid date value '{value}'")]
    InvalidDate { column: String, value: String },

    #[error("Column '{column}': invalid time value '{value}'")]
    InvalidTime { column: String, value: String },

    #[error("Row index {index} out of range for frame with {rows} row(s)")]
    RowOutOfRange { index: usize, rows: usize },

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Expected column '{0}' not found")]
    MissingColumn(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Blob '{0}' not found")]
    BlobNotFound(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn validation(customer: impl Into<String>, details: Vec<String>) -> Self {
        PipelineError::Validation {
            customer: customer.into(),
            details,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, PipelineError::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_detail_on_its_own_line() {
        let err = PipelineError::validation(
            "acme",
            vec!["first problem".to_string(), "second problem".to_string()],
        );
        assert_eq!(err.to_string(), "Customer: acme\nfirst problem\nsecond problem");
        assert!(err.is_validation());
    }
}
