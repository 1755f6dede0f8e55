//! Custom error types for variant calling operations.

use thiserror::Error;

/// Result type alias for vardict operations
pub type Result<T> = std::result::Result<T, VardictError>;

/// Error type for vardict operations
#[derive(Error, Debug)]
pub enum VardictError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// Invalid frequency threshold
    #[error("Invalid frequency threshold: {value} (must be between {min} and {max})")]
    InvalidFrequency {
        /// The invalid frequency value
        value: f64,
        /// Minimum valid value
        min: f64,
        /// Maximum valid value
        max: f64,
    },

    /// File format error
    #[error("Invalid {file_type} file '{path}': {reason}")]
    InvalidFileFormat {
        /// Type of file (e.g., "BAM", "BED")
        file_type: String,
        /// Path to the file
        path: String,
        /// Explanation of the problem
        reason: String,
    },

    /// Required reference sequence not found
    #[error("Reference sequence '{ref_name}' not found")]
    ReferenceNotFound {
        /// The reference sequence name
        ref_name: String,
    },

    /// A region string or BED row could not be parsed
    #[error("Invalid region '{region}': {reason}")]
    InvalidRegion {
        /// The offending region text
        region: String,
        /// Explanation of the problem
        reason: String,
    },

    /// An allele descriptor string does not follow the descriptor grammar
    #[error("Invalid allele descriptor '{descriptor}': {reason}")]
    InvalidDescriptor {
        /// The offending descriptor text
        descriptor: String,
        /// Explanation of the problem
        reason: String,
    },
}
