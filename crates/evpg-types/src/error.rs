//! Parameter encoding error types.

use thiserror::Error;

/// Errors that can occur when exposing encoded parameters to the wire layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamError {
    /// A value is longer than the protocol's signed 32-bit length field.
    #[error("parameter {index} is too large: {length} bytes (max {max})")]
    ValueTooLarge {
        /// Position of the parameter in the set.
        index: usize,
        /// Actual value length in bytes.
        length: usize,
        /// Maximum representable length.
        max: usize,
    },

    /// The set holds more parameters than the protocol can address.
    #[error("too many parameters: {count} (max {max})")]
    TooManyParameters {
        /// Number of parameters in the set.
        count: usize,
        /// Maximum number of parameters.
        max: usize,
    },
}
