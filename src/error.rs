//! Error types for the store, projections and offload sessions

use thiserror::Error;

/// Every failure the crate reports.
///
/// Errors are `Clone` so that a single failure can be both returned to the caller and
/// pushed through an accelerator's [`ErrorChannel`](crate::offload::ErrorChannel).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SoaError {
    #[error("Row index {index} out of range for column '{column}' (len {len})")]
    OutOfRange {
        column: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Cannot load empty column '{column}' onto {device}")]
    EmptyColumnLoad {
        column: &'static str,
        device: String,
    },

    #[error("Store invariants violated: {details}")]
    InvariantViolation { details: String },

    #[error("Dispatch '{kernel}' failed: {reason}")]
    DispatchFailed { kernel: String, reason: String },

    #[error("Row id {id} is not live in this store")]
    UnknownRow { id: u32 },

    #[error("Column '{column}' is referenced more than once by view {view}")]
    ColumnAliased {
        column: &'static str,
        view: &'static str,
    },

    #[error("Column '{column}' already has a device load or dispatch outstanding")]
    ColumnBusy { column: &'static str },

    #[error("Column '{column}' is not loaded on the device")]
    ColumnNotLoaded { column: &'static str },

    #[error("Device buffer for '{column}' holds {device_len} rows, host column holds {host_len}")]
    DeviceSizeMismatch {
        column: &'static str,
        device_len: usize,
        host_len: usize,
    },

    #[error("Invalid tag {tag} for tagged union {union}")]
    InvalidTag { union: &'static str, tag: u32 },

    #[error("Row id space exhausted")]
    IdSpaceExhausted,

    #[error("Device error: {0}")]
    Device(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Crate-wide result alias
pub type SoaResult<T> = Result<T, SoaError>;

/// Attach a component context to foreign errors
pub trait SoaErrorContext<T> {
    fn device_context(self, context: &str) -> SoaResult<T>;
}

impl<T, E> SoaErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn device_context(self, context: &str) -> SoaResult<T> {
        self.map_err(|e| SoaError::Device(format!("{}: {}", context, e)))
    }
}

impl<T> SoaErrorContext<T> for Option<T> {
    fn device_context(self, context: &str) -> SoaResult<T> {
        self.ok_or_else(|| SoaError::Device(context.to_string()))
    }
}

/// Create an out of range error
pub fn out_of_range(column: &'static str, index: usize, len: usize) -> SoaError {
    SoaError::OutOfRange { column, index, len }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_context_wraps_display() {
        let result: Result<(), String> = Err("adapter lost".to_string());
        let err = result.device_context("read back").unwrap_err();
        assert_eq!(err, SoaError::Device("read back: adapter lost".to_string()));
    }

    #[test]
    fn test_out_of_range_message() {
        let err = out_of_range("breadth", 4, 4);
        assert_eq!(
            err.to_string(),
            "Row index 4 out of range for column 'breadth' (len 4)"
        );
    }
}
