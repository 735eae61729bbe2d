use thiserror::Error;

/// Main error type for the validation sweep
#[derive(Error, Debug)]
pub enum AvError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Sweep error: {0}")]
    Sweep(#[from] SweepError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Data-related errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Data source not found: {0}")]
    SourceNotFound(String),

    #[error("Required column missing: {column}")]
    MissingColumn { column: String },

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("Data parsing error: {message}")]
    ParseError { message: String },

    #[error(
        "Empty window for target {target} with lookback {lookback}: {train_rows} train rows, {test_rows} test rows"
    )]
    EmptyWindow {
        target: String,
        lookback: u32,
        train_rows: usize,
        test_rows: usize,
    },
}

/// Checkpoint log errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint storage unavailable at {path}: {message}")]
    StorageUnavailable { path: String, message: String },

    #[error("Unknown configuration family {family:?} in checkpoint record at line {line}")]
    UnknownFamily { family: String, line: usize },

    #[error("Checkpoint append failed: {message}")]
    WriteFailed { message: String },
}

/// Errors surfaced by the fit/predict capability
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model fitting failed: {message}")]
    Fitting { message: String },

    #[error("Feature dimension mismatch: model expects {expected}, sample has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Sweep driver errors
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Model returned no predictions for {config}")]
    MissingPredictions { config: String },

    #[error("Unknown configuration family: {name}")]
    UnknownFamily { name: String },

    #[error("Invalid search axes: {message}")]
    InvalidAxes { message: String },

    #[error("Sweep worker panicked: {message}")]
    WorkerPanicked { message: String },
}

/// Result type alias for sweep operations
pub type AvResult<T> = Result<T, AvError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::AvError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::AvError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::AvError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DataError::EmptyWindow {
            target: "2007-04".to_string(),
            lookback: 3,
            train_rows: 0,
            test_rows: 4,
        };

        assert!(error.to_string().contains("2007-04"));
        assert!(error.to_string().contains("lookback 3"));
        assert!(error.to_string().contains("0 train rows"));
    }

    #[test]
    fn test_error_conversion() {
        let sweep_error = SweepError::MissingPredictions {
            config: "en lookback=1".to_string(),
        };
        let av_error: AvError = sweep_error.into();

        match av_error {
            AvError::Sweep(SweepError::MissingPredictions { .. }) => (),
            _ => panic!("Expected Sweep error"),
        }
    }

    #[test]
    fn test_macros() {
        let validation_err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation_err, AvError::Validation(_)));
        let _internal_err = internal_error!("Something went wrong");
        let config_err = config_error!("Missing required field: {}", "target");
        assert!(config_err.to_string().contains("target"));
    }
}
