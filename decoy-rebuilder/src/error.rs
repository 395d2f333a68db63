use thiserror::Error;

/// Failures raised while decoding or walking a captured frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unsupported link type: {0}")]
    UnsupportedLink(i32),

    #[error("{layer} header truncated: need {needed} bytes, have {available}")]
    Truncated {
        layer: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("malformed {layer} header: {reason}")]
    Malformed {
        layer: &'static str,
        reason: String,
    },
}

/// Failures of a rebuild call. Any of these aborts the whole call.
#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("rebuild worker {0} panicked")]
    WorkerPanicked(usize),
}

pub type Result<T> = std::result::Result<T, RebuildError>;

/// Shape violations of a feature-vector row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    #[error("invalid vector dimension: expected {expected}, got {got}")]
    InvalidDimension { expected: usize, got: usize },

    #[error("row {row}: invalid vector dimension: expected {expected}, got {got}")]
    InvalidRow {
        row: usize,
        expected: usize,
        got: usize,
    },
}
