//! Error types for model construction and the forward pass.

use thiserror::Error;

/// Result type alias for coregpt operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Invalid hyperparameter combination, detected before any parameter is
/// allocated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A size field that must be positive was zero.
    #[error("`{0}` must be greater than zero")]
    ZeroSized(&'static str),

    /// Embedding width cannot be split evenly across heads.
    #[error("hidden_size ({hidden_size}) must be divisible by n_head ({n_head})")]
    HeadsDoNotDivide { hidden_size: usize, n_head: usize },

    /// Dropout probability outside `[0, 1)`.
    #[error("dropout must be in [0, 1), got {0}")]
    DropoutOutOfRange(f32),

    /// Normalization epsilon that is not a positive finite number.
    #[error("layer_norm_epsilon must be positive and finite, got {0}")]
    InvalidEpsilon(f32),
}

/// Input that does not satisfy a forward-pass shape contract.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeError {
    /// The token batch has no rows or its rows are empty.
    #[error("token batch must contain at least one non-empty sequence")]
    EmptyBatch,

    /// Rows of the token batch have different lengths.
    #[error("ragged token batch: row {row} has length {found}, expected {expected}")]
    RaggedBatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// Sequence is longer than the model context.
    #[error("sequence length {seq_len} exceeds block_size {block_size}")]
    SequenceTooLong { seq_len: usize, block_size: usize },

    /// Token id outside `[0, vocab_size)`.
    #[error("token id {token} at [{row}, {position}] is out of range for vocab_size {vocab_size}")]
    TokenOutOfRange {
        token: usize,
        row: usize,
        position: usize,
        vocab_size: usize,
    },

    /// Activation tensor of the wrong rank reached a layer.
    #[error("{layer}: expected a rank-{expected} input, got shape {found:?}")]
    Rank {
        layer: &'static str,
        expected: usize,
        found: Vec<usize>,
    },

    /// Activation's last dimension does not match the layer's input width.
    #[error("{layer}: expected {expected} input features, got {found}")]
    FeatureMismatch {
        layer: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Crate-level error.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    /// State dict names a parameter the model does not have.
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    /// State dict lacks a parameter the model has.
    #[error("missing parameter `{0}`")]
    MissingParameter(String),

    /// State dict entry has a different shape than the model parameter.
    #[error("parameter `{name}` has shape {found:?}, expected {expected:?}")]
    ParameterShape {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
