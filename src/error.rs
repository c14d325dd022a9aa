/// Convenience result type used across Lapse.
pub type LapseResult<T> = Result<T, LapseError>;

/// Top-level error taxonomy used by pipeline APIs.
#[derive(thiserror::Error, Debug)]
pub enum LapseError {
    /// Invalid user-provided export or composition parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A still could not be decoded, scaled, or stamped.
    #[error("composition failed: {0}")]
    Composition(String),

    /// Frame buffer memory could not be obtained. Always fatal.
    #[error("frame buffer allocation failed: {0}")]
    Allocation(String),

    /// The encode destination could not be opened for writing.
    #[error("writer start failed: {0}")]
    WriterStart(String),

    /// A frame was appended out of contract (busy writer, non-increasing
    /// presentation time, or a terminal session).
    #[error("invalid append order: {0}")]
    AppendOrder(String),

    /// The encoder rejected frames or failed to finalize the file.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LapseError {
    /// Build a [`LapseError::InvalidRequest`] value.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Build a [`LapseError::Composition`] value.
    pub fn composition(msg: impl Into<String>) -> Self {
        Self::Composition(msg.into())
    }

    /// Build a [`LapseError::Allocation`] value.
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    /// Build a [`LapseError::WriterStart`] value.
    pub fn writer_start(msg: impl Into<String>) -> Self {
        Self::WriterStart(msg.into())
    }

    /// Build a [`LapseError::AppendOrder`] value.
    pub fn append_order(msg: impl Into<String>) -> Self {
        Self::AppendOrder(msg.into())
    }

    /// Build a [`LapseError::Encode`] value.
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}
