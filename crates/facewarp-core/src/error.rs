use thiserror::Error;

/// Geometric validation failures. Neither kind is retried; the caller has
/// to supply better input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignError {
    /// Too few correspondences, or correspondences that do not determine a
    /// unique similarity transform.
    #[error("degenerate configuration: {0}")]
    DegenerateConfiguration(String),
    /// Output raster or template geometry that cannot be realised.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
}

impl AlignError {
    pub(crate) fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateConfiguration(msg.into())
    }

    pub(crate) fn geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }
}
