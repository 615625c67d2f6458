//! Error taxonomy for pens, scene building and tile decoding

/// Constructing a pen from scene data failed.
///
/// This signals corrupted input from the scene provider and fails the whole
/// document open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PenError {
    #[error("unknown pen number: {pen_number}")]
    UnknownPen { pen_number: u32 },

    #[error("unknown color id: {color_id}")]
    UnknownColor { color_id: u32 },
}

/// Building a page's layer tree failed
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("failed to build scene tree: {reason}")]
    FailedToBuildTree { reason: String },

    #[error("page not found: {page_id}")]
    NotFound { page_id: String },

    #[error("pen construction: {0}")]
    Pen(#[from] PenError),
}

impl SceneError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::FailedToBuildTree {
            reason: reason.into(),
        }
    }

    /// Whether the failure poisons every page of the document, not just this one
    #[must_use]
    pub fn is_document_fatal(&self) -> bool {
        matches!(self, Self::Pen(_))
    }
}

/// Turning a provider pixel buffer into a raster failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TileError {
    #[error("pixel buffer has {actual} bytes, expected {expected}")]
    Decode { expected: usize, actual: usize },
}
