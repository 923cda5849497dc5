// Error types for fluxgen

use thiserror::Error;

/// Result type for fluxgen operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// The two generation call shapes. Status ordinals are positional within a
/// call shape, not shared across them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Txt2Img,
    Img2Img,
}

/// Errors that can occur while driving a generation engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// The backend could not load a model from the given directory. The text
    /// is the backend's own failure message.
    #[error("{0}")]
    ModelLoad(String),

    /// A required argument was empty.
    #[error("bad args")]
    BadArgs,

    /// The backend failed to render from a text prompt. The text is the
    /// backend's own failure message.
    #[error("{0}")]
    Generation(String),

    /// The backend failed to re-render the source image. The text is the
    /// backend's own failure message.
    #[error("{0}")]
    Transform(String),

    /// The source image for image-to-image could not be read.
    #[error("failed to load input image")]
    LoadInput(#[source] image::ImageError),

    /// The generated image could not be persisted.
    #[error("failed to save output")]
    SaveOutput {
        op: Op,
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    /// Stable status ordinal for this error.
    ///
    /// Text-to-image: 2 bad args, 3 generation failed, 4 save failed.
    /// Image-to-image: 2 bad args, 3 input load failed, 4 transform failed,
    /// 5 save failed. Model-load failures report 1: the caller is left
    /// without a usable engine. 0 is never returned; successful calls carry
    /// no error.
    pub fn status(&self) -> u32 {
        match self {
            EngineError::ModelLoad(_) => 1,
            EngineError::BadArgs => 2,
            EngineError::Generation(_) => 3,
            EngineError::LoadInput(_) => 3,
            EngineError::Transform(_) => 4,
            EngineError::SaveOutput { op: Op::Txt2Img, .. } => 4,
            EngineError::SaveOutput { op: Op::Img2Img, .. } => 5,
        }
    }
}
