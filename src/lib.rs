// fluxgen - Persistent image generation engine
// Facade over swappable diffusion backends; ships a placeholder Flux backend

mod engine;
mod flux;
mod request;

pub mod error;

pub use engine::{Engine, Generation};
pub use error::{EngineError, Op, Result};
pub use flux::FluxBackend;
pub use request::{resolve_seed, ResolvedRequest};

use std::path::Path;

use anyhow::Context;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Parameters for one generation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenParams {
    /// Width of the generated image in pixels (0 inherits the source image
    /// for image-to-image; text-to-image leaves 0 to the backend)
    pub width: u32,

    /// Height of the generated image, same 0 convention as `width`
    pub height: u32,

    /// Number of denoising steps
    pub steps: usize,

    /// Classifier-free guidance scale
    pub guidance: f32,

    /// Seed for reproducibility (None for a time-derived seed)
    pub seed: Option<u64>,

    /// How strongly the source image constrains the output (image-to-image only)
    pub strength: f32,
}

impl Default for GenParams {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            steps: 20,
            guidance: 7.5,
            seed: None,
            strength: 0.75,
        }
    }
}

/// A generated image together with the inputs that produced it
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    /// Pixel data
    pub image: RgbImage,

    /// Concrete seed the image was rendered with
    pub seed: u64,

    /// Prompt used to generate the image
    pub prompt: String,
}

/// Sidecar record written next to every saved output so a file can be traced
/// back to the seed that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputManifest {
    pub seed: u64,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
}

impl GeneratedImage {
    /// Save the image and a `<path>.json` manifest carrying the seed.
    pub fn save_with_seed(&self, path: &Path) -> anyhow::Result<()> {
        self.image
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;

        let manifest = OutputManifest {
            seed: self.seed,
            prompt: self.prompt.clone(),
            width: self.image.width(),
            height: self.image.height(),
        };
        let sidecar = path.with_extension("json");
        std::fs::write(&sidecar, serde_json::to_string_pretty(&manifest)?)
            .with_context(|| format!("failed to write {}", sidecar.display()))?;

        Ok(())
    }
}

/// Trait for diffusion model backends.
///
/// A value of the implementing type is one loaded model session; dropping it
/// releases the session. All methods are synchronous and may block for the
/// duration of inference.
pub trait ModelBackend: Sized {
    /// Load a model from a local directory.
    fn load_dir(model_dir: &Path) -> anyhow::Result<Self>;

    /// Toggle memory-mapped weight access. Backends that cannot honor the
    /// request ignore it.
    fn set_mmap(&mut self, enabled: bool);

    /// Render an image from a text prompt.
    fn generate(&mut self, prompt: &str, request: &ResolvedRequest) -> anyhow::Result<RgbImage>;

    /// Re-render a source image under a text prompt.
    fn transform(
        &mut self,
        prompt: &str,
        source: &RgbImage,
        request: &ResolvedRequest,
    ) -> anyhow::Result<RgbImage>;
}
