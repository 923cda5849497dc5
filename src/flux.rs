// Flux backend stub
// TODO: wire the real Flux pipeline (Candle UNet + VAE) behind this interface

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use image::{imageops, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::request::ResolvedRequest;
use crate::ModelBackend;

/// Optional `config.json` inside a model directory
#[derive(Debug, Clone, Deserialize)]
struct ModelConfig {
    #[serde(default = "default_model_name")]
    name: String,

    /// Output width used when a request leaves width at 0
    #[serde(default = "default_base_size")]
    base_width: u32,

    /// Output height used when a request leaves height at 0
    #[serde(default = "default_base_size")]
    base_height: u32,
}

fn default_model_name() -> String {
    "flux-klein".to_string()
}

fn default_base_size() -> u32 {
    512
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            base_width: default_base_size(),
            base_height: default_base_size(),
        }
    }
}

/// Flux backend (stub implementation).
///
/// Renders a deterministic procedural field from the resolved seed instead of
/// running the diffusion pipeline, so equal requests produce byte-identical
/// output.
#[derive(Debug)]
pub struct FluxBackend {
    model_dir: PathBuf,
    config: ModelConfig,
    mmap: bool,
}

impl FluxBackend {
    /// Directory the model was loaded from.
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Whether memory-mapped weight access was requested.
    pub fn memory_mapped(&self) -> bool {
        self.mmap
    }

    fn target_dimensions(&self, request: &ResolvedRequest) -> anyhow::Result<(u32, u32)> {
        let width = if request.width == 0 {
            self.config.base_width
        } else {
            request.width
        };
        let height = if request.height == 0 {
            self.config.base_height
        } else {
            request.height
        };
        if width == 0 || height == 0 {
            bail!("invalid output dimensions {}x{}", width, height);
        }
        Ok((width, height))
    }
}

impl ModelBackend for FluxBackend {
    fn load_dir(model_dir: &Path) -> anyhow::Result<Self> {
        if !model_dir.is_dir() {
            bail!("cannot open model directory: {}", model_dir.display());
        }

        let config_path = model_dir.join("config.json");
        let config = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("malformed {}", config_path.display()))?
        } else {
            ModelConfig::default()
        };

        tracing::info!("Loaded model '{}' from {}", config.name, model_dir.display());
        Ok(Self {
            model_dir: model_dir.to_path_buf(),
            config,
            mmap: false,
        })
    }

    fn set_mmap(&mut self, enabled: bool) {
        tracing::debug!("Memory mapping {}", if enabled { "enabled" } else { "disabled" });
        self.mmap = enabled;
    }

    fn generate(&mut self, prompt: &str, request: &ResolvedRequest) -> anyhow::Result<RgbImage> {
        tracing::warn!("Using stub implementation - generating placeholder image");
        tracing::info!("Prompt: {}", prompt);

        let (width, height) = self.target_dimensions(request)?;
        Ok(render_field(request, width, height))
    }

    fn transform(
        &mut self,
        prompt: &str,
        source: &RgbImage,
        request: &ResolvedRequest,
    ) -> anyhow::Result<RgbImage> {
        tracing::warn!("Using stub implementation - blending placeholder image");
        tracing::info!("Prompt: {}", prompt);

        let (width, height) = self.target_dimensions(request)?;
        let base = if source.dimensions() == (width, height) {
            source.clone()
        } else {
            imageops::resize(source, width, height, imageops::FilterType::Triangle)
        };

        let field = render_field(request, width, height);
        let strength = request.strength.clamp(0.0, 1.0);
        let mut output = RgbImage::new(width, height);
        for (x, y, pixel) in output.enumerate_pixels_mut() {
            let kept = base.get_pixel(x, y);
            let fresh = field.get_pixel(x, y);
            let mix = |a: u8, b: u8| (a as f32 * strength + b as f32 * (1.0 - strength)) as u8;
            *pixel = Rgb([
                mix(kept[0], fresh[0]),
                mix(kept[1], fresh[1]),
                mix(kept[2], fresh[2]),
            ]);
        }
        Ok(output)
    }
}

/// Gradient plus seeded noise, the same placeholder pattern for both
/// operations. Everything derives from the request, so equal requests render
/// equal pixels.
fn render_field(request: &ResolvedRequest, width: u32, height: u32) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(request.seed);
    let mut image = RgbImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let r = ((x as f32 / width as f32) * 255.0) as u8;
        let g = ((y as f32 / height as f32) * 255.0) as u8;
        let b = rng.gen_range(100..150);
        *pixel = Rgb([r, g, b]);
    }
    image
}
