// Seed selection and parameter translation

use std::time::{SystemTime, UNIX_EPOCH};

use crate::GenParams;

/// Resolve a requested seed into a concrete one.
///
/// `Some` seeds pass through unchanged (reproducible run); `None` derives a
/// seed from the wall clock at call time (non-reproducible run). The returned
/// value is what gets handed to the backend and recorded in the output
/// manifest.
pub fn resolve_seed(requested: Option<u64>) -> u64 {
    match requested {
        Some(seed) => seed,
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(0),
    }
}

/// A fully resolved request as handed to the backend.
///
/// Derived fresh for each generation call; the seed is always concrete here.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub width: u32,
    pub height: u32,
    pub steps: usize,
    pub guidance: f32,
    pub seed: u64,
    pub strength: f32,
}

impl ResolvedRequest {
    /// Translate caller parameters field-for-field.
    pub fn new(params: &GenParams, seed: u64) -> Self {
        Self {
            width: params.width,
            height: params.height,
            steps: params.steps,
            guidance: params.guidance,
            seed,
            strength: params.strength,
        }
    }

    /// Substitute the source image's dimensions wherever the caller passed 0.
    pub fn inherit_dimensions(mut self, (width, height): (u32, u32)) -> Self {
        if self.width == 0 {
            self.width = width;
        }
        if self.height == 0 {
            self.height = height;
        }
        self
    }
}
