// ============================================================
// Layer 2 — Infer Use Case
// ============================================================
// Runs a trained network densely over a whole volume:
//   1. Rebuild the network from the checkpoint directory
//   2. Read and scale the image the same way training did
//   3. One forward pass over the full volume
//   4. Write every output map to a single raw file

use anyhow::Result;
use std::path::Path;

use crate::data::io::{read_volume, write_tensor};
use crate::domain::volume::Vec3;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::inferencer::Inferencer;

/// Divisor used when neither the caller nor the saved config gives one
const DEFAULT_SCALE: f32 = 255.0;

pub struct InferUseCase {
    inferencer:  Inferencer,
    saved_scale: Option<f32>,
}

impl InferUseCase {
    pub fn new(checkpoint_dir: &str) -> Result<Self> {
        let ckpt       = CheckpointManager::new(checkpoint_dir);
        let inferencer = Inferencer::from_checkpoint(&ckpt)?;
        let saved_scale = match ckpt.load_config() {
            Ok(cfg) => Some(cfg.scale),
            Err(e) => {
                tracing::warn!("No training config found ({:#}); using default scale", e);
                None
            }
        };
        Ok(Self { inferencer, saved_scale })
    }

    /// Predict over `image` and write the maps to `out`.
    /// Returns the size of each output map.
    pub fn run(&self, image: &Path, out: &Path, scale: Option<f32>) -> Result<Vec3> {
        let scale = scale.or(self.saved_scale).unwrap_or(DEFAULT_SCALE);
        if scale.is_nan() || scale <= 0.0 {
            anyhow::bail!("scale must be positive, got {}", scale);
        }

        let mut volume = read_volume(image)?;
        volume.scale(1.0 / scale);
        tracing::info!("Predicting over '{}' ({:?})", image.display(), volume.dims());

        let maps = self.inferencer.predict(&volume)?;
        write_tensor(out, &maps)?;

        let dims = maps[0].dims();
        tracing::info!("Wrote {} map(s) of {:?} to '{}'", maps.len(), dims, out.display());
        Ok(dims)
    }
}
