// ============================================================
// Layer 5 — Inferencer
// ============================================================
use anyhow::{bail, Result};

use crate::domain::volume::Volume;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::model::{tensor_to_volumes, volume_to_tensor, ConvNet};
use crate::ml::InferBackend;

pub struct Inferencer {
    model:  ConvNet<InferBackend>,
    device: <InferBackend as burn::tensor::backend::Backend>::Device,
}

impl Inferencer {
    pub fn from_checkpoint(ckpt_manager: &CheckpointManager) -> Result<Self> {
        let device = Default::default();
        let spec   = ckpt_manager.load_spec()?;
        let model: ConvNet<InferBackend> = spec.init(&device);
        let model  = ckpt_manager.load_model(model, &device)?;
        tracing::info!("Model loaded from checkpoint, fov {:?}", model.fov());
        Ok(Self { model, device })
    }

    /// Dense prediction over a whole volume.
    /// Output maps are `volume - fov + 1` along each axis: voxels closer
    /// than half a field of view to the border get no prediction.
    pub fn predict(&self, volume: &Volume<f32>) -> Result<Vec<Volume<f32>>> {
        let fov  = self.model.fov();
        let dims = volume.dims();
        if (0..3).any(|a| dims[a] < fov[a]) {
            bail!("volume {:?} is smaller than the field of view {:?}", dims, fov);
        }

        let output = self.model.forward(volume_to_tensor(volume, &self.device));
        let maps   = tensor_to_volumes(output)?;
        tracing::debug!("Predicted {} map(s) of {:?}", maps.len(), maps[0].dims());
        Ok(maps)
    }
}
