// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores network weights using Burn's CompactRecorder.
//
// What gets saved:
//   1. Model weights (.mpk.gz file) — all learned parameters
//   2. latest_iteration.json        — which iteration was last saved
//   3. train_config.json            — hyper-parameters of the run
//   4. net_spec.json                — the parsed network description
//
// Why save the network description?
//   Inference must rebuild the exact same chain of stages before
//   the weights can be loaded into it. Keeping the parsed spec in
//   the checkpoint directory means the original option file is not
//   needed at inference time.
//
// File naming convention:
//   checkpoints/
//     model_iter_10000.mpk.gz
//     model_iter_20000.mpk.gz
//     latest_iteration.json
//     train_config.json
//     net_spec.json
//
// Reference: Burn Book §5 (Records and Checkpointing)
//            Rust Book §9 (Error Handling)

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use std::{
    fs,
    path::PathBuf,
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::model::ConvNet;
use crate::ml::spec::NetSpec;

/// Manages saving and loading of model checkpoints.
/// All files are stored in the configured directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create a new CheckpointManager.
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        fs::create_dir_all(&dir).ok();
        Self { dir }
    }

    /// Save model weights for a given iteration and move the
    /// latest-iteration pointer to it.
    pub fn save_model<B: Backend>(&self, model: &ConvNet<B>, iteration: usize) -> Result<()> {
        // Recorder adds the extension
        let path = self.dir.join(format!("model_iter_{iteration}"));

        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        let latest_path = self.dir.join("latest_iteration.json");
        fs::write(&latest_path, serde_json::to_string(&iteration)?)
            .with_context(|| "Failed to write latest_iteration.json")?;

        tracing::debug!("Saved checkpoint: iteration {}", iteration);
        Ok(())
    }

    /// Load weights from the latest saved checkpoint into `model`.
    /// The model must have been built from the same network spec.
    pub fn load_model<B: Backend>(&self, model: ConvNet<B>, device: &B::Device) -> Result<ConvNet<B>> {
        let iteration = self.latest_iteration()?;
        let path = self.dir.join(format!("model_iter_{iteration}"));

        tracing::info!("Loading checkpoint from iteration {}", iteration);

        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!(
                    "Cannot load checkpoint '{}'. Was it written by the same network spec?",
                    path.display()
                )
            })?;

        Ok(model.load_record(record))
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        self.write_json("train_config.json", cfg)
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        self.read_json("train_config.json")
    }

    pub fn save_spec(&self, spec: &NetSpec) -> Result<()> {
        self.write_json("net_spec.json", spec)
    }

    pub fn load_spec(&self) -> Result<NetSpec> {
        self.read_json("net_spec.json")
    }

    /// Iteration number of the most recent checkpoint.
    /// Errors if nothing has been saved yet.
    pub fn latest_iteration(&self) -> Result<usize> {
        let path = self.dir.join("latest_iteration.json");
        let s = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot find '{}'. Have you run 'train' first?",
                path.display()
            )
        })?;
        Ok(serde_json::from_str::<usize>(&s)?)
    }

    fn write_json<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).with_context(|| format!("Cannot write '{}'", path.display()))?;
        tracing::debug!("Saved '{}'", path.display());
        Ok(())
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read '{}'. Make sure you have run 'train' with this checkpoint directory.",
                path.display()
            )
        })?;
        serde_json::from_str(&json).with_context(|| format!("'{}' is malformed", path.display()))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    const NET: &str = "
        [input]
        type=input
        size=1
        [conv]
        type=conv
        size=1,3,3
        input=input
        output=output
        [output]
        type=transfer
        function=logistic
        size=3
    ";

    #[test]
    fn test_no_checkpoint_yet() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path());
        assert!(ckpt.latest_iteration().is_err());
        assert!(ckpt.load_spec().is_err());
    }

    #[test]
    fn test_latest_pointer_follows_saves() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path());
        let device = Default::default();
        let model: ConvNet<TestBackend> = NetSpec::parse(NET).unwrap().init(&device);

        ckpt.save_model(&model, 10).unwrap();
        ckpt.save_model(&model, 20).unwrap();
        assert_eq!(ckpt.latest_iteration().unwrap(), 20);
    }

    #[test]
    fn test_weights_reload_into_fresh_model() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path());
        let device = Default::default();
        let spec = NetSpec::parse(NET).unwrap();
        ckpt.save_spec(&spec).unwrap();

        let trained: ConvNet<TestBackend> = spec.init(&device);
        ckpt.save_model(&trained, 1).unwrap();

        let fresh: ConvNet<TestBackend> = ckpt.load_spec().unwrap().init(&device);
        let restored = ckpt.load_model(fresh, &device).unwrap();

        let input = Tensor::<TestBackend, 5>::ones([1, 1, 1, 4, 4], &device);
        let a = trained.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let b = restored.forward(input).into_data().to_vec::<f32>().unwrap();
        // CompactRecorder stores half precision
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-2);
        }
    }
}
