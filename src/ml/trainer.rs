// ============================================================
// Layer 5 — Burn-backed Network
// ============================================================
// Implements the domain `Network` trait on top of a burn
// ConvNet and an SGD optimiser.
//
// The training loop computes its own cost and gradient on the
// host, so backward is driven by an external gradient G rather
// than a loss tensor. Back-propagating the surrogate
//
//     S = Σ output ⊙ G          (G held constant)
//
// gives dS/dθ = Σ G · d(output)/dθ, which is exactly the chain
// rule applied to the incoming gradient. One optimiser step
// follows every backward call.
//
// Key Burn insight:
//   - optim.step() consumes the model and returns the updated one
//   - the output tensor of forward() must be kept alive until
//     backward() so its autodiff graph is still available
//
// Reference: Burn Book §5 (Custom Training Loop)

use anyhow::{bail, Result};
use burn::{
    optim::{
        adaptor::OptimizerAdaptor, momentum::MomentumConfig, GradientsParams, Optimizer, Sgd,
        SgdConfig,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::domain::traits::Network;
use crate::domain::volume::{Vec3, Volume};
use crate::ml::model::{tensor_to_volumes, volume_to_tensor, volumes_to_tensor, ConvNet};
use crate::ml::spec::NetSpec;

type SgdOptim<B> = OptimizerAdaptor<Sgd<<B as AutodiffBackend>::InnerBackend>, ConvNet<B>, B>;

fn sgd<B: AutodiffBackend>(momentum: f64) -> SgdOptim<B> {
    let cfg = if momentum > 0.0 {
        SgdConfig::new().with_momentum(Some(
            MomentumConfig::new().with_momentum(momentum).with_dampening(0.0),
        ))
    } else {
        SgdConfig::new()
    };
    cfg.init()
}

/// Size the rayon pool the CPU backend runs its kernels on.
/// Only the first call in a process takes effect.
pub fn init_thread_pool(num_threads: usize) {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
    {
        Ok(()) => tracing::info!("Compute pool: {} threads", num_threads),
        Err(e) => tracing::warn!("Compute pool already initialised: {}", e),
    }
}

pub struct BurnNetwork<B: AutodiffBackend> {
    model:    ConvNet<B>,
    optim:    SgdOptim<B>,
    spec:     NetSpec,
    outsz:    Vec3,
    eta:      f64,
    /// Output of the last forward pass, awaiting its gradient
    pending:  Option<Tensor<B, 5>>,
    device:   B::Device,
}

impl<B: AutodiffBackend> BurnNetwork<B> {
    pub fn new(spec: NetSpec, outsz: Vec3, device: B::Device) -> Self {
        let model = spec.init::<B>(&device);
        tracing::info!(
            "Network ready: {} stages, fov {:?}, {} output maps",
            spec.stages.len(),
            model.fov(),
            spec.output_maps
        );
        Self {
            model,
            optim: sgd::<B>(0.0),
            spec,
            outsz,
            eta: 0.01,
            pending: None,
            device,
        }
    }

    pub fn model(&self) -> &ConvNet<B> {
        &self.model
    }

    /// Swap in weights restored from a checkpoint
    pub fn set_model(&mut self, model: ConvNet<B>) {
        self.model = model;
        self.pending = None;
    }
}

impl<B: AutodiffBackend> Network for BurnNetwork<B> {
    fn fov(&self) -> Vec3 {
        self.model.fov()
    }

    fn output_size(&self) -> Vec3 {
        self.outsz
    }

    fn forward(&mut self, input: &Volume<f32>) -> Result<Vec<Volume<f32>>> {
        let insz = self.spec.input_size(self.outsz);
        if input.dims() != insz {
            bail!(
                "input patch is {:?}; this network needs {:?} for output {:?}",
                input.dims(),
                insz,
                self.outsz
            );
        }

        let output = self.model.forward(volume_to_tensor::<B>(input, &self.device));
        self.pending = Some(output.clone());
        tensor_to_volumes(output)
    }

    fn backward(&mut self, grads: &[Volume<f32>]) -> Result<()> {
        let Some(output) = self.pending.take() else {
            bail!("backward called without a preceding forward pass");
        };
        if grads.len() != self.spec.output_maps {
            bail!(
                "got {} gradient maps for {} output maps",
                grads.len(),
                self.spec.output_maps
            );
        }
        if grads.iter().any(|g| g.dims() != self.outsz) {
            bail!("gradient maps must be {:?}", self.outsz);
        }

        // G is built from plain data, so it is not part of the graph
        let g = volumes_to_tensor::<B>(grads, &self.device)?;
        let surrogate = (output * g).sum();
        let grads = GradientsParams::from_grads(surrogate.backward(), &self.model);
        self.model = self.optim.step(self.eta, self.model.clone(), grads);
        Ok(())
    }

    fn set_eta(&mut self, eta: f64) {
        self.eta = eta;
    }

    /// Rebuilding the optimiser discards accumulated velocity
    fn set_momentum(&mut self, momentum: f64) {
        tracing::debug!("SGD momentum set to {}", momentum);
        self.optim = sgd::<B>(momentum);
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    // One 1x1x1 conv into a logistic output, all weights zero,
    // so the first prediction is exactly 0.5 everywhere.
    const TINY: &str = "
        [input]
        type=input
        size=1
        [conv]
        type=conv
        size=1,1,1
        init=constant
        input=input
        output=output
        [output]
        type=transfer
        function=logistic
        size=1
    ";

    fn tiny(outsz: Vec3) -> BurnNetwork<TestBackend> {
        let spec = NetSpec::parse(TINY).unwrap();
        BurnNetwork::new(spec, outsz, Default::default())
    }

    #[test]
    fn test_forward_returns_one_map_per_output() {
        let mut net = tiny([1, 2, 2]);
        let out = net.forward(&Volume::new([1, 2, 2], 1.0)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].dims(), [1, 2, 2]);
        assert!(out[0].as_slice().iter().all(|&p| (p - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_forward_rejects_wrong_patch_size() {
        let mut net = tiny([1, 2, 2]);
        assert!(net.forward(&Volume::new([1, 3, 3], 1.0)).is_err());
    }

    #[test]
    fn test_backward_needs_forward() {
        let mut net = tiny([1, 1, 1]);
        assert!(net.backward(&[Volume::new([1, 1, 1], 0.0)]).is_err());
    }

    #[test]
    fn test_backward_rejects_wrong_gradient_count() {
        let mut net = tiny([1, 1, 1]);
        net.forward(&Volume::new([1, 1, 1], 1.0)).unwrap();
        assert!(net.backward(&[]).is_err());
    }

    #[test]
    fn test_sgd_moves_prediction_towards_target() {
        let mut net = tiny([1, 2, 2]);
        net.set_eta(0.5);
        net.set_momentum(0.9);
        let input = Volume::new([1, 2, 2], 1.0f32);

        let first = net.forward(&input).unwrap()[0].sum();
        for _ in 0..10 {
            let props = net.forward(&input).unwrap();
            // target is all ones: gradient = p - 1
            let grads: Vec<_> = props.iter().map(|p| p.map(|v| v - 1.0)).collect();
            net.backward(&grads).unwrap();
        }
        let last = net.forward(&input).unwrap()[0].sum();
        assert!(last > first, "prediction did not move: {first} -> {last}");
    }
}
