// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Load image and label volumes   (Layer 4 - data)
//   Step 2: Parse the network description  (Layer 5 - ml)
//   Step 3: Build the network              (Layer 5 - ml)
//   Step 4: Set learning rate / momentum   (Layer 5 - ml)
//   Step 5: Save config, restore weights   (Layer 6 - infra)
//   Step 6: Run the sample → forward → cost → backward loop
//
// The loop itself only sees the `Network` trait, so it can be
// driven by a test double as easily as by the burn network.
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use anyhow::{bail, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::data::{
    io::{read_segmentation, read_volume},
    sampler::{SampleMode, Sampler},
};
use crate::domain::traits::Network;
use crate::domain::volume::{format_size, voxel_count, Vec3};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{IntervalMetrics, MetricsLogger},
    snapshot::{SnapshotFrame, SnapshotWriter},
};
use crate::ml::cost::{rebalance, softmax, CostFn};
use crate::ml::spec::NetSpec;
use crate::ml::trainer::{init_thread_pool, BurnNetwork};
use crate::ml::TrainBackend;

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run.
// Saved next to the checkpoints so a run can be inspected or resumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub image:               String,
    pub labels:              String,
    pub net_spec:            String,
    pub checkpoint_dir:      String,
    pub mode:                SampleMode,
    pub eta:                 f64,
    pub momentum:            f64,
    pub outsz:               Vec3,
    pub num_threads:         usize,
    pub softmax:             bool,
    pub rebalance:           bool,
    pub cost:                CostFn,
    /// Image voxels are divided by this before training
    pub scale:               f32,
    pub max_iter:            usize,
    pub display_interval:    usize,
    pub checkpoint_interval: usize,
    pub snapshots:           bool,
    pub seed:                Option<u64>,
    pub resume:              bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            image:               "data/image.tif".to_string(),
            labels:              "data/labels.tif".to_string(),
            net_spec:            "networks/srini2d.znn".to_string(),
            checkpoint_dir:      "checkpoints".to_string(),
            mode:                SampleMode::Affinity,
            eta:                 0.01,
            momentum:            0.0,
            outsz:               [1, 20, 20],
            num_threads:         7,
            softmax:             false,
            rebalance:           true,
            cost:                CostFn::Binomial,
            scale:               255.0,
            max_iter:            1_000_000,
            display_interval:    1000,
            checkpoint_interval: 10_000,
            snapshots:           true,
            seed:                None,
            resume:              false,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.outsz.iter().any(|&n| n == 0) {
            bail!("outsz {:?} must be at least 1 along every axis", self.outsz);
        }
        if self.num_threads == 0 {
            bail!("num_threads must be at least 1");
        }
        if self.display_interval == 0 || self.checkpoint_interval == 0 {
            bail!("display and checkpoint intervals must be at least 1");
        }
        if self.scale.is_nan() || self.scale <= 0.0 {
            bail!("scale must be positive, got {}", self.scale);
        }
        if self.eta < 0.0 || !(0.0..1.0).contains(&self.momentum) {
            bail!("eta must be >= 0 and momentum in [0, 1)");
        }
        Ok(())
    }
}

/// The network must emit exactly one map per target channel
pub fn check_output_maps(spec: &NetSpec, mode: SampleMode) -> Result<()> {
    if spec.output_maps != mode.channels() {
        bail!(
            "network has {} output map(s) but {:?} mode needs {}",
            spec.output_maps,
            mode,
            mode.channels()
        );
    }
    Ok(())
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
// Owns the config and runs the full training pipeline.
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    /// Create a new TrainUseCase with the given configuration
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;
        cfg.validate()?;

        // ── Step 1: Load volumes ──────────────────────────────────────────────
        let sampler = load_sampler(cfg)?;

        // ── Step 2: Parse the network description ─────────────────────────────
        let spec = NetSpec::from_file(&cfg.net_spec)?;
        check_output_maps(&spec, cfg.mode)?;

        // ── Step 3: Build the network ─────────────────────────────────────────
        init_thread_pool(cfg.num_threads);
        let device: <TrainBackend as burn::tensor::backend::Backend>::Device = Default::default();
        let mut net = BurnNetwork::<TrainBackend>::new(spec.clone(), cfg.outsz, device.clone());
        println!("output volume size: {}", format_size(cfg.outsz));

        // ── Step 4: Learning rate is per output voxel ─────────────────────────
        net.set_eta(per_voxel_eta(cfg.eta, cfg.outsz));
        net.set_momentum(cfg.momentum);

        let fov = net.fov();
        println!("field of view: {}", format_size(fov));

        // ── Step 5: Save config, optionally resume ────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir);
        ckpt_manager.save_config(cfg)?;
        ckpt_manager.save_spec(&spec)?;

        let start = if cfg.resume {
            let iteration = ckpt_manager.latest_iteration()?;
            let restored = ckpt_manager.load_model(net.model().clone(), &device)?;
            net.set_model(restored);
            // Optimiser velocity is not checkpointed
            tracing::info!("Resuming from iteration {}", iteration);
            iteration
        } else {
            0
        };

        // ── Step 6: Training loop ─────────────────────────────────────────────
        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None       => StdRng::from_entropy(),
        };

        let summary = run_loop(&mut net, &sampler, cfg, start, &mut rng, |net, iteration| {
            ckpt_manager.save_model(net.model(), iteration)
        })?;

        tracing::info!(
            "Training finished after {} iterations ({} this run)",
            summary.last_iteration,
            summary.iterations_run
        );
        Ok(())
    }
}

/// Read the image and segmentation named in `cfg` and build the sampler.
/// Image voxels are divided by `cfg.scale`.
fn load_sampler(cfg: &TrainConfig) -> Result<Sampler> {
    tracing::info!("Loading image '{}' and labels '{}'", cfg.image, cfg.labels);
    let mut image = read_volume(&cfg.image)?;
    image.scale(1.0 / cfg.scale);
    let seg = read_segmentation(&cfg.labels)?;
    let sampler = Sampler::new(image, &seg, cfg.mode)?;
    tracing::info!(
        "Sampling {:?} targets from a {} volume",
        sampler.mode(),
        format_size(sampler.volume_size())
    );
    Ok(sampler)
}

/// The gradient is summed over the output patch, so the step size
/// is spread across its voxels.
fn per_voxel_eta(eta: f64, outsz: Vec3) -> f64 {
    eta / voxel_count(outsz) as f64
}

// ─── Training Loop ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub iterations_run: usize,
    pub last_iteration: usize,
}

/// Train from iteration `start + 1` through `cfg.max_iter`.
///
/// `save` is called every `checkpoint_interval` iterations and once
/// more at the end if the last iteration was not a multiple of it.
pub fn run_loop<N, R, F>(
    net:     &mut N,
    sampler: &Sampler,
    cfg:     &TrainConfig,
    start:   usize,
    rng:     &mut R,
    mut save: F,
) -> Result<LoopSummary>
where
    N: Network,
    R: Rng,
    F: FnMut(&N, usize) -> Result<()>,
{
    let outsz = net.output_size();
    let fov   = net.fov();
    let insz: Vec3 = [0, 1, 2].map(|a| fov[a] + outsz[a] - 1);
    let outvol = voxel_count(outsz);

    let metrics   = MetricsLogger::new(&cfg.checkpoint_dir)?;
    let snapshots = if cfg.snapshots {
        Some(SnapshotWriter::new(&cfg.checkpoint_dir)?)
    } else {
        None
    };

    if start >= cfg.max_iter {
        tracing::warn!("Already at iteration {} of {}; nothing to do", start, cfg.max_iter);
        return Ok(LoopSummary { iterations_run: 0, last_iteration: start });
    }

    let mut err_sum  = 0.0f64;
    let mut cls_sum  = 0.0f64;
    let mut in_batch = 0usize;
    let mut timer    = Instant::now();
    let mut last_saved = start;

    for i in (start + 1)..=cfg.max_iter {
        let sample = sampler.get_sample(rng, insz, outsz)?;

        let mut props = net.forward(&sample.input)?;
        if cfg.softmax {
            props = softmax(&props);
        }

        let cost = cfg.cost.evaluate(&props, &sample.labels)?;
        let grads = if cfg.rebalance {
            rebalance(&cost.grads, &sample.labels)?
        } else {
            cost.grads
        };

        err_sum += cost.err;
        cls_sum += cost.cls;
        in_batch += 1;

        if i % cfg.display_interval == 0 {
            let elapsed = timer.elapsed().as_secs_f64();
            let m = IntervalMetrics::from_sums(i, err_sum, cls_sum, in_batch, outvol, elapsed);
            println!(
                "iteration {},    sqerr: {:.3},    clserr: {:.3},   elapsed: {:.1} s",
                i, m.err, m.cls, m.elapsed_secs
            );
            metrics.log(&m)?;

            if let Some(writer) = &snapshots {
                let frame = SnapshotFrame {
                    input:  &sample.input,
                    props:  &props,
                    labels: &sample.labels,
                    grads:  &grads,
                };
                if let Err(e) = writer.write(i, &frame) {
                    tracing::warn!("Snapshot at iteration {} failed: {:#}", i, e);
                }
            }

            err_sum  = 0.0;
            cls_sum  = 0.0;
            in_batch = 0;
            timer    = Instant::now();
        }

        net.backward(&grads)?;

        if i % cfg.checkpoint_interval == 0 {
            save(net, i)?;
            last_saved = i;
        }
    }

    if last_saved != cfg.max_iter {
        save(net, cfg.max_iter)?;
    }

    Ok(LoopSummary {
        iterations_run: cfg.max_iter - start,
        last_iteration: cfg.max_iter,
    })
}
