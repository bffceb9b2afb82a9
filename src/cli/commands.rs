// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the three subcommands: `train`, `fov` and `infer`
// and all their configurable flags.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → usize, f64, enums, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::application::train_use_case::TrainConfig;
use crate::data::sampler::SampleMode;
use crate::domain::volume::Vec3;
use crate::ml::cost::CostFn;

/// The top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train an affinity (or boundary) network on a labelled volume
    Train(TrainArgs),

    /// Print the field of view and input patch size of a network
    Fov(FovArgs),

    /// Predict over a whole volume with a trained checkpoint
    Infer(InferArgs),
}

/// Parse "z,y,x" into a size triple
pub fn parse_vec3(s: &str) -> Result<Vec3, String> {
    let parts: Vec<usize> = s
        .split(',')
        .map(|p| p.trim().parse::<usize>().map_err(|e| format!("'{p}': {e}")))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [z, y, x] if *z > 0 && *y > 0 && *x > 0 => Ok([*z, *y, *x]),
        _ => Err(format!("expected three positive sizes z,y,x, got '{s}'")),
    }
}

/// All arguments for the `train` command.
/// Each field becomes a --flag on the command line.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Raw EM image volume (.tif stack or raw f64 with .size sidecar)
    #[arg(long, default_value = "data/image.tif")]
    pub image: String,

    /// Segmentation volume, one integer id per object, 0 for boundary
    #[arg(long, default_value = "data/labels.tif")]
    pub labels: String,

    /// Network description file
    #[arg(long, default_value = "networks/srini2d.znn")]
    pub net_spec: String,

    /// What the network predicts
    #[arg(long, value_enum, default_value_t = SampleMode::Affinity)]
    pub mode: SampleMode,

    /// Learning rate, divided by the number of output voxels
    #[arg(long, default_value_t = 0.01)]
    pub eta: f64,

    #[arg(long, default_value_t = 0.0)]
    pub momentum: f64,

    /// Output patch size, z,y,x
    #[arg(long, value_parser = parse_vec3, default_value = "1,20,20")]
    pub outsz: Vec3,

    /// Worker threads for the CPU backend
    #[arg(long, default_value_t = 7)]
    pub num_threads: usize,

    /// Apply a voxel-wise softmax across output maps
    #[arg(long)]
    pub softmax: bool,

    /// Don't reweight the gradient to balance positive and negative voxels
    #[arg(long)]
    pub no_rebalance: bool,

    #[arg(long, value_enum, default_value_t = CostFn::Binomial)]
    pub cost: CostFn,

    /// Image voxels are divided by this (255 for 8-bit stacks)
    #[arg(long, default_value_t = 255.0)]
    pub scale: f32,

    #[arg(long, default_value_t = 1_000_000)]
    pub max_iter: usize,

    /// Print progress and write a snapshot every N iterations
    #[arg(long, default_value_t = 1000)]
    pub display_interval: usize,

    /// Save weights every N iterations
    #[arg(long, default_value_t = 10_000)]
    pub checkpoint_interval: usize,

    /// Directory for weights, config, metrics and snapshots
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Skip the PNG snapshots
    #[arg(long)]
    pub no_snapshots: bool,

    /// Seed for patch sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Continue from the latest checkpoint in --checkpoint-dir
    #[arg(long)]
    pub resume: bool,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// This is the boundary between Layer 1 and Layer 2;
/// the application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            image:               a.image,
            labels:              a.labels,
            net_spec:            a.net_spec,
            checkpoint_dir:      a.checkpoint_dir,
            mode:                a.mode,
            eta:                 a.eta,
            momentum:            a.momentum,
            outsz:               a.outsz,
            num_threads:         a.num_threads,
            softmax:             a.softmax,
            rebalance:           !a.no_rebalance,
            cost:                a.cost,
            scale:               a.scale,
            max_iter:            a.max_iter,
            display_interval:    a.display_interval,
            checkpoint_interval: a.checkpoint_interval,
            snapshots:           !a.no_snapshots,
            seed:                a.seed,
            resume:              a.resume,
        }
    }
}

/// Arguments for the `fov` command
#[derive(Args, Debug)]
pub struct FovArgs {
    #[arg(long, default_value = "networks/srini2d.znn")]
    pub net_spec: String,

    /// Output patch size, z,y,x
    #[arg(long, value_parser = parse_vec3, default_value = "1,20,20")]
    pub outsz: Vec3,
}

/// Arguments for the `infer` command
#[derive(Args, Debug)]
pub struct InferArgs {
    /// Volume to predict over
    #[arg(long)]
    pub image: String,

    /// Directory where checkpoints were saved during training
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Raw f64 output file; a .size sidecar is written next to it
    #[arg(long)]
    pub out: String,

    /// Image divisor; defaults to the value used for training
    #[arg(long)]
    pub scale: Option<f32>,
}
