// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Three commands are supported:
//   1. `train` — trains a network on an image / label pair
//   2. `fov`   — prints a network's field of view
//   3. `infer` — predicts over a whole volume from a checkpoint
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

// Declare the commands submodule
pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, FovArgs, InferArgs, TrainArgs};

use crate::domain::volume::format_size;

/// The main CLI struct. clap reads the fields and generates
/// argument parsing code automatically via the Parser derive macro.
#[derive(Parser, Debug)]
#[command(
    name = "affinity-train",
    version = "0.1.0",
    about = "Train a 3-D ConvNet to predict voxel affinities on EM volumes."
)]
pub struct Cli {
    /// The subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::Fov(args)   => run_fov(args),
            Commands::Infer(args) => run_infer(args),
        }
    }
}

/// Converts CLI args into a TrainConfig and hands off to Layer 2.
fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Training '{}' on '{}'", args.net_spec, args.image);

    let use_case = TrainUseCase::new(args.into());
    use_case.execute()?;

    println!("Training complete. Checkpoint saved.");
    Ok(())
}

fn run_fov(args: FovArgs) -> Result<()> {
    use crate::ml::spec::NetSpec;

    let spec = NetSpec::from_file(&args.net_spec)?;
    println!("field of view: {}", format_size(spec.fov()));
    println!("input size:    {}", format_size(spec.input_size(args.outsz)));
    println!("output maps:   {}", spec.output_maps);
    Ok(())
}

fn run_infer(args: InferArgs) -> Result<()> {
    use crate::application::infer_use_case::InferUseCase;

    let use_case = InferUseCase::new(&args.checkpoint_dir)?;
    let dims = use_case.run(args.image.as_ref(), args.out.as_ref(), args.scale)?;
    println!("output volume size: {}", format_size(dims));
    Ok(())
}
