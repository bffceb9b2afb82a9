// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The training loop talks to the network only through the
// `Network` trait. It hands in an input volume, gets back one
// volume per output map, computes its own cost and gradient,
// and hands the gradient back. Everything behind the trait
// (convolutions, autodiff, the optimiser, thread pools) is
// opaque to the loop.
//
// Implementations:
//   - BurnNetwork → burn ConvNet + SGD        (Layer 5 - ml)
//   - test doubles in the application tests
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;
use std::path::Path;

use crate::domain::volume::{Vec3, Volume};

// ─── Network ──────────────────────────────────────────────────────────────────
/// A trainable network with a fixed output patch size.
pub trait Network {
    /// Input footprint needed to produce a single output voxel
    fn fov(&self) -> Vec3;

    /// Size of each output map produced by `forward`
    fn output_size(&self) -> Vec3;

    /// Run the forward pass on an input patch of size `fov + outsz - 1`.
    /// Returns one volume per output map.
    fn forward(&mut self, input: &Volume<f32>) -> Result<Vec<Volume<f32>>>;

    /// Back-propagate `grads` (one per output map) through the most
    /// recent forward pass and update the weights.
    /// Fails if there is no pending forward pass.
    fn backward(&mut self, grads: &[Volume<f32>]) -> Result<()>;

    /// Learning rate applied on every weight update
    fn set_eta(&mut self, eta: f64);

    fn set_momentum(&mut self, momentum: f64);
}

// ─── VolumeReader ─────────────────────────────────────────────────────────────
/// Anything that can decode a file into a float volume.
///
/// Implementations:
///   - TiffReader → multi-page TIFF stacks
///   - RawReader  → raw f64 stream with a .size sidecar
pub trait VolumeReader {
    fn read(&self, path: &Path) -> Result<Volume<f32>>;
}
