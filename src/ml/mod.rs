// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// This layer contains ALL Burn framework specific code.
// Outside this layer, burn only appears in the checkpoint
// recorder (infra) and as the device type in the train use case.
//
// What's in this layer:
//
//   spec.rs       — Network description parser
//                   Turns the option file into a chain of
//                   conv / max_filter stages and computes the
//                   field of view
//
//   model.rs      — The burn ConvNet built from a NetSpec
//                   • Conv3d with dilation = filter sparseness
//                   • dense sliding-window max filters
//                   • transfer functions (tanh, logistic, relu)
//
//   cost.rs       — Host-side cost, classification error,
//                   gradient, softmax and class rebalancing
//
//   trainer.rs    — BurnNetwork: the Network trait over
//                   ConvNet + SGD with momentum
//
//   inferencer.rs — Whole-volume dense prediction from a
//                   saved checkpoint
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Network description files
pub mod spec;

/// 3-D convolutional network architecture
pub mod model;

/// Cost functions and gradient post-processing
pub mod cost;

/// Trainable network handle
pub mod trainer;

/// Inference engine: loads a checkpoint and predicts affinities
pub mod inferencer;

// CPU by default; `--features wgpu` trains on the GPU
#[cfg(feature = "wgpu")]
pub type InferBackend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "wgpu"))]
pub type InferBackend = burn::backend::NdArray<f32>;

pub type TrainBackend = burn::backend::Autodiff<InferBackend>;
