// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Handles all cross-cutting concerns that don't belong in
// any specific business layer:
//
//   checkpoint.rs — Saving and loading model weights
//                   Uses Burn's CompactRecorder to serialise
//                   the ConvNet parameters to disk. Also keeps
//                   TrainConfig and the parsed NetSpec as JSON
//                   so inference can rebuild the network.
//
//   metrics.rs    — Training progress logging
//                   Appends one row of cost / classification
//                   error per display interval to a CSV file.
//
//   snapshot.rs   — Diagnostic images
//                   Renders input, inference, label and
//                   gradient planes into one PNG per interval.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

/// PNG snapshots of a training step
pub mod snapshot;
