// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between files on disk and patches fed to the
// network:
//
//   .tif / raw files
//       │
//       ▼
//   io            → decodes image and label stacks
//       │
//       ▼
//   affinity      → segmentation → affinity / boundary targets
//       │
//       ▼
//   sampler       → random input patch + centred target patches
//
// Reference: Rust Book §13 (Iterators and Closures)

/// TIFF and raw volume reading, raw tensor writing
pub mod io;

/// Affinity and boundary targets from a segmentation
pub mod affinity;

/// Random patch extraction for training
pub mod sampler;
