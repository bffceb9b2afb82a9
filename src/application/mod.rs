// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// a specific goal (training or dense inference).
//
// Rules for this layer:
//   - No ML math or model code here
//   - No direct file format handling (that's Layer 4 and 6)
//   - Only workflow coordination, plus the progress lines
//     the training loop prints as it runs
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The training workflow
pub mod train_use_case;

// Whole-volume prediction from a checkpoint
pub mod infer_use_case;
