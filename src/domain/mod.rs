// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs and traits that define the core concepts:
// volumes of voxels, and the network handle that training
// drives.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Dense 3-D arrays in (z, y, x) order
pub mod volume;

// The Network and VolumeReader abstractions
pub mod traits;
