// ============================================================
// Layer 3 — Volume Domain Type
// ============================================================
// A dense 3-D array of voxels. Every image, label map,
// prediction and gradient in the system is a Volume.
//
// Memory layout:
//   Row-major with x varying fastest, then y, then z.
//   The voxel (z, y, x) lives at index  (z * ny + y) * nx + x
//
// All sizes and coordinates are Vec3 triples in z, y, x order.
// This matches how EM stacks are stored: one image per section,
// sections stacked along z.
//
// Reference: Rust Book §8 (Vectors)
//            Rust Book §10 (Generic Types)

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// A size or coordinate triple in (z, y, x) order
pub type Vec3 = [usize; 3];

/// Number of voxels covered by a size triple
pub fn voxel_count(size: Vec3) -> usize {
    size[0] * size[1] * size[2]
}

/// Render a size triple as `ZxYxX`
pub fn format_size(size: Vec3) -> String {
    format!("{}x{}x{}", size[0], size[1], size[2])
}

/// A dense 3-D volume of voxels of type `T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume<T> {
    /// Extent along (z, y, x)
    dims: Vec3,

    /// Voxel values, x fastest
    data: Vec<T>,
}

impl<T: Copy> Volume<T> {
    /// Create a volume of the given size filled with `fill`
    pub fn new(dims: Vec3, fill: T) -> Self {
        Self {
            dims,
            data: vec![fill; voxel_count(dims)],
        }
    }

    /// Wrap an existing buffer. Fails if the buffer length
    /// does not match the requested dimensions.
    pub fn from_vec(dims: Vec3, data: Vec<T>) -> Result<Self> {
        if data.len() != voxel_count(dims) {
            bail!(
                "buffer of {} voxels does not fit dimensions {}x{}x{}",
                data.len(),
                dims[0],
                dims[1],
                dims[2]
            );
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> Vec3 {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    fn index(&self, z: usize, y: usize, x: usize) -> usize {
        (z * self.dims[1] + y) * self.dims[2] + x
    }

    /// Read one voxel. Panics on out-of-range coordinates,
    /// like slice indexing.
    #[inline]
    pub fn get(&self, z: usize, y: usize, x: usize) -> T {
        self.data[self.index(z, y, x)]
    }

    #[inline]
    pub fn set(&mut self, z: usize, y: usize, x: usize, value: T) {
        let i = self.index(z, y, x);
        self.data[i] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Copy out the sub-volume starting at `origin` with extent `size`.
    ///
    /// Returns an error instead of panicking when the requested box
    /// sticks out of the volume, since crop boxes usually come from
    /// user-supplied sizes.
    pub fn crop(&self, origin: Vec3, size: Vec3) -> Result<Volume<T>> {
        for axis in 0..3 {
            if origin[axis] + size[axis] > self.dims[axis] {
                bail!(
                    "crop {:?}+{:?} exceeds volume {:?} on axis {}",
                    origin,
                    size,
                    self.dims,
                    axis
                );
            }
        }

        let mut data = Vec::with_capacity(voxel_count(size));
        for z in origin[0]..origin[0] + size[0] {
            for y in origin[1]..origin[1] + size[1] {
                let row = self.index(z, y, origin[2]);
                data.extend_from_slice(&self.data[row..row + size[2]]);
            }
        }

        Ok(Volume { dims: size, data })
    }

    /// Apply `f` to every voxel, producing a new volume
    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> Volume<U> {
        Volume {
            dims: self.dims,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// The 2-D plane at depth `z`, row-major (y, x)
    pub fn slice_z(&self, z: usize) -> &[T] {
        let plane = self.dims[1] * self.dims[2];
        &self.data[z * plane..(z + 1) * plane]
    }
}

impl Volume<f32> {
    /// Multiply every voxel by `factor`
    pub fn scale(&mut self, factor: f32) {
        self.data.iter_mut().for_each(|v| *v *= factor);
    }

    /// Smallest and largest voxel value; (0, 0) for an empty volume
    pub fn min_max(&self) -> (f32, f32) {
        if self.is_empty() {
            return (0.0, 0.0);
        }
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Min-max normalise into [0, 1]. A constant volume maps to zeros.
    pub fn normalized(&self) -> Volume<f32> {
        let (lo, hi) = self.min_max();
        let range = hi - lo;
        if range <= f32::EPSILON {
            return Volume::new(self.dims, 0.0);
        }
        self.map(|v| (v - lo) / range)
    }

    pub fn abs(&self) -> Volume<f32> {
        self.map(f32::abs)
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().map(|&v| v as f64).sum()
    }
}
