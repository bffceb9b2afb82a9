// ============================================================
// Layer 4 — Patch Sampler
// ============================================================
// Draws random training patches from a full image/label pair.
//
// Each sample is:
//   - an input patch of size  insz = fov + outsz - 1
//   - one target patch of size outsz per output map
//
// The target patch sits in the centre of the input patch:
//
//     input   |<-------------- insz -------------->|
//     target        |<-------- outsz -------->|
//                   ^ offset = (insz - outsz) / 2
//
// so every target voxel has its full field of view inside the
// input patch. The origin of the input patch is drawn uniformly
// over every position where it fits in the volume.
//
// Targets are computed once for the whole volume at construction
// time, so sampling is just cropping.

use anyhow::{bail, Result};
use clap::ValueEnum;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::affinity::{make_affinity, make_boundary};
use crate::domain::volume::{Vec3, Volume};

/// What the network is trained to predict
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleMode {
    /// Three maps: connectivity to the previous voxel along z, y, x
    Affinity,
    /// One map: 1 inside objects, 0 on boundaries
    Boundary,
}

impl SampleMode {
    /// Number of output maps the network must produce
    pub fn channels(self) -> usize {
        match self {
            SampleMode::Affinity => 3,
            SampleMode::Boundary => 1,
        }
    }
}

/// One training example
#[derive(Debug, Clone)]
pub struct Sample {
    pub input:  Volume<f32>,
    pub labels: Vec<Volume<f32>>,
}

pub struct Sampler {
    image:   Volume<f32>,
    targets: Vec<Volume<f32>>,
    mode:    SampleMode,
}

impl Sampler {
    /// Build a sampler over an image and its segmentation.
    /// Both volumes must have identical dimensions.
    pub fn new(image: Volume<f32>, seg: &Volume<u32>, mode: SampleMode) -> Result<Self> {
        if image.dims() != seg.dims() {
            bail!(
                "image is {:?} but labels are {:?}; they must match",
                image.dims(),
                seg.dims()
            );
        }

        let targets = match mode {
            SampleMode::Affinity => make_affinity(seg).into_iter().collect(),
            SampleMode::Boundary => vec![make_boundary(seg)],
        };

        tracing::debug!(
            "Sampler ready: volume {:?}, {} target map(s)",
            image.dims(),
            targets.len()
        );
        Ok(Self { image, targets, mode })
    }

    pub fn mode(&self) -> SampleMode {
        self.mode
    }

    pub fn volume_size(&self) -> Vec3 {
        self.image.dims()
    }

    /// Draw one random patch pair.
    pub fn get_sample<R: Rng + ?Sized>(
        &self,
        rng:   &mut R,
        insz:  Vec3,
        outsz: Vec3,
    ) -> Result<Sample> {
        let dims = self.image.dims();
        let mut origin = [0usize; 3];
        let mut offset = [0usize; 3];

        for axis in 0..3 {
            if outsz[axis] == 0 || outsz[axis] > insz[axis] {
                bail!("output size {:?} must be non-empty and fit in input size {:?}", outsz, insz);
            }
            if insz[axis] > dims[axis] {
                bail!("input size {:?} does not fit in volume {:?}", insz, dims);
            }
            origin[axis] = rng.gen_range(0..=dims[axis] - insz[axis]);
            offset[axis] = origin[axis] + (insz[axis] - outsz[axis]) / 2;
        }

        let input = self.image.crop(origin, insz)?;
        let labels = self
            .targets
            .iter()
            .map(|t| t.crop(offset, outsz))
            .collect::<Result<Vec<_>>>()?;

        Ok(Sample { input, labels })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn ramp(dims: Vec3) -> Volume<f32> {
        let n = dims[0] * dims[1] * dims[2];
        Volume::from_vec(dims, (0..n).map(|i| i as f32).collect()).unwrap()
    }

    /// Segmentation whose id at (y, x) is `id(y, x)`, one z-plane
    fn seg_from(h: usize, w: usize, id: impl Fn(usize, usize) -> u32) -> Volume<u32> {
        Volume::from_vec([1, h, w], (0..h * w).map(|i| id(i / w, i % w)).collect()).unwrap()
    }

    /// Absolute (y, x) of an input-patch voxel, read back through the ramp image
    fn position_in_volume(s: &Sample, width: usize, y: usize, x: usize) -> (usize, usize) {
        let v = s.input.get(0, y, x) as usize;
        (v / width, v % width)
    }

    #[test]
    fn test_rejects_mismatched_volumes() {
        let image = Volume::new([2, 4, 4], 0.0f32);
        let seg = Volume::new([2, 4, 5], 1u32);
        assert!(Sampler::new(image, &seg, SampleMode::Affinity).is_err());
    }

    #[test]
    fn test_sample_shapes() {
        let image = ramp([4, 10, 10]);
        let seg = Volume::new([4, 10, 10], 1u32);
        let sampler = Sampler::new(image, &seg, SampleMode::Affinity).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        let s = sampler.get_sample(&mut rng, [1, 7, 7], [1, 3, 3]).unwrap();
        assert_eq!(s.input.dims(), [1, 7, 7]);
        assert_eq!(s.labels.len(), 3);
        assert!(s.labels.iter().all(|l| l.dims() == [1, 3, 3]));
    }

    #[test]
    fn test_boundary_label_is_centred_in_input() {
        let (h, w) = (11, 13);
        // Diagonal boundary lines: any shift of the label crop
        // against the input crop changes which voxels are 0
        let boundary = |y: usize, x: usize| (x + 2 * y) % 5 == 0;
        let seg = seg_from(h, w, |y, x| if boundary(y, x) { 0 } else { 1 });
        let sampler = Sampler::new(ramp([1, h, w]), &seg, SampleMode::Boundary).unwrap();
        let mut rng = StdRng::seed_from_u64(11);

        // offset = (7 - 3) / 2 = 2
        for _ in 0..20 {
            let s = sampler.get_sample(&mut rng, [1, 7, 7], [1, 3, 3]).unwrap();
            for y in 0..3 {
                for x in 0..3 {
                    let (ay, ax) = position_in_volume(&s, w, y + 2, x + 2);
                    let expected = if boundary(ay, ax) { 0.0 } else { 1.0 };
                    assert_eq!(s.labels[0].get(0, y, x), expected, "label voxel ({y}, {x})");
                }
            }
        }
    }

    #[test]
    fn test_affinity_label_is_centred_in_input() {
        let (h, w) = (10, 12);
        // Vertical stripes three voxels wide
        let seg = seg_from(h, w, |_, x| (x / 3 + 1) as u32);
        let sampler = Sampler::new(ramp([1, h, w]), &seg, SampleMode::Affinity).unwrap();
        let mut rng = StdRng::seed_from_u64(29);

        // offset = (5 - 2) / 2 = 1, rounded down
        for _ in 0..20 {
            let s = sampler.get_sample(&mut rng, [1, 5, 5], [1, 2, 2]).unwrap();
            for y in 0..2 {
                for x in 0..2 {
                    let (ay, ax) = position_in_volume(&s, w, y + 1, x + 1);
                    let aff_y = if ay > 0 { 1.0 } else { 0.0 };
                    let aff_x = if ax % 3 != 0 { 1.0 } else { 0.0 };
                    assert_eq!(s.labels[0].get(0, y, x), 0.0);
                    assert_eq!(s.labels[1].get(0, y, x), aff_y, "y-affinity at ({y}, {x})");
                    assert_eq!(s.labels[2].get(0, y, x), aff_x, "x-affinity at ({y}, {x})");
                }
            }
        }
    }

    #[test]
    fn test_input_larger_than_volume() {
        let image = Volume::new([1, 4, 4], 0.0f32);
        let seg = Volume::new([1, 4, 4], 0u32);
        let sampler = Sampler::new(image, &seg, SampleMode::Boundary).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(sampler.get_sample(&mut rng, [1, 5, 5], [1, 1, 1]).is_err());
        assert!(sampler.get_sample(&mut rng, [1, 2, 2], [1, 3, 3]).is_err());
    }

    #[test]
    fn test_whole_volume_sample() {
        let image = ramp([1, 3, 3]);
        let seg = Volume::new([1, 3, 3], 2u32);
        let sampler = Sampler::new(image.clone(), &seg, SampleMode::Boundary).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let s = sampler.get_sample(&mut rng, [1, 3, 3], [1, 3, 3]).unwrap();
        assert_eq!(s.input, image);
    }

    #[test]
    fn test_mode_channels() {
        assert_eq!(SampleMode::Affinity.channels(), 3);
        assert_eq!(SampleMode::Boundary.channels(), 1);
    }
}
