// ============================================================
// Layer 4 — Label Transforms
// ============================================================
// Converts a segmentation (one object id per voxel, 0 = boundary)
// into the training targets the network learns to predict.
//
// Affinity along axis d at voxel v:
//
//     aff_d[v] = 1   if v - e_d is inside the volume
//                    and lbl[v] == lbl[v - e_d]
//                    and lbl[v] != 0
//     aff_d[v] = 0   otherwise
//
// i.e. each voxel stores its connectivity to the previous voxel
// along z, y and x. Three maps come out, in z, y, x order.
//
// Boundary map: 1 inside objects, 0 on boundary voxels.

use crate::domain::volume::Volume;

/// Round a float label sample to an object id.
/// Zero and negative values are boundary.
pub fn label_id(v: f64) -> u32 {
    if v <= 0.0 {
        0
    } else {
        v.round() as u32
    }
}

/// Affinity maps for the z, y and x neighbours
pub fn make_affinity(seg: &Volume<u32>) -> [Volume<f32>; 3] {
    let [nz, ny, nx] = seg.dims();
    let mut affs = [
        Volume::new(seg.dims(), 0.0f32),
        Volume::new(seg.dims(), 0.0f32),
        Volume::new(seg.dims(), 0.0f32),
    ];

    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let id = seg.get(z, y, x);
                if id == 0 {
                    continue;
                }
                if z > 0 && seg.get(z - 1, y, x) == id {
                    affs[0].set(z, y, x, 1.0);
                }
                if y > 0 && seg.get(z, y - 1, x) == id {
                    affs[1].set(z, y, x, 1.0);
                }
                if x > 0 && seg.get(z, y, x - 1) == id {
                    affs[2].set(z, y, x, 1.0);
                }
            }
        }
    }

    affs
}

pub fn make_boundary(seg: &Volume<u32>) -> Volume<f32> {
    seg.map(|id| if id == 0 { 0.0 } else { 1.0 })
}
