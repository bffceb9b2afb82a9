// ============================================================
// Layer 6 — Diagnostic Snapshots
// ============================================================
// Writes a 2×2 grayscale PNG every display interval so training
// can be watched without a plotting window:
//
//   ┌────────────┬────────────┐
//   │ input      │ inference  │
//   ├────────────┼────────────┤
//   │ label      │ |gradient| │
//   └────────────┴────────────┘
//
// Each panel is the first z-plane of its volume, stretched to
// its own value range. Output maps
// show channel 1 (the y-affinity) when there is more than one,
// otherwise channel 0. Panels are scaled nearest-neighbour to
// the size of the input plane, which is always the largest.
//
// Output: <checkpoint_dir>/snapshots/iter_00001000.png

use anyhow::{bail, Context, Result};
use image::{imageops, GrayImage, Luma};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::volume::Volume;

/// Host-side copies of one training step, ready to plot
pub struct SnapshotFrame<'a> {
    pub input:  &'a Volume<f32>,
    pub props:  &'a [Volume<f32>],
    pub labels: &'a [Volume<f32>],
    pub grads:  &'a [Volume<f32>],
}

pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(checkpoint_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = checkpoint_dir.as_ref().join("snapshots");
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn write(&self, iteration: usize, frame: &SnapshotFrame<'_>) -> Result<PathBuf> {
        let path = self.dir.join(format!("iter_{iteration:08}.png"));
        render(frame)?
            .save(&path)
            .with_context(|| format!("Cannot write snapshot '{}'", path.display()))?;
        tracing::debug!("Snapshot written: '{}'", path.display());
        Ok(path)
    }
}

/// Compose the four panels into one image
pub fn render(frame: &SnapshotFrame<'_>) -> Result<GrayImage> {
    let props = plotted(frame.props, "inference")?;
    let label = plotted(frame.labels, "label")?;
    let grad  = plotted(frame.grads, "gradient")?;

    let dims = frame.input.dims();
    let (w, h) = (dims[2] as u32, dims[1] as u32);

    let tiles = [
        plane(&frame.input.normalized(), w, h),
        plane(&props.normalized(), w, h),
        plane(&label.normalized(), w, h),
        plane(&grad.abs().normalized(), w, h),
    ];

    let mut canvas = GrayImage::new(w * 2, h * 2);
    for (i, tile) in tiles.iter().enumerate() {
        let x = (i as u32 % 2) * w;
        let y = (i as u32 / 2) * h;
        imageops::replace(&mut canvas, tile, x as i64, y as i64);
    }
    Ok(canvas)
}

fn plotted<'a>(maps: &'a [Volume<f32>], what: &str) -> Result<&'a Volume<f32>> {
    match maps {
        [] => bail!("no {what} maps to plot"),
        [only] => Ok(only),
        [_, second, ..] => Ok(second),
    }
}

/// First z-plane of a [0, 1] volume as an 8-bit tile of `w`×`h`
fn plane(vol: &Volume<f32>, w: u32, h: u32) -> GrayImage {
    let dims = vol.dims();
    let (pw, ph) = (dims[2] as u32, dims[1] as u32);
    let slice = vol.slice_z(0);

    let img = GrayImage::from_fn(pw, ph, |x, y| {
        let v = slice[(y * pw + x) as usize];
        Luma([(v * 255.0).round() as u8])
    });

    if (pw, ph) == (w, h) {
        img
    } else {
        imageops::resize(&img, w, h, imageops::FilterType::Nearest)
    }
}
