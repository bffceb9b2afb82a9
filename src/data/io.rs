// ============================================================
// Layer 4 — Volume I/O
// ============================================================
// Reads EM image stacks and label stacks from disk, and writes
// network predictions back out.
//
// Two formats are supported:
//
//   1. Multi-page TIFF (.tif / .tiff)
//      One page per z-section. Every page must have the same
//      width and height and a single sample per pixel.
//      Integer and float sample types are converted to f32.
//      Label stacks are read as u32 ids instead, so large
//      ids don't collapse in f32's 24-bit mantissa.
//
//   2. Raw binary (any other extension)
//      A flat stream of little-endian f64 values, z-major,
//      then y, then x, with a sidecar file "<name>.size"
//      holding little-endian u32 values:
//          x, y, z            single volume
//          x, y, z, n         n volumes written back to back
//
// Reference: tiff crate documentation
//            Rust Book §9 (Error Handling)
//            Rust Book §12 (I/O and File Handling)

use anyhow::{bail, Context, Result};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tiff::decoder::{Decoder, DecodingResult};

use crate::data::affinity::label_id;
use crate::domain::traits::VolumeReader;
use crate::domain::volume::{voxel_count, Vec3, Volume};

// ─── TIFF ─────────────────────────────────────────────────────────────────────
/// Reads multi-page TIFF stacks
pub struct TiffReader;

impl VolumeReader for TiffReader {
    fn read(&self, path: &Path) -> Result<Volume<f32>> {
        read_tiff_stack(path, append_samples)
    }
}

/// Decode every page of a stack, one page per z-section.
/// `append` converts a decoded page into voxels of type `T`.
fn read_tiff_stack<T: Copy>(
    path:       &Path,
    mut append: impl FnMut(&mut Vec<T>, DecodingResult) -> Result<()>,
) -> Result<Volume<T>> {
    let file = File::open(path)
        .with_context(|| format!("Cannot open TIFF '{}'", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .with_context(|| format!("'{}' is not a readable TIFF", path.display()))?;

    let (width, height) = decoder.dimensions()?;
    let plane = width as usize * height as usize;
    let mut data: Vec<T> = Vec::new();
    let mut depth = 0usize;

    loop {
        let (w, h) = decoder.dimensions()?;
        if (w, h) != (width, height) {
            bail!(
                "page {} of '{}' is {}x{}, expected {}x{}",
                depth,
                path.display(),
                w,
                h,
                width,
                height
            );
        }

        let before = data.len();
        append(&mut data, decoder.read_image()?)?;
        if data.len() - before != plane {
            bail!(
                "page {} of '{}' is not single-channel ({} samples for {} pixels)",
                depth,
                path.display(),
                data.len() - before,
                plane
            );
        }
        depth += 1;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    tracing::debug!(
        "Read TIFF '{}': {}x{}x{}",
        path.display(),
        depth,
        height,
        width
    );
    Volume::from_vec([depth, height as usize, width as usize], data)
}

/// Widen whatever sample type the page holds to f32
fn append_samples(out: &mut Vec<f32>, page: DecodingResult) -> Result<()> {
    match page {
        DecodingResult::U8(v)  => out.extend(v.into_iter().map(|s| s as f32)),
        DecodingResult::U16(v) => out.extend(v.into_iter().map(|s| s as f32)),
        DecodingResult::U32(v) => out.extend(v.into_iter().map(|s| s as f32)),
        DecodingResult::U64(v) => out.extend(v.into_iter().map(|s| s as f32)),
        DecodingResult::I8(v)  => out.extend(v.into_iter().map(|s| s as f32)),
        DecodingResult::I16(v) => out.extend(v.into_iter().map(|s| s as f32)),
        DecodingResult::I32(v) => out.extend(v.into_iter().map(|s| s as f32)),
        DecodingResult::I64(v) => out.extend(v.into_iter().map(|s| s as f32)),
        DecodingResult::F32(v) => out.extend(v),
        DecodingResult::F64(v) => out.extend(v.into_iter().map(|s| s as f32)),
    }
    Ok(())
}

/// Keep integer ids exact; ids that don't fit in u32 are an error
fn append_ids(out: &mut Vec<u32>, page: DecodingResult) -> Result<()> {
    fn wide(s: i64) -> Result<u32> {
        u32::try_from(s.max(0)).with_context(|| format!("label id {s} does not fit in 32 bits"))
    }
    match page {
        DecodingResult::U8(v)  => out.extend(v.into_iter().map(u32::from)),
        DecodingResult::U16(v) => out.extend(v.into_iter().map(u32::from)),
        DecodingResult::U32(v) => out.extend(v),
        DecodingResult::U64(v) => {
            for s in v {
                out.push(u32::try_from(s).with_context(|| {
                    format!("label id {s} does not fit in 32 bits")
                })?);
            }
        }
        DecodingResult::I8(v)  => out.extend(v.into_iter().map(|s| s.max(0) as u32)),
        DecodingResult::I16(v) => out.extend(v.into_iter().map(|s| s.max(0) as u32)),
        DecodingResult::I32(v) => out.extend(v.into_iter().map(|s| s.max(0) as u32)),
        DecodingResult::I64(v) => {
            for s in v {
                out.push(wide(s)?);
            }
        }
        DecodingResult::F32(v) => out.extend(v.into_iter().map(|s| label_id(s as f64))),
        DecodingResult::F64(v) => out.extend(v.into_iter().map(label_id)),
    }
    Ok(())
}

// ─── Raw ──────────────────────────────────────────────────────────────────────
/// Reads raw f64 volumes described by a `.size` sidecar
pub struct RawReader;

impl VolumeReader for RawReader {
    fn read(&self, path: &Path) -> Result<Volume<f32>> {
        let (dims, samples) = read_raw_samples(path)?;
        Volume::from_vec(dims, samples.into_iter().map(|v| v as f32).collect())
    }
}

/// The f64 samples of a single-volume raw file
fn read_raw_samples(path: &Path) -> Result<(Vec3, Vec<f64>)> {
    let (dims, channels) = read_size_info(path)?;
    if channels > 1 {
        bail!(
            "'{}' holds {} volumes; expected a single volume",
            path.display(),
            channels
        );
    }

    let bytes = fs::read(path)
        .with_context(|| format!("Cannot read raw volume '{}'", path.display()))?;
    let expected = voxel_count(dims) * 8;
    if bytes.len() != expected {
        bail!(
            "'{}' has {} bytes, expected {} for {}x{}x{} f64 voxels",
            path.display(),
            bytes.len(),
            expected,
            dims[0],
            dims[1],
            dims[2]
        );
    }

    let samples = bytes
        .chunks_exact(8)
        .map(|b| {
            let mut word = [0u8; 8];
            word.copy_from_slice(b);
            f64::from_le_bytes(word)
        })
        .collect();

    Ok((dims, samples))
}

/// Sidecar path for a raw file: "<name>.size"
fn size_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".size");
    PathBuf::from(s)
}

/// Parse the sidecar. Returns ((z, y, x), channel count).
fn read_size_info(path: &Path) -> Result<(Vec3, usize)> {
    let sp = size_path(path);
    let bytes = fs::read(&sp).with_context(|| {
        format!(
            "Cannot read size file '{}' for raw volume '{}'",
            sp.display(),
            path.display()
        )
    })?;

    let words: Vec<usize> = bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .collect();

    match (words.as_slice(), bytes.len() % 4) {
        ([x, y, z], 0) => Ok(([*z, *y, *x], 1)),
        ([x, y, z, n], 0) => Ok(([*z, *y, *x], *n)),
        _ => bail!(
            "'{}' must hold 3 or 4 little-endian u32 values",
            sp.display()
        ),
    }
}

fn write_size_info(path: &Path, dims: Vec3, channels: Option<usize>) -> Result<()> {
    let sp = size_path(path);
    let mut words = vec![dims[2] as u32, dims[1] as u32, dims[0] as u32];
    if let Some(n) = channels {
        words.push(n as u32);
    }
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    fs::write(&sp, bytes).with_context(|| format!("Cannot write '{}'", sp.display()))
}

// ─── Public API ───────────────────────────────────────────────────────────────

fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
        .unwrap_or(false)
}

/// Read a volume, choosing the decoder from the file extension.
pub fn read_volume(path: impl AsRef<Path>) -> Result<Volume<f32>> {
    let path = path.as_ref();
    if is_tiff(path) {
        TiffReader.read(path)
    } else {
        RawReader.read(path)
    }
}

/// Read a label stack as object ids without passing through f32,
/// so ids above 2^24 stay distinct.
pub fn read_segmentation(path: impl AsRef<Path>) -> Result<Volume<u32>> {
    let path = path.as_ref();
    if is_tiff(path) {
        read_tiff_stack(path, append_ids)
    } else {
        let (dims, samples) = read_raw_samples(path)?;
        Volume::from_vec(dims, samples.into_iter().map(label_id).collect())
    }
}

/// Write a single volume as raw f64 plus its `.size` sidecar
pub fn write_volume(path: impl AsRef<Path>, vol: &Volume<f32>) -> Result<()> {
    let path = path.as_ref();
    write_raw(path, std::slice::from_ref(vol))?;
    write_size_info(path, vol.dims(), None)
}

/// Write several same-sized volumes back to back; the sidecar
/// records the channel count.
pub fn write_tensor(path: impl AsRef<Path>, vols: &[Volume<f32>]) -> Result<()> {
    let path = path.as_ref();
    let Some(first) = vols.first() else {
        bail!("nothing to write to '{}'", path.display());
    };
    if vols.iter().any(|v| v.dims() != first.dims()) {
        bail!("all channels written to '{}' must share one size", path.display());
    }
    write_raw(path, vols)?;
    write_size_info(path, first.dims(), Some(vols.len()))
}

fn write_raw(path: &Path, vols: &[Volume<f32>]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }
    let file = File::create(path)
        .with_context(|| format!("Cannot create '{}'", path.display()))?;
    let mut w = BufWriter::new(file);
    for vol in vols {
        for &v in vol.as_slice() {
            w.write_all(&(v as f64).to_le_bytes())?;
        }
    }
    w.flush()?;
    tracing::debug!("Wrote {} volume(s) to '{}'", vols.len(), path.display());
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tiff::encoder::{colortype, TiffEncoder};

    /// Write `pages` of `w`×`h` 16-bit pixels as one stack
    fn write_gray16(path: &Path, pages: &[(u32, u32, Vec<u16>)]) {
        let mut enc = TiffEncoder::new(File::create(path).unwrap()).unwrap();
        for (w, h, data) in pages {
            enc.write_image::<colortype::Gray16>(*w, *h, data).unwrap();
        }
    }

    #[test]
    fn test_raw_volume_keeps_axis_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.raw");

        let data: Vec<f32> = (0..24).map(|i| i as f32).collect();
        let vol = Volume::from_vec([2, 3, 4], data).unwrap();
        write_volume(&path, &vol).unwrap();

        // Sidecar is x, y, z
        let size = fs::read(size_path(&path)).unwrap();
        assert_eq!(&size[0..4], &4u32.to_le_bytes());
        assert_eq!(&size[8..12], &2u32.to_le_bytes());

        let back = read_volume(&path).unwrap();
        assert_eq!(back, vol);
    }

    #[test]
    fn test_raw_missing_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orphan.raw");
        fs::write(&path, [0u8; 8]).unwrap();
        assert!(read_volume(&path).is_err());
    }

    #[test]
    fn test_raw_wrong_byte_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.raw");
        fs::write(&path, [0u8; 8]).unwrap();
        write_size_info(&path, [1, 1, 2], None).unwrap();
        assert!(read_volume(&path).is_err());
    }

    #[test]
    fn test_tensor_records_channel_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("affs");
        let vols = vec![Volume::new([1, 2, 2], 0.5f32); 3];
        write_tensor(&path, &vols).unwrap();

        let (dims, n) = read_size_info(&path).unwrap();
        assert_eq!(dims, [1, 2, 2]);
        assert_eq!(n, 3);
        assert_eq!(fs::metadata(&path).unwrap().len(), 3 * 4 * 8);

        // A multi-channel file is not a single volume
        assert!(read_volume(&path).is_err());
    }

    #[test]
    fn test_tensor_rejects_mixed_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let vols = vec![Volume::new([1, 2, 2], 0.0f32), Volume::new([1, 1, 2], 0.0)];
        assert!(write_tensor(dir.path().join("bad"), &vols).is_err());
    }

    #[test]
    fn test_missing_tiff() {
        assert!(read_volume("/definitely/not/here.tif").is_err());
    }

    #[test]
    fn test_tiff_pages_become_z_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        // value = z*100 + y*4 + x on a 4-wide, 2-high page
        let pages: Vec<(u32, u32, Vec<u16>)> = (0..3u16)
            .map(|z| (4, 2, (0..8u16).map(|i| z * 100 + i).collect()))
            .collect();
        write_gray16(&path, &pages);

        let vol = read_volume(&path).unwrap();
        assert_eq!(vol.dims(), [3, 2, 4]);
        assert_eq!(vol.get(2, 1, 3), 207.0);
        assert_eq!(vol.get(1, 0, 2), 102.0);
    }

    #[test]
    fn test_tiff_rejects_pages_of_different_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.tif");
        write_gray16(&path, &[(4, 2, vec![0; 8]), (3, 2, vec![0; 6])]);
        assert!(read_volume(&path).is_err());
    }

    #[test]
    fn test_tiff_gray8_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("em.tiff");
        let mut enc = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
        enc.write_image::<colortype::Gray8>(3, 1, &[0u8, 128, 255]).unwrap();

        let vol = read_volume(&path).unwrap();
        assert_eq!(vol.dims(), [1, 1, 3]);
        assert_eq!(vol.as_slice(), &[0.0, 128.0, 255.0]);
    }

    #[test]
    fn test_tiff_segmentation_keeps_large_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.tif");
        let mut enc = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
        let ids = [16_777_216u32, 16_777_217, 0, 5];
        enc.write_image::<colortype::Gray32>(2, 2, &ids).unwrap();

        let seg = read_segmentation(&path).unwrap();
        assert_eq!(seg.dims(), [1, 2, 2]);
        assert_eq!(seg.as_slice(), &ids);
        assert_ne!(seg.get(0, 0, 0), seg.get(0, 0, 1));
    }

    #[test]
    fn test_raw_segmentation_keeps_large_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.raw");
        let ids = [16_777_216.0f64, 16_777_217.0, 0.0];
        let bytes: Vec<u8> = ids.iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(&path, bytes).unwrap();
        write_size_info(&path, [1, 1, 3], None).unwrap();

        let seg = read_segmentation(&path).unwrap();
        assert_eq!(seg.as_slice(), &[16_777_216, 16_777_217, 0]);
    }
}
