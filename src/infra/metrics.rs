// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records training progress to a CSV file once per display
// interval, alongside the line printed to stdout.
//
// Metrics recorded per interval:
//   - iteration:    the iteration the row was written at
//   - err:          mean cost per output voxel over the interval
//   - cls:          mean classification error per output voxel
//   - elapsed_secs: wall time spent on the interval
//
// Output file: <checkpoint_dir>/metrics.csv
//
// Example CSV output:
//   iteration,err,cls,elapsed_secs
//   1000,0.412300,0.201000,38.2
//   2000,0.351900,0.163400,37.9
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// One row of the progress log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalMetrics {
    pub iteration:    usize,
    pub err:          f64,
    pub cls:          f64,
    pub elapsed_secs: f64,
}

impl IntervalMetrics {
    /// Average raw sums over `iterations` patches of `voxels` output voxels
    pub fn from_sums(
        iteration:    usize,
        err_sum:      f64,
        cls_sum:      f64,
        iterations:   usize,
        voxels:       usize,
        elapsed_secs: f64,
    ) -> Self {
        let denom = (iterations * voxels).max(1) as f64;
        Self {
            iteration,
            err: err_sum / denom,
            cls: cls_sum / denom,
            elapsed_secs,
        }
    }
}

/// Appends interval metrics to a CSV file.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet,
    /// so resumed runs keep appending to the same log.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "iteration,err,cls,elapsed_secs")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &IntervalMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        writeln!(
            f,
            "{},{:.6},{:.6},{:.1}",
            m.iteration, m.err, m.cls, m.elapsed_secs,
        )?;
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
