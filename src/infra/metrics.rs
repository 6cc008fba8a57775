// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Appends one CSV row per epoch to <checkpoint_dir>/metrics.csv.
//
// Columns:
//   epoch
//   train_{total,pattern,projection,confidence,context}
//   val_{total,pattern,projection,confidence,context}
//   pattern_acc
//
// The header is written only when the file is created, so a
// resumed run keeps appending to the same log.
//
// How to read the metrics:
//   - train_total should fall steadily
//   - val_total rising while train_total falls → overfitting
//   - val_context stays 0.0 when the validation bundle has no
//     context targets
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

use crate::domain::losses::{EpochLosses, ValidationMetrics};

pub const CSV_HEADER: &str = "epoch,\
train_total,train_pattern,train_projection,train_confidence,train_context,\
val_total,val_pattern,val_projection,val_confidence,val_context,\
pattern_acc";

/// One row of metrics for a single epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    /// Per-batch averages over the training pass
    pub train: EpochLosses,

    /// Per-batch averages over the validation pass, plus accuracy
    pub val: ValidationMetrics,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train: EpochLosses, val: ValidationMetrics) -> Self {
        Self { epoch, train, val }
    }

    /// Returns true if this epoch's validation total beats `best_val_total`
    pub fn is_improvement(&self, best_val_total: f64) -> bool {
        self.val.losses.total < best_val_total
    }

    fn csv_row(&self) -> String {
        let t = &self.train;
        let v = &self.val.losses;
        format!(
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
            self.epoch,
            t.total, t.pattern, t.projection, t.confidence, t.context,
            v.total, v.pattern, v.projection, v.confidence, v.context,
            self.val.pattern_acc,
        )
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{CSV_HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot append to '{}'", self.csv_path.display()))?;
        writeln!(f, "{}", m.csv_row())?;

        tracing::debug!(
            "Logged epoch {} metrics: train_total={:.4}, val_total={:.4}",
            m.epoch,
            m.train.total,
            m.val.losses.total,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
