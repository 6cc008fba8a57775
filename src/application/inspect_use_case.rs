// ============================================================
// Layer 2 — InspectUseCase
// ============================================================
// Loads a bundle and reports what a training run would see.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::data::dataset::SequenceStore;
use crate::domain::sample::DatasetShape;

#[derive(Debug, Clone, Serialize)]
pub struct BundleSummary {
    pub shape:            DatasetShape,
    /// Smallest and largest pattern label, absent for an empty bundle
    pub pattern_id_range: Option<(i64, i64)>,
}

pub struct InspectUseCase {
    npz: PathBuf,
}

impl InspectUseCase {
    pub fn new(npz: impl Into<PathBuf>) -> Self {
        Self { npz: npz.into() }
    }

    pub fn execute(&self) -> Result<BundleSummary> {
        let store = SequenceStore::load(&self.npz)
            .with_context(|| format!("Cannot inspect '{}'", self.npz.display()))?;
        Ok(BundleSummary {
            shape:            store.shape(),
            pattern_id_range: store.pattern_id_range(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, Array3};
    use ndarray_npy::NpzWriter;
    use std::fs::File;

    #[test]
    fn test_summary_of_a_bundle_with_context() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("val.npz");
        let mut npz = NpzWriter::new(File::create(&path).unwrap());
        npz.add_array("inputs", &Array3::<f32>::zeros((5, 8, 4))).unwrap();
        npz.add_array("pattern_ids", &Array1::from(vec![2i64, 0, 7, 3, 3])).unwrap();
        npz.add_array("future_paths", &Array3::<f32>::zeros((5, 3, 6))).unwrap();
        npz.add_array("context_targets", &Array2::<f32>::zeros((5, 2))).unwrap();
        npz.finish().unwrap();

        let summary = InspectUseCase::new(&path).execute().unwrap();
        assert_eq!(summary.shape.len, 5);
        assert_eq!(summary.shape.seq_len, 8);
        assert_eq!(summary.shape.feature_dim, 4);
        assert_eq!(summary.shape.future_steps, 6);
        assert_eq!(summary.shape.context_dim, Some(2));
        assert_eq!(summary.pattern_id_range, Some((0, 7)));
    }

    #[test]
    fn test_missing_bundle_is_reported_with_its_path() {
        let err = InspectUseCase::new("does/not/exist.npz").execute().unwrap_err();
        assert!(format!("{err:#}").contains("does/not/exist.npz"));
    }
}
