// ============================================================
// Layer 4 — Sequence Sample Store
// ============================================================
// Loads one dataset split from a NumPy `.npz` bundle and serves
// index-addressable samples.
//
// Bundle schema:
//   inputs           [N, seq_len, feature_dim]  float   required
//   pattern_ids      [N]                        integer required
//   future_paths     [N, 3, future_steps]       float   required
//   confidence       [N]                        float   optional (defaults to 1.0)
//   context_targets  [N, context_dim]           float   optional
//
// NumPy stores each array as "<name>.npy" inside the zip
// archive, so names are matched with or without that suffix.
// Float arrays are coerced to f32 and label arrays to i64
// whatever width they were saved with.
//
// Whether context targets exist is decided once, here. It is
// never re-checked per sample.

use std::{fs::File, path::Path};

use burn::data::dataset::Dataset;
use ndarray::{
    Array, Array1, Array2, Array3, ArrayD, Axis, Dimension, Ix1, Ix2, Ix3, IxDyn, OwnedRepr,
};
use ndarray_npy::NpzReader;

use crate::domain::error::{TrainError, TrainResult};
use crate::domain::sample::{DatasetShape, MarketSample, PROJECTION_CHANNELS};

const INPUTS:          &str = "inputs";
const PATTERN_IDS:     &str = "pattern_ids";
const FUTURE_PATHS:    &str = "future_paths";
const CONFIDENCE:      &str = "confidence";
const CONTEXT_TARGETS: &str = "context_targets";

/// Immutable, index-addressable view over one loaded split.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    inputs:          Array3<f32>,
    pattern_ids:     Array1<i64>,
    future_paths:    Array3<f32>,
    confidence:      Array1<f32>,
    context_targets: Option<Array2<f32>>,
}

impl SequenceStore {
    /// Load a split from an `.npz` bundle.
    pub fn load(path: impl AsRef<Path>) -> TrainResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| TrainError::io(path, e))?;

        let mut reader = NpzReader::new(file).map_err(|e| {
            TrainError::format(format!("'{}' is not a readable .npz archive: {e}", path.display()))
        })?;
        let names = reader.names().map_err(|e| {
            TrainError::format(format!("cannot list arrays in '{}': {e}", path.display()))
        })?;

        let inputs       = read_floats::<Ix3>(&mut reader, &required(&names, INPUTS)?)?;
        let pattern_ids  = read_labels(&mut reader, &required(&names, PATTERN_IDS)?)?;
        let future_paths = read_floats::<Ix3>(&mut reader, &required(&names, FUTURE_PATHS)?)?;

        let confidence = match entry_name(&names, CONFIDENCE) {
            Some(entry) => Some(read_floats::<Ix1>(&mut reader, &entry)?),
            None        => None,
        };
        let context_targets = match entry_name(&names, CONTEXT_TARGETS) {
            Some(entry) => Some(read_floats::<Ix2>(&mut reader, &entry)?),
            None        => None,
        };

        let store = Self::from_arrays(inputs, pattern_ids, future_paths, confidence, context_targets)?;
        tracing::info!("Loaded '{}': {}", path.display(), store.shape());
        Ok(store)
    }

    /// Build a store from in-memory arrays, applying the same checks as
    /// [`SequenceStore::load`].
    pub fn from_arrays(
        inputs:          Array3<f32>,
        pattern_ids:     Array1<i64>,
        future_paths:    Array3<f32>,
        confidence:      Option<Array1<f32>>,
        context_targets: Option<Array2<f32>>,
    ) -> TrainResult<Self> {
        let n = inputs.len_of(Axis(0));
        check_leading(PATTERN_IDS, pattern_ids.len(), n)?;
        check_leading(FUTURE_PATHS, future_paths.len_of(Axis(0)), n)?;

        let channels = future_paths.len_of(Axis(1));
        if channels != PROJECTION_CHANNELS {
            return Err(TrainError::format(format!(
                "'{FUTURE_PATHS}' must have {PROJECTION_CHANNELS} channels, found {channels}"
            )));
        }

        let confidence = match confidence {
            Some(c) => {
                check_leading(CONFIDENCE, c.len(), n)?;
                c
            }
            None => Array1::ones(n),
        };
        if let Some(ctx) = &context_targets {
            check_leading(CONTEXT_TARGETS, ctx.nrows(), n)?;
        }

        Ok(Self { inputs, pattern_ids, future_paths, confidence, context_targets })
    }

    pub fn len(&self) -> usize {
        self.inputs.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store-wide flag: true when the bundle carried `context_targets`.
    pub fn has_context(&self) -> bool {
        self.context_targets.is_some()
    }

    pub fn shape(&self) -> DatasetShape {
        DatasetShape {
            len:          self.len(),
            seq_len:      self.inputs.len_of(Axis(1)),
            feature_dim:  self.inputs.len_of(Axis(2)),
            future_steps: self.future_paths.len_of(Axis(2)),
            context_dim:  self.context_targets.as_ref().map(|c| c.ncols()),
        }
    }

    /// Smallest and largest pattern label, `None` for an empty store.
    pub fn pattern_id_range(&self) -> Option<(i64, i64)> {
        let min = self.pattern_ids.iter().copied().min()?;
        let max = self.pattern_ids.iter().copied().max()?;
        Some((min, max))
    }

    /// Sample `index`, or [`TrainError::Index`] when out of range.
    pub fn get(&self, index: usize) -> TrainResult<MarketSample> {
        if index >= self.len() {
            return Err(TrainError::Index { index, len: self.len() });
        }
        Ok(self.sample_at(index))
    }

    /// Caller guarantees `index < len()`.
    pub(crate) fn sample_at(&self, index: usize) -> MarketSample {
        MarketSample {
            inputs:          self.inputs.index_axis(Axis(0), index).to_owned(),
            pattern_id:      self.pattern_ids[index],
            future_paths:    self.future_paths.index_axis(Axis(0), index).to_owned(),
            confidence:      self.confidence[index],
            context_targets: self.context_targets.as_ref().map(|c| c.row(index).to_owned()),
        }
    }
}

impl Dataset<MarketSample> for SequenceStore {
    fn get(&self, index: usize) -> Option<MarketSample> {
        SequenceStore::get(self, index).ok()
    }

    fn len(&self) -> usize {
        SequenceStore::len(self)
    }
}

// ─── Bundle helpers ──────────────────────────────────────────────────────────

fn entry_name(names: &[String], key: &str) -> Option<String> {
    let suffixed = format!("{key}.npy");
    names.iter().find(|n| *n == key || **n == suffixed).cloned()
}

fn required(names: &[String], key: &str) -> TrainResult<String> {
    entry_name(names, key)
        .ok_or_else(|| TrainError::format(format!("required array '{key}' is missing")))
}

fn check_leading(key: &str, found: usize, expected: usize) -> TrainResult<()> {
    if found != expected {
        return Err(TrainError::format(format!(
            "'{key}' has {found} rows but 'inputs' has {expected}"
        )));
    }
    Ok(())
}

fn into_rank<T, D: Dimension>(array: ArrayD<T>, entry: &str) -> TrainResult<Array<T, D>> {
    let found = array.ndim();
    array.into_dimensionality::<D>().map_err(|_| {
        TrainError::format(format!(
            "array '{entry}' has rank {found}, expected {}",
            D::NDIM.unwrap_or(found)
        ))
    })
}

fn read_floats<D: Dimension>(reader: &mut NpzReader<File>, entry: &str) -> TrainResult<Array<f32, D>> {
    if let Ok(array) = reader.by_name::<OwnedRepr<f32>, IxDyn>(entry) {
        return into_rank(array, entry);
    }
    match reader.by_name::<OwnedRepr<f64>, IxDyn>(entry) {
        Ok(array) => into_rank(array.mapv(|v| v as f32), entry),
        Err(e) => Err(TrainError::format(format!(
            "array '{entry}' is not a float32/float64 array: {e}"
        ))),
    }
}

macro_rules! try_integer_widths {
    ($reader:expr, $entry:expr, $($ty:ty),+ $(,)?) => {
        $(
            if let Ok(array) = $reader.by_name::<OwnedRepr<$ty>, IxDyn>($entry) {
                return into_rank(array.mapv(|v| v as i64), $entry);
            }
        )+
    };
}

fn read_labels(reader: &mut NpzReader<File>, entry: &str) -> TrainResult<Array1<i64>> {
    try_integer_widths!(reader, entry, i64, i32, i16, i8, u64, u32, u16, u8);

    // Labels saved through a float array are accepted when every value is whole.
    let floats: Array1<f32> = read_floats::<Ix1>(reader, entry).map_err(|_| {
        TrainError::format(format!("array '{entry}' does not hold integer class labels"))
    })?;
    if floats.iter().any(|v| v.fract() != 0.0) {
        return Err(TrainError::format(format!(
            "array '{entry}' holds non-integral class labels"
        )));
    }
    Ok(floats.mapv(|v| v as i64))
}
