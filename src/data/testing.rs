//! In-memory stores for unit tests.

use ndarray::{Array1, Array2, Array3};

use crate::data::dataset::SequenceStore;

pub const SEQ_LEN: usize = 4;
pub const FEATURE_DIM: usize = 3;
pub const FUTURE_STEPS: usize = 2;
pub const NUM_PATTERNS: usize = 5;

/// `n` samples labelled with their own index, so batch order can be read
/// back from `pattern_id`.
pub fn synthetic_store(n: usize, context_dim: Option<usize>) -> SequenceStore {
    build(n, context_dim, |i| i as i64)
}

/// `n` samples with labels folded into [`NUM_PATTERNS`] classes.
pub fn labelled_store(n: usize, context_dim: Option<usize>) -> SequenceStore {
    build(n, context_dim, |i| (i % NUM_PATTERNS) as i64)
}

fn build(n: usize, context_dim: Option<usize>, label: impl Fn(usize) -> i64) -> SequenceStore {
    let inputs = Array3::from_shape_fn((n, SEQ_LEN, FEATURE_DIM), |(i, t, f)| {
        ((i + t + f) % 7) as f32 / 7.0
    });
    let pattern_ids = Array1::from_iter((0..n).map(label));
    let future_paths = Array3::from_shape_fn((n, 3, FUTURE_STEPS), |(i, c, s)| {
        ((i * 3 + c + s) % 5) as f32 / 5.0
    });
    let context = context_dim
        .map(|dim| Array2::from_shape_fn((n, dim), |(i, d)| (i + d) as f32 / 10.0));
    SequenceStore::from_arrays(inputs, pattern_ids, future_paths, None, context)
        .expect("synthetic arrays are aligned")
}
