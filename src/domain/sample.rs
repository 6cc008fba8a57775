use std::fmt;

use ndarray::{Array1, Array2};
use serde::Serialize;

/// Number of trajectory channels predicted per future step (high / low / close).
pub const PROJECTION_CHANNELS: usize = 3;

/// One market window with every supervised target attached.
#[derive(Debug, Clone)]
pub struct MarketSample {
    /// Feature vectors, shape [seq_len, feature_dim]
    pub inputs: Array2<f32>,

    /// Pattern class label
    pub pattern_id: i64,

    /// Future trajectory, shape [3, future_steps]
    pub future_paths: Array2<f32>,

    /// Target for the confidence head, 1.0 when the bundle carries none
    pub confidence: f32,

    /// Auxiliary context vector, shape [context_dim]
    /// `None` for every sample when the bundle has no context targets.
    pub context_targets: Option<Array1<f32>>,
}

impl MarketSample {
    pub fn seq_len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn feature_dim(&self) -> usize {
        self.inputs.ncols()
    }

    pub fn future_steps(&self) -> usize {
        self.future_paths.ncols()
    }
}

/// Dimensions of a loaded bundle, fixed once at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatasetShape {
    pub len:          usize,
    pub seq_len:      usize,
    pub feature_dim:  usize,
    pub future_steps: usize,
    pub context_dim:  Option<usize>,
}

impl fmt::Display for DatasetShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} samples | inputs [{}, {}] | future_paths [{}, {}] | context ",
            self.len, self.seq_len, self.feature_dim, PROJECTION_CHANNELS, self.future_steps,
        )?;
        match self.context_dim {
            Some(dim) => write!(f, "[{dim}]"),
            None      => write!(f, "absent"),
        }
    }
}
