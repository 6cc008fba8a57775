// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates one training run:
//
//   Step 1: Validate the configuration          (Layer 2)
//   Step 2: Load the train and val bundles      (Layer 4 - data)
//   Step 3: Resolve the config against the data (Layer 2)
//   Step 4: Save config for evaluate/resume     (Layer 6 - infra)
//   Step 5: Run the training loop on the
//           selected backend                    (Layer 5 - ml)
//
// Reference: Burn Book §5 (Training)

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::dataset::SequenceStore;
use crate::domain::{
    error::{TrainError, TrainResult},
    losses::LossWeights,
    sample::DatasetShape,
};
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    model::{PatternFinderXlConfig, DEFAULT_MAX_SEQ_LEN},
    trainer::{run_training, TrainingReport},
};

// ─── Device selection ────────────────────────────────────────────────────────
/// Which Burn backend a run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// NdArray on the host CPU
    #[default]
    Cpu,
    /// WGPU (needs the `wgpu` cargo feature)
    Gpu,
}

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run.
// Serialisable so it can be saved next to the checkpoints and
// reloaded to rebuild the exact same model for evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub train_npz:      PathBuf,
    pub val_npz:        PathBuf,
    pub checkpoint_dir: PathBuf,

    /// Taken from the training bundle when not given
    pub feature_dim:    Option<usize>,
    /// Longest window the model can encode; the longer of the two bundles
    /// when not given
    #[serde(default)]
    pub max_seq_len:    Option<usize>,
    pub num_patterns:   usize,
    pub context_dim:    usize,
    pub future_steps:   usize,
    pub d_model:        usize,
    pub nhead:          usize,
    pub num_layers:     usize,
    pub dropout:        f64,

    pub batch_size:     usize,
    pub epochs:         usize,
    pub lr:             f64,
    pub max_grad_norm:  f64,
    pub loss_weights:   LossWeights,

    pub seed:           Option<u64>,
    pub save_every:     Option<usize>,
    pub resume:         bool,
    pub device:         DeviceKind,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_npz:      PathBuf::from("data/train.npz"),
            val_npz:        PathBuf::from("data/val.npz"),
            checkpoint_dir: PathBuf::from("checkpoints"),
            feature_dim:    None,
            max_seq_len:    None,
            num_patterns:   32,
            context_dim:    8,
            future_steps:   20,
            d_model:        128,
            nhead:          4,
            num_layers:     4,
            dropout:        0.1,
            batch_size:     64,
            epochs:         10,
            lr:             1e-4,
            max_grad_norm:  1.0,
            loss_weights:   LossWeights::default(),
            seed:           None,
            save_every:     None,
            resume:         false,
            device:         DeviceKind::Cpu,
        }
    }
}

impl TrainConfig {
    /// Checks that need no data.
    pub fn validate(&self) -> TrainResult<()> {
        let fail = |msg: String| Err(TrainError::invalid_config(msg));

        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".into());
        }
        if self.epochs == 0 {
            return fail("epochs must be at least 1".into());
        }
        if self.nhead == 0 || self.d_model % self.nhead != 0 {
            return fail(format!("d_model ({}) must be divisible by nhead ({})", self.d_model, self.nhead));
        }
        if self.num_patterns == 0 {
            return fail("num_patterns must be at least 1".into());
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return fail(format!("lr must be positive, got {}", self.lr));
        }
        if !self.max_grad_norm.is_finite() || self.max_grad_norm <= 0.0 {
            return fail(format!("max_grad_norm must be positive, got {}", self.max_grad_norm));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return fail(format!("dropout must be in [0, 1), got {}", self.dropout));
        }
        if self.max_seq_len == Some(0) {
            return fail("max_seq_len must be at least 1".into());
        }
        if self.save_every == Some(0) {
            return fail("save_every must be at least 1".into());
        }
        Ok(())
    }

    /// Fill in `feature_dim` from the training bundle and `max_seq_len` from
    /// the longer of both bundles, then check every shape-bearing
    /// hyperparameter against both.
    pub fn resolve_against(&mut self, train: &DatasetShape, val: &DatasetShape) -> TrainResult<()> {
        match self.feature_dim {
            Some(dim) if dim != train.feature_dim => {
                return Err(TrainError::invalid_config(format!(
                    "feature_dim is {dim} but the training bundle has {} features",
                    train.feature_dim
                )));
            }
            Some(_) => {}
            None => self.feature_dim = Some(train.feature_dim),
        }
        if self.max_seq_len.is_none() {
            self.max_seq_len = Some(train.seq_len.max(val.seq_len));
        }
        check_against(self, val, "validation")?;
        check_against(self, train, "training")
    }

    /// Model hyperparameters. Fails until `feature_dim` is known.
    pub fn model_config(&self) -> TrainResult<PatternFinderXlConfig> {
        let feature_dim = self.feature_dim.ok_or_else(|| {
            TrainError::invalid_config("feature_dim is unknown; pass --feature-dim or load the data first")
        })?;
        Ok(PatternFinderXlConfig::new(
            feature_dim,
            self.d_model,
            self.nhead,
            self.num_layers,
            self.num_patterns,
            self.context_dim,
            self.future_steps,
        )
        .with_dropout(self.dropout)
        .with_max_seq_len(self.max_seq_len.unwrap_or(DEFAULT_MAX_SEQ_LEN)))
    }
}

/// Checks shared by training and evaluation.
pub(crate) fn check_against(cfg: &TrainConfig, shape: &DatasetShape, split: &str) -> TrainResult<()> {
    if let Some(dim) = cfg.feature_dim {
        if dim != shape.feature_dim {
            return Err(TrainError::invalid_config(format!(
                "model expects {dim} features but the {split} bundle has {}",
                shape.feature_dim
            )));
        }
    }
    let max_seq_len = cfg.max_seq_len.unwrap_or(DEFAULT_MAX_SEQ_LEN);
    if shape.seq_len > max_seq_len {
        return Err(TrainError::invalid_config(format!(
            "{split} windows have {} steps but the model encodes at most {max_seq_len}",
            shape.seq_len
        )));
    }
    if shape.future_steps != cfg.future_steps {
        return Err(TrainError::invalid_config(format!(
            "future_steps is {} but the {split} bundle has {}",
            cfg.future_steps, shape.future_steps
        )));
    }
    if let Some(dim) = shape.context_dim {
        if dim != cfg.context_dim {
            return Err(TrainError::invalid_config(format!(
                "context_dim is {} but the {split} bundle has {dim}",
                cfg.context_dim
            )));
        }
    }
    Ok(())
}

/// Labels must index into the pattern head.
pub(crate) fn check_labels(store: &SequenceStore, num_patterns: usize, split: &str) -> TrainResult<()> {
    if let Some((min, max)) = store.pattern_id_range() {
        if min < 0 || max >= num_patterns as i64 {
            return Err(TrainError::invalid_config(format!(
                "{split} labels span [{min}, {max}] but num_patterns is {num_patterns}"
            )));
        }
    }
    Ok(())
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainingReport> {
        let mut cfg = self.config.clone();
        cfg.validate()?;

        // ── Load both splits ─────────────────────────────────────────────────
        let train = SequenceStore::load(&cfg.train_npz)
            .with_context(|| format!("Cannot load training data '{}'", cfg.train_npz.display()))?;
        let val = SequenceStore::load(&cfg.val_npz)
            .with_context(|| format!("Cannot load validation data '{}'", cfg.val_npz.display()))?;

        // ── Resolve shapes ───────────────────────────────────────────────────
        cfg.resolve_against(&train.shape(), &val.shape())?;
        check_labels(&train, cfg.num_patterns, "training")?;
        check_labels(&val, cfg.num_patterns, "validation")?;
        if !train.has_context() {
            tracing::warn!("Training bundle has no context_targets; the context head will not be trained");
        }

        // ── Save config for evaluate / resume ────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir)?;
        if cfg.resume {
            check_resumable(&ckpt_manager, &cfg)?;
        }
        ckpt_manager.save_config(&cfg)?;

        // ── Run training loop (Layer 5) ──────────────────────────────────────
        let (train, val) = (Arc::new(train), Arc::new(val));
        match cfg.device {
            DeviceKind::Cpu => {
                use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};
                let device = NdArrayDevice::default();
                tracing::info!("Using NdArray device: {:?}", device);
                run_training::<Autodiff<NdArray>>(&cfg, train, val, &ckpt_manager, device)
            }
            #[cfg(feature = "wgpu")]
            DeviceKind::Gpu => {
                use burn::backend::{wgpu::WgpuDevice, Autodiff, Wgpu};
                let device = WgpuDevice::default();
                tracing::info!("Using WGPU device: {:?}", device);
                run_training::<Autodiff<Wgpu>>(&cfg, train, val, &ckpt_manager, device)
            }
            #[cfg(not(feature = "wgpu"))]
            DeviceKind::Gpu => {
                anyhow::bail!("This build has no GPU backend; rebuild with the `wgpu` feature")
            }
        }
    }
}

/// A resumed run must rebuild the same architecture it saved.
fn check_resumable(ckpt_manager: &CheckpointManager, cfg: &TrainConfig) -> Result<()> {
    let saved = match ckpt_manager.load_config() {
        Ok(saved) => saved,
        Err(e) => {
            tracing::warn!("Skipping the architecture check before resume: {e:#}");
            return Ok(());
        }
    };
    let saved_model = saved.model_config()?;
    let model = cfg.model_config()?;
    let same = saved_model.feature_dim == model.feature_dim
        && saved_model.d_model == model.d_model
        && saved_model.nhead == model.nhead
        && saved_model.num_layers == model.num_layers
        && saved_model.num_patterns == model.num_patterns
        && saved_model.context_dim == model.context_dim
        && saved_model.future_steps == model.future_steps
        && saved_model.max_seq_len == model.max_seq_len;
    anyhow::ensure!(
        same,
        "Cannot resume: the model hyperparameters differ from those saved in '{}'",
        ckpt_manager.dir().display()
    );
    Ok(())
}
