// ============================================================
// Layer 5 — Trainer
// ============================================================
// PatternTrainer owns everything one run mutates: the model,
// the optimizer and the two batch assemblers.
//
//   train_epoch      → train_pass on the autodiff backend
//   validate_epoch   → model.valid(), then validate_pass on
//                      the inner backend (no graph, no dropout)
//   save_checkpoint  → {epoch, model_state, optimizer_state, ...extra}
//   restore_checkpoint → loads both states back, returns epoch
//
// run_training drives the epoch loop on top of it: metrics CSV,
// latest / best / every-N checkpoints, and resume.
//
// Key Burn insight:
//   - model.valid() returns the model on B::InnerBackend
//   - the validation assembler must therefore be built on
//     B::InnerBackend too
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use burn::{
    module::AutodiffModule,
    optim::{AdamConfig, Optimizer},
    tensor::backend::AutodiffBackend,
};
use serde_json::{json, Map, Value};

use crate::application::train_use_case::TrainConfig;
use crate::data::{assembler::BatchAssembler, dataset::SequenceStore};
use crate::domain::error::TrainResult;
use crate::domain::losses::{EpochLosses, ValidationMetrics};
use crate::infra::{
    checkpoint::{save_checkpoint, CheckpointManager, CheckpointRecord},
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::{
    epoch::{train_pass, validate_pass},
    loss::LossComposer,
    model::{PatternFinderXl, PatternModel},
};

pub const LATEST: &str = "latest";
pub const BEST:   &str = "best";

pub struct PatternTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + PatternModel<B>,
    M::InnerModule: PatternModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    model:         M,
    optim:         O,
    composer:      LossComposer,
    lr:            f64,
    max_grad_norm: f64,
    train:         BatchAssembler<B>,
    val:           BatchAssembler<B::InnerBackend>,
    device:        B::Device,
}

impl<B, M, O> PatternTrainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + PatternModel<B>,
    M::InnerModule: PatternModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model:         M,
        optim:         O,
        composer:      LossComposer,
        lr:            f64,
        max_grad_norm: f64,
        train:         BatchAssembler<B>,
        val:           BatchAssembler<B::InnerBackend>,
        device:        B::Device,
    ) -> Self {
        Self { model, optim, composer, lr, max_grad_norm, train, val, device }
    }

    /// One shuffled pass with gradient updates.
    pub fn train_epoch(&mut self, epoch: usize) -> EpochLosses {
        let (model, losses) = train_pass(
            self.model.clone(),
            &mut self.optim,
            self.lr,
            self.max_grad_norm,
            &mut self.train,
            &self.composer,
        );
        self.model = model;
        tracing::info!("[Epoch {}] Train: {}", epoch, losses);
        losses
    }

    /// Move the training shuffle past the passes of epochs already run.
    pub fn skip_train_passes(&mut self, passes: usize) {
        self.train.skip_passes(passes);
    }

    /// One ordered pass without gradients.
    pub fn validate_epoch(&mut self, epoch: usize) -> ValidationMetrics {
        let model = self.model.valid();
        let metrics = validate_pass(&model, &mut self.val, &self.composer);
        tracing::info!("[Epoch {}] Val: {}", epoch, metrics);
        metrics
    }

    pub fn save_checkpoint(
        &self,
        path:  &Path,
        epoch: usize,
        extra: Option<&Map<String, Value>>,
    ) -> TrainResult<()> {
        save_checkpoint::<B, M, O>(path, epoch, &self.model, &self.optim, extra)
    }

    /// Load model and optimizer state from `path`. Returns the trainer
    /// holding the restored state and the epoch the checkpoint was taken at.
    pub fn restore_checkpoint(self, path: &Path) -> TrainResult<(Self, usize)> {
        let record = CheckpointRecord::read(path)?;
        let epoch  = record.epoch()?;
        let model  = record.apply_model::<B, M>(self.model, &self.device)?;
        let optim  = record.apply_optimizer::<B, M, O>(self.optim, &self.device)?;
        tracing::info!("Restored checkpoint '{}' from epoch {}", path.display(), epoch);
        Ok((Self { model, optim, ..self }, epoch))
    }
}

/// What a finished run reports back to the caller.
#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    /// One entry per epoch run in this invocation
    pub history:    Vec<EpochMetrics>,
    /// Epoch and validation total of the best checkpoint, if any
    pub best:       Option<(usize, f64)>,
    /// First epoch run in this invocation (greater than 1 after a resume)
    pub start_epoch: usize,
}

/// Train a PatternFinderXL on `B` for `cfg.epochs` epochs.
///
/// `cfg.feature_dim` must already be resolved against the data.
pub fn run_training<B: AutodiffBackend>(
    cfg:          &TrainConfig,
    train_store:  Arc<SequenceStore>,
    val_store:    Arc<SequenceStore>,
    ckpt_manager: &CheckpointManager,
    device:       B::Device,
) -> Result<TrainingReport> {

    // ── Build model ───────────────────────────────────────────────────────────
    let model_cfg = cfg.model_config()?;
    let model: PatternFinderXl<B> = model_cfg.init(&device);
    tracing::info!(
        "Model ready: {} layers, d_model={}, nhead={}, {} patterns",
        cfg.num_layers, cfg.d_model, cfg.nhead, cfg.num_patterns,
    );

    // ── Adam optimiser ────────────────────────────────────────────────────────
    // m = β1*m + (1-β1)*g        (mean)
    // v = β2*v + (1-β2)*g²       (variance)
    // θ = θ - lr * m / (√v + ε)  (update)
    let optim = AdamConfig::new().with_epsilon(1e-8).init();

    // ── Batch assemblers ──────────────────────────────────────────────────────
    let train = BatchAssembler::<B>::training(train_store, cfg.batch_size, device.clone(), cfg.seed)
        .context("Cannot build the training batches")?;
    let val = BatchAssembler::<B::InnerBackend>::validation(val_store, cfg.batch_size, device.clone())
        .context("Cannot build the validation batches")?;
    tracing::info!(
        "{} training batches and {} validation batches per epoch",
        train.num_batches(),
        val.num_batches(),
    );

    let composer = LossComposer::new(cfg.loss_weights);
    let mut trainer =
        PatternTrainer::new(model, optim, composer, cfg.lr, cfg.max_grad_norm, train, val, device);

    // ── Resume ────────────────────────────────────────────────────────────────
    let mut start_epoch = 1;
    if cfg.resume {
        if ckpt_manager.exists(LATEST) {
            let (restored, epoch) = trainer
                .restore_checkpoint(&ckpt_manager.path_for(LATEST))
                .context("Cannot resume from the latest checkpoint")?;
            trainer = restored;
            trainer.skip_train_passes(epoch);
            start_epoch = epoch + 1;
        } else {
            tracing::warn!(
                "--resume given but '{}' has no latest checkpoint; starting from epoch 1",
                ckpt_manager.dir().display(),
            );
        }
    }
    let mut best = if start_epoch > 1 { previous_best(ckpt_manager) } else { None };

    let metrics_log = MetricsLogger::new(ckpt_manager.dir())?;
    let config_json = serde_json::to_value(cfg)?;
    let mut report  = TrainingReport { start_epoch, ..Default::default() };

    if start_epoch > cfg.epochs {
        tracing::warn!("Checkpoint is already at epoch {}; nothing left to train", start_epoch - 1);
    }

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in start_epoch..=cfg.epochs {
        let train_losses = trainer.train_epoch(epoch);
        let val_metrics  = trainer.validate_epoch(epoch);
        let metrics      = EpochMetrics::new(epoch, train_losses, val_metrics);
        metrics_log.log(&metrics)?;

        let mut extra = Map::new();
        extra.insert("val_total".into(), json!(val_metrics.losses.total));
        extra.insert("pattern_acc".into(), json!(val_metrics.pattern_acc));
        extra.insert("config".into(), config_json.clone());

        trainer.save_checkpoint(&ckpt_manager.path_for(LATEST), epoch, Some(&extra))?;

        let best_total = best.map_or(f64::INFINITY, |(_, total)| total);
        if metrics.is_improvement(best_total) {
            trainer.save_checkpoint(&ckpt_manager.path_for(BEST), epoch, Some(&extra))?;
            best = Some((epoch, val_metrics.losses.total));
            tracing::info!("New best validation total {:.4} at epoch {}", val_metrics.losses.total, epoch);
        }

        if let Some(every) = cfg.save_every {
            if epoch % every == 0 {
                let name = format!("epoch_{epoch}");
                trainer.save_checkpoint(&ckpt_manager.path_for(&name), epoch, Some(&extra))?;
            }
        }

        report.history.push(metrics);
    }

    report.best = best;
    tracing::info!("Training complete!");
    Ok(report)
}

/// Epoch and validation total recorded in an existing `best` checkpoint.
fn previous_best(ckpt_manager: &CheckpointManager) -> Option<(usize, f64)> {
    if !ckpt_manager.exists(BEST) {
        return None;
    }
    let record = match CheckpointRecord::read(&ckpt_manager.path_for(BEST)) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!("Ignoring unreadable best checkpoint: {e}");
            return None;
        }
    };
    let epoch = record.epoch().ok()?;
    let total = record.meta("val_total")?.as_f64()?;
    Some((epoch, total))
}
