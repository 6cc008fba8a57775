// ============================================================
// Layer 5 — Evaluator
// ============================================================
// Rebuilds a PatternFinderXL from its config, loads the weights
// from a checkpoint and scores it with one validation pass.
//
// Runs on a plain (non-autodiff) backend, so dropout is inactive
// and no graph is recorded.

use std::{path::Path, sync::Arc};

use burn::prelude::*;

use crate::data::{assembler::BatchAssembler, dataset::SequenceStore};
use crate::domain::error::TrainResult;
use crate::domain::losses::ValidationMetrics;
use crate::infra::checkpoint::CheckpointRecord;
use crate::ml::{
    epoch::validate_pass,
    loss::LossComposer,
    model::{PatternFinderXl, PatternFinderXlConfig},
};

/// Result of scoring one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Epoch stored in the checkpoint
    pub epoch:   usize,
    pub metrics: ValidationMetrics,
}

pub fn evaluate_checkpoint<B: Backend>(
    model_cfg:  &PatternFinderXlConfig,
    checkpoint: &Path,
    store:      Arc<SequenceStore>,
    batch_size: usize,
    composer:   &LossComposer,
    device:     B::Device,
) -> TrainResult<Evaluation> {
    let record = CheckpointRecord::read(checkpoint)?;
    let epoch  = record.epoch()?;
    let model: PatternFinderXl<B> = record.apply_model(model_cfg.init(&device), &device)?;
    tracing::info!("Loaded '{}' (epoch {})", checkpoint.display(), epoch);

    let mut batches = BatchAssembler::<B>::validation(store, batch_size, device)?;
    let metrics = validate_pass(&model, &mut batches, composer);
    Ok(Evaluation { epoch, metrics })
}

#[cfg(test)]
mod tests {
    use super::*;

    use burn::backend::{Autodiff, NdArray};
    use burn::module::AutodiffModule;
    use burn::optim::AdamConfig;

    use crate::data::testing::{labelled_store, FEATURE_DIM, FUTURE_STEPS, NUM_PATTERNS};
    use crate::infra::checkpoint::save_checkpoint;

    #[test]
    fn test_evaluation_matches_the_saved_model() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("best.mpk.gz");
        let cfg  = PatternFinderXlConfig::new(FEATURE_DIM, 8, 2, 1, NUM_PATTERNS, 2, FUTURE_STEPS);

        let trained: PatternFinderXl<Autodiff<NdArray>> = cfg.init(&Default::default());
        let optim = AdamConfig::new().init::<Autodiff<NdArray>, PatternFinderXl<Autodiff<NdArray>>>();
        save_checkpoint::<Autodiff<NdArray>, _, _>(&path, 4, &trained, &optim, None).unwrap();

        let store = Arc::new(labelled_store(7, Some(2)));
        let composer = LossComposer::default();
        let eval = evaluate_checkpoint::<NdArray>(&cfg, &path, store.clone(), 3, &composer, Default::default())
            .unwrap();

        let mut batches = BatchAssembler::<NdArray>::validation(store, 3, Default::default()).unwrap();
        let expected = validate_pass(&trained.valid(), &mut batches, &composer);

        assert_eq!(eval.epoch, 4);
        assert_eq!(eval.metrics, expected);
    }
}
