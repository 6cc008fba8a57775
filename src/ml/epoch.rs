// ============================================================
// Layer 5 — Epoch Driver
// ============================================================
// One full pass over a BatchAssembler.
//
//   train_pass:    forward → losses → backward(total)
//                  → clip global grad norm → optimizer step
//   validate_pass: forward → losses → arg-max accuracy
//                  (inner backend, so no autodiff graph is built)
//
// Burn's optimizer consumes the gradients on every step, which
// plays the role of zeroing them between batches.
//
// Accumulators are locals of each call. A pass that produces no
// batches returns zero-filled averages and logs a warning.

use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::assembler::BatchAssembler;
use crate::domain::losses::{EpochLosses, LossAccumulator, ValidationMetrics};
use crate::ml::{
    clip::clip_grad_norm,
    loss::LossComposer,
    model::PatternModel,
};

/// Train `model` for one pass and return it with the per-batch loss averages.
pub fn train_pass<B, M, O>(
    mut model:     M,
    optim:         &mut O,
    lr:            f64,
    max_grad_norm: f64,
    batches:       &mut BatchAssembler<B>,
    composer:      &LossComposer,
) -> (M, EpochLosses)
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + PatternModel<B>,
    O: Optimizer<M, B>,
{
    let mut running = LossAccumulator::default();

    for batch in batches.iter() {
        let output = model.forward(batch.inputs.clone());
        let losses = composer.compute_loss(&batch, &output);
        running.push(losses.values());

        let grads = losses.total.backward();
        let mut grads = GradientsParams::from_grads(grads, &model);
        clip_grad_norm::<B, M>(&model, &mut grads, max_grad_norm);
        model = optim.step(lr, model, grads);
    }

    if running.batches() == 0 {
        tracing::warn!("Training pass produced no batches; reporting zero losses");
    }
    (model, running.average())
}

/// Score `model` on one ordered pass without touching its parameters.
pub fn validate_pass<B, M>(
    model:    &M,
    batches:  &mut BatchAssembler<B>,
    composer: &LossComposer,
) -> ValidationMetrics
where
    B: Backend,
    M: PatternModel<B>,
{
    let mut running = LossAccumulator::default();
    let mut correct = 0usize;
    let mut total   = 0usize;

    for batch in batches.iter() {
        let output = model.forward(batch.inputs.clone());
        running.push(composer.compute_loss(&batch, &output).values());

        // argmax(1) returns [batch, 1]; flatten to [batch] before comparing
        let preds = output.pattern_logits.argmax(1).flatten::<1>(0, 1);
        let hits: i64 = preds
            .equal(batch.pattern_id.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();
        correct += hits as usize;
        total   += batch.size();
    }

    if running.batches() == 0 {
        tracing::warn!("Validation pass produced no batches; reporting zero losses");
    }
    ValidationMetrics::new(running.average(), correct, total)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use burn::backend::{Autodiff, NdArray};
    use burn::module::{ModuleVisitor, ParamId};
    use burn::optim::SgdConfig;
    use ndarray::{Array1, Array3};

    use crate::data::dataset::SequenceStore;
    use crate::data::testing::{labelled_store, synthetic_store, FEATURE_DIM, FUTURE_STEPS, NUM_PATTERNS};
    use crate::ml::model::{ModelOutput, PatternFinderXl, PatternFinderXlConfig};

    type Inner = NdArray;
    type TrainBackend = Autodiff<NdArray>;

    /// Reads each window's label from `inputs[:, 0, 0]` and scores classes by
    /// squared distance to it: nearest wins when `agree`, farthest otherwise.
    struct LabelOracle {
        agree: bool,
    }

    impl PatternModel<Inner> for LabelOracle {
        fn forward(&self, inputs: Tensor<Inner, 3>) -> ModelOutput<Inner> {
            let [batch, _, _] = inputs.dims();
            let device = inputs.device();
            let labels = inputs.slice([0..batch, 0..1, 0..1]).reshape([batch, 1]);
            let classes = Tensor::<Inner, 1, Int>::arange(0..NUM_PATTERNS as i64, &device)
                .float()
                .unsqueeze::<2>();
            let distance = (classes.expand([batch, NUM_PATTERNS]) - labels.expand([batch, NUM_PATTERNS]))
                .powf_scalar(2.0);
            let pattern_logits = if self.agree { distance.neg() } else { distance };
            ModelOutput {
                pattern_logits,
                projection: Tensor::zeros([batch, 3, FUTURE_STEPS], &device),
                confidence: Tensor::full([batch], 0.5, &device),
                context:    Tensor::zeros([batch, 1], &device),
            }
        }
    }

    /// Labelled store whose first input feature of the first step is the label.
    fn label_encoded_store(n: usize) -> Arc<SequenceStore> {
        let base = labelled_store(n, None);
        let shape = base.shape();
        let inputs = Array3::from_shape_fn((n, shape.seq_len, shape.feature_dim), |(i, t, f)| {
            let sample = base.get(i).unwrap();
            if t == 0 && f == 0 { sample.pattern_id as f32 } else { sample.inputs[[t, f]] }
        });
        let labels = Array1::from_iter((0..n).map(|i| base.get(i).unwrap().pattern_id));
        let paths = Array3::zeros((n, 3, shape.future_steps));
        Arc::new(SequenceStore::from_arrays(inputs, labels, paths, None, None).unwrap())
    }

    #[test]
    fn test_accuracy_is_one_when_every_prediction_matches() {
        let mut val = BatchAssembler::<Inner>::validation(label_encoded_store(11), 4, Default::default()).unwrap();
        let metrics = validate_pass(&LabelOracle { agree: true }, &mut val, &LossComposer::default());
        assert_eq!(metrics.pattern_acc, 1.0);
    }

    #[test]
    fn test_accuracy_is_zero_when_no_prediction_matches() {
        let mut val = BatchAssembler::<Inner>::validation(label_encoded_store(11), 4, Default::default()).unwrap();
        let metrics = validate_pass(&LabelOracle { agree: false }, &mut val, &LossComposer::default());
        assert_eq!(metrics.pattern_acc, 0.0);
        assert_eq!(metrics.losses.context, 0.0);
        assert!(metrics.losses.total > 0.0);
    }

    #[test]
    fn test_empty_validation_pass_is_zero_filled() {
        let store = Arc::new(synthetic_store(0, None));
        let mut val = BatchAssembler::<Inner>::validation(store, 4, Default::default()).unwrap();
        let metrics = validate_pass(&LabelOracle { agree: true }, &mut val, &LossComposer::default());
        assert_eq!(metrics, ValidationMetrics::default());
    }

    // ─── Training ────────────────────────────────────────────────────────────

    /// Flattened copy of every float parameter, in visiting order.
    struct Snapshot(Vec<f32>);

    impl ModuleVisitor<TrainBackend> for Snapshot {
        fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<TrainBackend, D>) {
            let values: Vec<f32> = tensor.clone().into_data().to_vec().unwrap();
            self.0.extend(values);
        }
    }

    fn snapshot(model: &PatternFinderXl<TrainBackend>) -> Vec<f32> {
        let mut s = Snapshot(Vec::new());
        model.visit(&mut s);
        s.0
    }

    fn tiny_model(context_dim: usize) -> PatternFinderXl<TrainBackend> {
        PatternFinderXlConfig::new(FEATURE_DIM, 8, 2, 1, NUM_PATTERNS, context_dim, FUTURE_STEPS)
            .with_dropout(0.0)
            .init(&Default::default())
    }

    #[test]
    fn test_update_is_bounded_by_clipping() {
        // Targets a million times larger than anything the model emits
        // produce an enormous projection gradient.
        let base = labelled_store(8, None);
        let shape = base.shape();
        let huge_paths = Array3::from_elem((8, 3, shape.future_steps), 1.0e6f32);
        let inputs = Array3::from_shape_fn((8, shape.seq_len, shape.feature_dim), |(i, t, f)| {
            base.get(i).unwrap().inputs[[t, f]]
        });
        let labels = Array1::from_iter((0..8).map(|i| base.get(i).unwrap().pattern_id));
        let store = Arc::new(SequenceStore::from_arrays(inputs, labels, huge_paths, None, None).unwrap());

        let mut train =
            BatchAssembler::<TrainBackend>::training(store, 8, Default::default(), Some(0)).unwrap();
        let model  = tiny_model(1);
        let before = snapshot(&model);

        // Plain SGD with lr = 1 moves parameters by exactly the clipped gradient.
        let mut optim = SgdConfig::new().init();
        let (model, losses) = train_pass(model, &mut optim, 1.0, 1.0, &mut train, &LossComposer::default());
        let after = snapshot(&model);

        assert!(losses.projection > 1.0e10);
        let delta: f64 = before
            .iter()
            .zip(&after)
            .map(|(a, b)| ((*a as f64) - (*b as f64)).powi(2))
            .sum::<f64>()
            .sqrt();
        assert!(delta > 0.0);
        assert!(delta <= 1.0 + 1e-3, "update norm {delta} exceeds the clip limit");
    }

    #[test]
    fn test_training_reduces_loss_and_reports_every_head() {
        let store = Arc::new(labelled_store(32, Some(2)));
        let mut train =
            BatchAssembler::<TrainBackend>::training(store, 8, Default::default(), Some(11)).unwrap();
        let composer = LossComposer::default();
        let mut optim = burn::optim::AdamConfig::new().init();

        let mut model = tiny_model(2);
        let (m, first) = train_pass(model, &mut optim, 1e-2, 1.0, &mut train, &composer);
        model = m;
        let mut last = first;
        for _ in 0..15 {
            let (m, losses) = train_pass(model, &mut optim, 1e-2, 1.0, &mut train, &composer);
            model = m;
            last = losses;
        }

        assert!(first.context > 0.0);
        assert!(last.total < first.total, "loss went from {} to {}", first.total, last.total);
    }
}
