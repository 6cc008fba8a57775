// ============================================================
// Layer 5 — Loss Composer
// ============================================================
// Five scalars per batch:
//
//   pattern     cross-entropy(pattern_logits, pattern_id)
//   projection  MSE(projection, future_paths) over B × 3 × steps
//   confidence  BCE(confidence, confidence_target)
//   context     MSE(context, context_targets) if the batch has
//               context targets, else exactly 0.0
//   total       weighted sum of the four above
//
// The context decision looks at the batch, never at the store.
// A batch without context targets therefore scores zero context
// loss even if the store declared them.
//
// All three trajectory channels share one MSE with equal weight.

use burn::{
    nn::loss::{CrossEntropyLossConfig, MseLoss, Reduction},
    prelude::*,
};

use crate::data::batcher::MarketBatch;
use crate::domain::losses::{EpochLosses, LossWeights};
use crate::ml::model::ModelOutput;

/// log(0) is clamped to this value, so a saturated confidence head gives a
/// large finite loss instead of infinity.
const LOG_FLOOR: f64 = -100.0;

/// Per-batch losses, each a single-element tensor.
#[derive(Debug, Clone)]
pub struct LossBreakdown<B: Backend> {
    pub total:      Tensor<B, 1>,
    pub pattern:    Tensor<B, 1>,
    pub projection: Tensor<B, 1>,
    pub confidence: Tensor<B, 1>,
    pub context:    Tensor<B, 1>,
}

impl<B: Backend> LossBreakdown<B> {
    /// Read the five scalars back to the host.
    pub fn values(&self) -> EpochLosses {
        EpochLosses {
            total:      scalar(&self.total),
            pattern:    scalar(&self.pattern),
            projection: scalar(&self.projection),
            confidence: scalar(&self.confidence),
            context:    scalar(&self.context),
        }
    }
}

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f64 {
    t.clone().into_scalar().elem::<f64>()
}

#[derive(Debug, Clone, Default)]
pub struct LossComposer {
    weights: LossWeights,
}

impl LossComposer {
    pub fn new(weights: LossWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &LossWeights {
        &self.weights
    }

    pub fn compute_loss<B: Backend>(
        &self,
        batch:  &MarketBatch<B>,
        output: &ModelOutput<B>,
    ) -> LossBreakdown<B> {
        let device = output.pattern_logits.device();
        let mse = MseLoss::new();

        let pattern = CrossEntropyLossConfig::new()
            .init(&device)
            .forward(output.pattern_logits.clone(), batch.pattern_id.clone());

        let projection = mse.forward(
            output.projection.clone(),
            batch.future_paths.clone(),
            Reduction::Mean,
        );

        let confidence = binary_cross_entropy(
            output.confidence.clone(),
            batch.confidence_target.clone(),
        );

        let context = match &batch.context_targets {
            Some(targets) => mse.forward(output.context.clone(), targets.clone(), Reduction::Mean),
            None          => Tensor::zeros([1], &device),
        };

        let w = &self.weights;
        let total = pattern.clone().mul_scalar(w.pattern)
            + projection.clone().mul_scalar(w.projection)
            + confidence.clone().mul_scalar(w.confidence)
            + context.clone().mul_scalar(w.context);

        LossBreakdown { total, pattern, projection, confidence, context }
    }
}

/// Mean binary cross-entropy between probabilities and soft targets in [0, 1].
fn binary_cross_entropy<B: Backend>(probs: Tensor<B, 1>, targets: Tensor<B, 1>) -> Tensor<B, 1> {
    let log_p     = probs.clone().log().clamp_min(LOG_FLOOR);
    let log_not_p = probs.neg().add_scalar(1.0).log().clamp_min(LOG_FLOOR);
    let per_sample = targets.clone() * log_p + targets.neg().add_scalar(1.0) * log_not_p;
    per_sample.mean().neg()
}
