// ============================================================
// Layer 3 — Loss Weights and Epoch Metrics
// ============================================================
// The trainer optimises four heads at once. Each head gets
// its own loss and the optimiser only ever sees their
// weighted sum:
//
//   total = w_pattern·pattern + w_proj·projection
//         + w_conf·confidence + w_ctx·context
//
// The types below are plain f64 scalars read back from the
// tensors after each batch, so metrics can be logged, written
// to CSV and compared without touching Burn.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── LossWeights ─────────────────────────────────────────────────────────────
/// Fixed (not learned) multipliers applied to each head's loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    pub pattern:    f64,
    pub projection: f64,
    pub confidence: f64,
    pub context:    f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            pattern:    1.0,
            projection: 1.0,
            confidence: 0.5,
            context:    0.2,
        }
    }
}

impl LossWeights {
    /// Weighted sum of the four head losses.
    pub fn combine(&self, pattern: f64, projection: f64, confidence: f64, context: f64) -> f64 {
        self.pattern * pattern
            + self.projection * projection
            + self.confidence * confidence
            + self.context * context
    }
}

// ─── EpochLosses ─────────────────────────────────────────────────────────────
/// The five loss scalars, either for one batch or averaged over a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochLosses {
    pub total:      f64,
    pub pattern:    f64,
    pub projection: f64,
    pub confidence: f64,
    pub context:    f64,
}

impl fmt::Display for EpochLosses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={:.4} pattern={:.4} projection={:.4} confidence={:.4} context={:.4}",
            self.total, self.pattern, self.projection, self.confidence, self.context,
        )
    }
}

// ─── LossAccumulator ─────────────────────────────────────────────────────────
/// Running sums for one pass. Created fresh by every pass, so nothing
/// carries over between epochs.
#[derive(Debug, Default)]
pub struct LossAccumulator {
    sums:    EpochLosses,
    batches: usize,
}

impl LossAccumulator {
    pub fn push(&mut self, batch: EpochLosses) {
        self.sums.total      += batch.total;
        self.sums.pattern    += batch.pattern;
        self.sums.projection += batch.projection;
        self.sums.confidence += batch.confidence;
        self.sums.context    += batch.context;
        self.batches         += 1;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Per-batch averages. An empty pass yields all zeros instead of
    /// dividing by zero.
    pub fn average(&self) -> EpochLosses {
        if self.batches == 0 {
            return EpochLosses::default();
        }
        let n = self.batches as f64;
        EpochLosses {
            total:      self.sums.total / n,
            pattern:    self.sums.pattern / n,
            projection: self.sums.projection / n,
            confidence: self.sums.confidence / n,
            context:    self.sums.context / n,
        }
    }
}

// ─── ValidationMetrics ───────────────────────────────────────────────────────
/// Averaged validation losses plus pattern classification accuracy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub losses:      EpochLosses,
    /// Fraction of samples whose arg-max class matched the label.
    /// 0.0 when no samples were seen.
    pub pattern_acc: f64,
}

impl ValidationMetrics {
    pub fn new(losses: EpochLosses, correct: usize, total: usize) -> Self {
        let pattern_acc = if total > 0 { correct as f64 / total as f64 } else { 0.0 };
        Self { losses, pattern_acc }
    }
}

impl fmt::Display for ValidationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pattern_acc={:.4}", self.losses, self.pattern_acc)
    }
}
