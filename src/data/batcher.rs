// ============================================================
// Layer 4 — Market Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec<MarketSample>
// into batch-leading tensors.
//
//   inputs            [B, seq_len, feature_dim]
//   pattern_id        [B]                         (Int)
//   future_paths      [B, 3, future_steps]
//   confidence_target [B]
//   context_targets   [B, context_dim]            only when the samples carry it
//
// Each field is flattened sample by sample in row-major order
// and handed to TensorData with its final shape, so there is no
// reshape on the device side.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::domain::sample::{MarketSample, PROJECTION_CHANNELS};

// ─── MarketBatch ──────────────────────────────────────────────────────────────
/// One mini-batch. Created for a single iteration and dropped after use.
#[derive(Debug, Clone)]
pub struct MarketBatch<B: Backend> {
    pub inputs:            Tensor<B, 3>,
    pub pattern_id:        Tensor<B, 1, Int>,
    pub future_paths:      Tensor<B, 3>,
    pub confidence_target: Tensor<B, 1>,
    /// Present only when the batch carries context targets. The loss
    /// composer checks this field, not the store-wide flag.
    pub context_targets:   Option<Tensor<B, 2>>,
}

impl<B: Backend> MarketBatch<B> {
    /// Number of samples in the batch
    pub fn size(&self) -> usize {
        self.pattern_id.dims()[0]
    }
}

// ─── MarketBatcher ────────────────────────────────────────────────────────────
/// Holds the target device so batches are created where the model lives.
#[derive(Clone, Debug)]
pub struct MarketBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> MarketBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<MarketSample, MarketBatch<B>> for MarketBatcher<B> {
    /// `items` is never empty: the assembler only yields non-empty slices.
    fn batch(&self, items: Vec<MarketSample>) -> MarketBatch<B> {
        let batch_size   = items.len();
        let seq_len      = items[0].seq_len();
        let feature_dim  = items[0].feature_dim();
        let future_steps = items[0].future_steps();

        let inputs_flat: Vec<f32> = items
            .iter()
            .flat_map(|s| s.inputs.iter().copied())
            .collect();
        let paths_flat: Vec<f32> = items
            .iter()
            .flat_map(|s| s.future_paths.iter().copied())
            .collect();
        let pattern_ids: Vec<i64> = items.iter().map(|s| s.pattern_id).collect();
        let confidence:  Vec<f32> = items.iter().map(|s| s.confidence).collect();

        let inputs = Tensor::<B, 3>::from_data(
            TensorData::new(inputs_flat, [batch_size, seq_len, feature_dim]),
            &self.device,
        );
        let future_paths = Tensor::<B, 3>::from_data(
            TensorData::new(paths_flat, [batch_size, PROJECTION_CHANNELS, future_steps]),
            &self.device,
        );
        let pattern_id = Tensor::<B, 1, Int>::from_data(
            TensorData::new(pattern_ids, [batch_size]),
            &self.device,
        );
        let confidence_target = Tensor::<B, 1>::from_data(
            TensorData::new(confidence, [batch_size]),
            &self.device,
        );

        let context_targets = if items.iter().all(|s| s.context_targets.is_some()) {
            let context_dim = items[0].context_targets.as_ref().map_or(0, |c| c.len());
            let context_flat: Vec<f32> = items
                .iter()
                .filter_map(|s| s.context_targets.as_ref())
                .flat_map(|c| c.iter().copied())
                .collect();
            Some(Tensor::<B, 2>::from_data(
                TensorData::new(context_flat, [batch_size, context_dim]),
                &self.device,
            ))
        } else {
            None
        };

        MarketBatch { inputs, pattern_id, future_paths, confidence_target, context_targets }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use ndarray::{Array1, Array2};

    type TestBackend = NdArray;

    fn sample(id: i64, context: bool) -> MarketSample {
        MarketSample {
            inputs:          Array2::from_shape_fn((4, 2), |(t, f)| (id * 100) as f32 + (t * 2 + f) as f32),
            pattern_id:      id,
            future_paths:    Array2::from_elem((PROJECTION_CHANNELS, 6), id as f32),
            confidence:      0.5,
            context_targets: context.then(|| Array1::from_elem(3, id as f32)),
        }
    }

    #[test]
    fn test_batch_shapes() {
        let batcher = MarketBatcher::<TestBackend>::new(Default::default());
        let batch   = batcher.batch(vec![sample(0, true), sample(1, true), sample(2, true)]);

        assert_eq!(batch.size(), 3);
        assert_eq!(batch.inputs.dims(), [3, 4, 2]);
        assert_eq!(batch.future_paths.dims(), [3, PROJECTION_CHANNELS, 6]);
        assert_eq!(batch.confidence_target.dims(), [3]);
        assert_eq!(batch.context_targets.map(|c| c.dims()), Some([3, 3]));
    }

    #[test]
    fn test_row_major_stacking() {
        let batcher = MarketBatcher::<TestBackend>::new(Default::default());
        let batch   = batcher.batch(vec![sample(0, false), sample(1, false)]);

        let values: Vec<f32> = batch.inputs.into_data().to_vec().unwrap();
        // second sample, timestep 1, feature 1 → 100 + 3
        assert_eq!(values[8 + 3], 103.0);
        let ids: Vec<i64> = batch.pattern_id.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_no_context_field_without_context_targets() {
        let batcher = MarketBatcher::<TestBackend>::new(Default::default());
        let batch   = batcher.batch(vec![sample(0, false), sample(1, false)]);
        assert!(batch.context_targets.is_none());
    }
}
