// ============================================================
// Layer 4 — Batch Assembler
// ============================================================
// Turns a shared SequenceStore into a finite stream of
// MarketBatches, one pass per call to `iter()`.
//
//   Training:   indices are reshuffled at the start of every
//               pass (Fisher-Yates via SliceRandom) and a
//               trailing partial batch is dropped.
//   Validation: indices stay in store order and the trailing
//               partial batch is kept.
//
// Batches are built lazily as the iterator advances, so only
// one batch exists at a time.
//
// Reference: rand crate documentation (SliceRandom)

use std::sync::Arc;

use burn::{data::dataloader::batcher::Batcher, prelude::*};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::data::{
    batcher::{MarketBatch, MarketBatcher},
    dataset::SequenceStore,
};
use crate::domain::error::{TrainError, TrainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Training,
    Validation,
}

pub struct BatchAssembler<B: Backend> {
    store:      Arc<SequenceStore>,
    batcher:    MarketBatcher<B>,
    batch_size: usize,
    mode:       BatchMode,
    rng:        StdRng,
}

impl<B: Backend> BatchAssembler<B> {
    /// Shuffled, drop-last assembler. `seed` makes the sequence of pass
    /// orders reproducible; `None` seeds from OS entropy.
    ///
    /// Fails with [`TrainError::EmptyEpoch`] when the store holds fewer
    /// samples than one batch, since every pass would then be empty.
    pub fn training(
        store:      Arc<SequenceStore>,
        batch_size: usize,
        device:     B::Device,
        seed:       Option<u64>,
    ) -> TrainResult<Self> {
        check_batch_size(batch_size)?;
        if store.len() < batch_size {
            return Err(TrainError::EmptyEpoch { samples: store.len(), batch_size });
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None       => StdRng::from_entropy(),
        };
        Ok(Self {
            store,
            batcher: MarketBatcher::new(device),
            batch_size,
            mode: BatchMode::Training,
            rng,
        })
    }

    /// Ordered assembler that keeps the trailing partial batch.
    pub fn validation(
        store:      Arc<SequenceStore>,
        batch_size: usize,
        device:     B::Device,
    ) -> TrainResult<Self> {
        check_batch_size(batch_size)?;
        Ok(Self {
            store,
            batcher: MarketBatcher::new(device),
            batch_size,
            mode: BatchMode::Validation,
            // never drawn from in validation mode
            rng: StdRng::seed_from_u64(0),
        })
    }

    /// Number of batches one pass yields.
    pub fn num_batches(&self) -> usize {
        let n = self.store.len();
        match self.mode {
            BatchMode::Training   => n / self.batch_size,
            BatchMode::Validation => n.div_ceil(self.batch_size),
        }
    }

    /// Draw and discard the orders of `passes` training passes, so a resumed
    /// run continues the shuffle sequence instead of replaying it.
    pub fn skip_passes(&mut self, passes: usize) {
        for _ in 0..passes {
            self.next_order();
        }
    }

    fn next_order(&mut self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.store.len()).collect();
        if self.mode == BatchMode::Training {
            order.shuffle(&mut self.rng);
            order.truncate(self.num_batches() * self.batch_size);
        }
        order
    }

    /// Start a new pass over the store.
    pub fn iter(&mut self) -> BatchIter<'_, B> {
        let order = self.next_order();
        BatchIter {
            store:      &self.store,
            batcher:    &self.batcher,
            batch_size: self.batch_size,
            order,
            cursor:     0,
        }
    }
}

fn check_batch_size(batch_size: usize) -> TrainResult<()> {
    if batch_size == 0 {
        return Err(TrainError::invalid_config("batch_size must be at least 1"));
    }
    Ok(())
}

/// One pass over the store. Yields batches until the order is exhausted.
pub struct BatchIter<'a, B: Backend> {
    store:      &'a SequenceStore,
    batcher:    &'a MarketBatcher<B>,
    batch_size: usize,
    order:      Vec<usize>,
    cursor:     usize,
}

impl<B: Backend> Iterator for BatchIter<'_, B> {
    type Item = MarketBatch<B>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let items = self.order[self.cursor..end]
            .iter()
            .map(|&index| self.store.sample_at(index))
            .collect();
        self.cursor = end;
        Some(self.batcher.batch(items))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.cursor).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl<B: Backend> ExactSizeIterator for BatchIter<'_, B> {}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::testing::synthetic_store;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn ids(batch: &MarketBatch<TestBackend>) -> Vec<i64> {
        batch.pattern_id.clone().into_data().convert::<i64>().to_vec().unwrap()
    }

    fn pass_order(assembler: &mut BatchAssembler<TestBackend>) -> Vec<i64> {
        assembler.iter().flat_map(|b| ids(&b)).collect()
    }

    #[test]
    fn test_training_drops_trailing_partial_batch() {
        let store = Arc::new(synthetic_store(10, None));
        let mut train =
            BatchAssembler::<TestBackend>::training(store, 4, Default::default(), Some(1)).unwrap();
        let sizes: Vec<usize> = train.iter().map(|b| b.size()).collect();
        assert_eq!(sizes, vec![4, 4]);
        assert_eq!(train.num_batches(), 2);
    }

    #[test]
    fn test_validation_keeps_trailing_partial_batch() {
        let store = Arc::new(synthetic_store(10, None));
        let mut val = BatchAssembler::<TestBackend>::validation(store, 4, Default::default()).unwrap();
        let sizes: Vec<usize> = val.iter().map(|b| b.size()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(val.num_batches(), 3);
    }

    #[test]
    fn test_validation_order_is_stable() {
        let store = Arc::new(synthetic_store(10, None));
        let mut val = BatchAssembler::<TestBackend>::validation(store, 3, Default::default()).unwrap();
        let first  = pass_order(&mut val);
        let second = pass_order(&mut val);
        assert_eq!(first, (0..10).collect::<Vec<i64>>());
        assert_eq!(first, second);
    }

    #[test]
    fn test_training_order_changes_between_passes() {
        let store = Arc::new(synthetic_store(64, None));
        let mut train =
            BatchAssembler::<TestBackend>::training(store, 8, Default::default(), Some(7)).unwrap();
        let first  = pass_order(&mut train);
        let second = pass_order(&mut train);
        assert_ne!(first, second);

        // every pass still visits each sample exactly once
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..64).collect::<Vec<i64>>());
    }

    #[test]
    fn test_seed_makes_passes_reproducible() {
        let store = Arc::new(synthetic_store(32, None));
        let mut a = BatchAssembler::<TestBackend>::training(store.clone(), 4, Default::default(), Some(3)).unwrap();
        let mut b = BatchAssembler::<TestBackend>::training(store, 4, Default::default(), Some(3)).unwrap();
        assert_eq!(pass_order(&mut a), pass_order(&mut b));
    }

    #[test]
    fn test_skipped_passes_continue_the_shuffle_sequence() {
        let store = Arc::new(synthetic_store(32, None));
        let mut full = BatchAssembler::<TestBackend>::training(store.clone(), 4, Default::default(), Some(3)).unwrap();
        let epoch_1 = pass_order(&mut full);
        pass_order(&mut full);
        let epoch_3 = pass_order(&mut full);

        let mut resumed = BatchAssembler::<TestBackend>::training(store, 4, Default::default(), Some(3)).unwrap();
        resumed.skip_passes(2);
        let resumed_3 = pass_order(&mut resumed);

        assert_eq!(resumed_3, epoch_3);
        assert_ne!(resumed_3, epoch_1);
    }

    #[test]
    fn test_batches_lack_context_when_store_has_none() {
        let store = Arc::new(synthetic_store(10, None));
        let mut val = BatchAssembler::<TestBackend>::validation(store, 4, Default::default()).unwrap();
        assert!(val.iter().all(|b| b.context_targets.is_none()));

        let store = Arc::new(synthetic_store(10, Some(5)));
        let mut val = BatchAssembler::<TestBackend>::validation(store, 4, Default::default()).unwrap();
        assert!(val.iter().all(|b| b.context_targets.is_some()));
    }

    #[test]
    fn test_training_rejects_store_smaller_than_a_batch() {
        let store = Arc::new(synthetic_store(3, None));
        let err = BatchAssembler::<TestBackend>::training(store.clone(), 4, Default::default(), None)
            .err()
            .unwrap();
        assert!(matches!(err, TrainError::EmptyEpoch { samples: 3, batch_size: 4 }));

        // validation still yields the single partial batch
        let mut val = BatchAssembler::<TestBackend>::validation(store, 4, Default::default()).unwrap();
        assert_eq!(val.iter().count(), 1);
    }

    #[test]
    fn test_zero_batch_size_is_invalid() {
        let store = Arc::new(synthetic_store(3, None));
        let err = BatchAssembler::<TestBackend>::validation(store, 0, Default::default())
            .err()
            .unwrap();
        assert!(matches!(err, TrainError::InvalidConfig { .. }));
    }
}
