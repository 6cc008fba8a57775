// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between an .npz file on disk and a tensor batch
// on the training device.
//
//   split.npz
//       │
//       ▼
//   SequenceStore     → loads and validates the arrays once,
//       │               serves samples by index
//       ▼
//   BatchAssembler    → decides the order of one pass
//       │               (shuffled + drop-last, or ordered)
//       ▼
//   MarketBatcher     → stacks samples into MarketBatch tensors
//
// The store is immutable after load, so the training and the
// validation assembler can share one through an Arc.
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Loads .npz bundles and implements Burn's Dataset trait
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Per-epoch batch ordering for training and validation passes
pub mod assembler;

#[cfg(test)]
pub mod testing;
