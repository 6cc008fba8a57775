// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All tensor math lives in this layer.
//
//   model.rs     — the PatternModel contract and PatternFinderXL,
//                  a transformer encoder with four heads:
//                  • pattern logits
//                  • 3-channel trajectory projection
//                  • sigmoid confidence
//                  • auxiliary context vector
//
//   loss.rs      — per-batch multi-task losses and their
//                  weighted total
//
//   clip.rs      — global L2 gradient-norm clipping
//
//   epoch.rs     — one training pass and one validation pass
//
//   trainer.rs   — PatternTrainer plus the epoch loop with
//                  checkpoint cadence and resume
//
//   evaluator.rs — scores a saved checkpoint
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Vaswani et al. (2017) Attention Is All You Need

/// Model contract and the transformer encoder implementation
pub mod model;

/// Multi-task loss composition
pub mod loss;

/// Gradient clipping over all parameters at once
pub mod clip;

/// Training and validation passes
pub mod epoch;

/// Training loop with validation and checkpointing
pub mod trainer;

/// Checkpoint scoring
pub mod evaluator;
