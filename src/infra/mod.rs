// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// File formats the run leaves behind:
//
//   checkpoint.rs — checkpoint records
//                   gzip + MessagePack map holding the epoch,
//                   model and optimizer state (Burn records)
//                   and any extra fields. Also saves/loads
//                   TrainConfig as JSON so evaluation can
//                   rebuild the model.
//
//   metrics.rs    — training metrics logging
//                   one CSV row per epoch for later analysis
//                   and plotting.
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Checkpoint files and the run config
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
