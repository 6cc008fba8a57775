// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that describe what the training pipeline
// works with. No Burn types live here, and nothing here
// touches the filesystem.
//
//   sample.rs — one market window plus its supervised targets,
//               and the shape summary of a loaded bundle
//   losses.rs — loss weights, per-batch loss values, and the
//               per-epoch averages reported by the trainer
//   error.rs  — the error taxonomy shared by every layer below
//               the CLI
//
// Reference: Rust Book §5 (Structs), §9 (Error Handling)

/// A single training window and the dataset shape summary
pub mod sample;

/// Loss weights, loss values and epoch metrics
pub mod losses;

/// Error types for loading, batching, training and checkpointing
pub mod error;
