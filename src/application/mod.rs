// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Each use case turns one CLI command into a sequence of calls
// into the lower layers.
//
// Rules for this layer:
//   - No tensor code here (that's Layer 5)
//   - No printing here (that's Layer 1)
//   - Errors leave this layer as anyhow::Error with context
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

/// The training workflow and its configuration
pub mod train_use_case;

/// Score a saved checkpoint on a bundle
pub mod evaluate_use_case;

/// Summarise a bundle without training
pub mod inspect_use_case;
