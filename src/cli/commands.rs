// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the three subcommands: `train`, `evaluate`, `inspect`
// and all their configurable flags.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → usize, f64, enum, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::application::{
    evaluate_use_case::EvaluateRequest,
    train_use_case::{DeviceKind, TrainConfig},
};
use crate::domain::losses::LossWeights;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train PatternFinderXL on a train/validation pair of .npz bundles
    Train(TrainArgs),

    /// Score a saved checkpoint on a bundle
    Evaluate(EvaluateArgs),

    /// Print the shape of a bundle
    Inspect(InspectArgs),
}

/// Backend to run on
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceArg {
    Cpu,
    Gpu,
}

impl From<DeviceArg> for DeviceKind {
    fn from(d: DeviceArg) -> Self {
        match d {
            DeviceArg::Cpu => DeviceKind::Cpu,
            DeviceArg::Gpu => DeviceKind::Gpu,
        }
    }
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Training split (.npz with inputs, pattern_ids, future_paths)
    #[arg(long)]
    pub train_npz: PathBuf,

    /// Validation split, same layout as the training split
    #[arg(long)]
    pub val_npz: PathBuf,

    /// Where checkpoints, train_config.json and metrics.csv go
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Features per time step; read from the training bundle when omitted
    #[arg(long)]
    pub feature_dim: Option<usize>,

    /// Longest window the model encodes; the longer bundle's window when omitted
    #[arg(long)]
    pub max_seq_len: Option<usize>,

    /// Number of pattern classes
    #[arg(long, default_value_t = 32)]
    pub num_patterns: usize,

    /// Size of the auxiliary context vector
    #[arg(long, default_value_t = 8)]
    pub context_dim: usize,

    /// Steps in each projected trajectory
    #[arg(long, default_value_t = 20)]
    pub future_steps: usize,

    /// Hidden size of the encoder; must be divisible by --nhead
    #[arg(long, default_value_t = 128)]
    pub d_model: usize,

    /// Attention heads per encoder layer
    #[arg(long, default_value_t = 4)]
    pub nhead: usize,

    /// Stacked encoder layers
    #[arg(long, default_value_t = 4)]
    pub num_layers: usize,

    /// Dropout probability during training
    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    /// Adam learning rate
    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    /// Global L2 gradient-norm limit applied before every step
    #[arg(long, default_value_t = 1.0)]
    pub max_grad_norm: f64,

    #[arg(long, default_value_t = 1.0)]
    pub w_pattern: f64,

    #[arg(long, default_value_t = 1.0)]
    pub w_projection: f64,

    #[arg(long, default_value_t = 0.5)]
    pub w_confidence: f64,

    #[arg(long, default_value_t = 0.2)]
    pub w_context: f64,

    /// Seed for the training shuffle
    #[arg(long)]
    pub seed: Option<u64>,

    /// Also keep epoch_<n>.mpk.gz every N epochs
    #[arg(long)]
    pub save_every: Option<usize>,

    /// Continue from latest.mpk.gz in --checkpoint-dir
    #[arg(long)]
    pub resume: bool,

    #[arg(long, value_enum, default_value_t = DeviceArg::Cpu)]
    pub device: DeviceArg,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            train_npz:      a.train_npz,
            val_npz:        a.val_npz,
            checkpoint_dir: a.checkpoint_dir,
            feature_dim:    a.feature_dim,
            max_seq_len:    a.max_seq_len,
            num_patterns:   a.num_patterns,
            context_dim:    a.context_dim,
            future_steps:   a.future_steps,
            d_model:        a.d_model,
            nhead:          a.nhead,
            num_layers:     a.num_layers,
            dropout:        a.dropout,
            batch_size:     a.batch_size,
            epochs:         a.epochs,
            lr:             a.lr,
            max_grad_norm:  a.max_grad_norm,
            loss_weights:   LossWeights {
                pattern:    a.w_pattern,
                projection: a.w_projection,
                confidence: a.w_confidence,
                context:    a.w_context,
            },
            seed:           a.seed,
            save_every:     a.save_every,
            resume:         a.resume,
            device:         a.device.into(),
        }
    }
}

/// All arguments for the `evaluate` command
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Bundle to score
    #[arg(long)]
    pub npz: PathBuf,

    /// Directory written by `train`
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Checkpoint name inside the directory (best, latest, epoch_5, ...)
    #[arg(long, default_value = "best")]
    pub checkpoint: String,

    /// Defaults to the batch size used for training
    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long, value_enum, default_value_t = DeviceArg::Cpu)]
    pub device: DeviceArg,
}

impl From<EvaluateArgs> for EvaluateRequest {
    fn from(a: EvaluateArgs) -> Self {
        EvaluateRequest {
            npz:            a.npz,
            checkpoint_dir: a.checkpoint_dir,
            checkpoint:     a.checkpoint,
            batch_size:     a.batch_size,
            device:         a.device.into(),
        }
    }
}

/// All arguments for the `inspect` command
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(long)]
    pub npz: PathBuf,
}
