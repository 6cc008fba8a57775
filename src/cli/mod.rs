// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap and prints results. All work is
// delegated to Layer 2 (application).
//
//   1. `train`    — trains PatternFinderXL on .npz bundles
//   2. `evaluate` — scores a saved checkpoint on a bundle
//   3. `inspect`  — prints the shape of a bundle
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, InspectArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "patternfinder-trainer",
    version,
    about = "Train the PatternFinderXL market sequence model on .npz bundles."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case. Only routes, never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Evaluate(args) => run_evaluate(args),
            Commands::Inspect(args)  => run_inspect(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!(
        "Starting training on '{}' (validation '{}')",
        args.train_npz.display(),
        args.val_npz.display(),
    );
    let checkpoint_dir = args.checkpoint_dir.clone();
    let report = TrainUseCase::new(args.into()).execute()?;

    if let Some(last) = report.history.last() {
        println!(
            "Finished epoch {} | train_total={:.4} | val_total={:.4} | pattern_acc={:.1}%",
            last.epoch,
            last.train.total,
            last.val.losses.total,
            last.val.pattern_acc * 100.0,
        );
    }
    if let Some((epoch, total)) = report.best {
        println!("Best checkpoint: epoch {epoch} (val_total={total:.4})");
    }
    println!("Checkpoints saved in '{}'", checkpoint_dir.display());
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    let eval = EvaluateUseCase::new(args.into()).execute()?;
    let l = &eval.metrics.losses;
    println!("Checkpoint epoch: {}", eval.epoch);
    println!("  total       {:.4}", l.total);
    println!("  pattern     {:.4}", l.pattern);
    println!("  projection  {:.4}", l.projection);
    println!("  confidence  {:.4}", l.confidence);
    println!("  context     {:.4}", l.context);
    println!("  pattern_acc {:.1}%", eval.metrics.pattern_acc * 100.0);
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    let summary = InspectUseCase::new(args.npz.clone()).execute()?;
    println!("{}: {}", args.npz.display(), summary.shape);
    match summary.pattern_id_range {
        Some((min, max)) => println!("pattern_ids span [{min}, {max}]"),
        None             => println!("bundle is empty"),
    }
    Ok(())
}
