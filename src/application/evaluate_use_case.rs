// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Scores a saved checkpoint on one bundle:
//
//   Step 1: Load train_config.json        (Layer 6 - infra)
//   Step 2: Load the bundle and check it
//           against the saved config      (Layer 4 - data)
//   Step 3: Rebuild the model, load the
//           weights, run one validation
//           pass                          (Layer 5 - ml)

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};

use crate::application::train_use_case::{check_against, check_labels, DeviceKind};
use crate::data::dataset::SequenceStore;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    evaluator::{evaluate_checkpoint, Evaluation},
    loss::LossComposer,
};

#[derive(Debug, Clone)]
pub struct EvaluateRequest {
    pub npz:            PathBuf,
    pub checkpoint_dir: PathBuf,
    /// File stem inside the checkpoint directory, e.g. `best` or `epoch_5`
    pub checkpoint:     String,
    /// Falls back to the batch size used for training
    pub batch_size:     Option<usize>,
    pub device:         DeviceKind,
}

pub struct EvaluateUseCase {
    request: EvaluateRequest,
}

impl EvaluateUseCase {
    pub fn new(request: EvaluateRequest) -> Self {
        Self { request }
    }

    pub fn execute(&self) -> Result<Evaluation> {
        let req = &self.request;
        let ckpt_manager = CheckpointManager::open(&req.checkpoint_dir)?;
        let cfg = ckpt_manager.load_config()?;

        let path = ckpt_manager.path_for(&req.checkpoint);
        anyhow::ensure!(path.is_file(), "No checkpoint named '{}' in '{}'", req.checkpoint, req.checkpoint_dir.display());

        let store = SequenceStore::load(&req.npz)
            .with_context(|| format!("Cannot load evaluation data '{}'", req.npz.display()))?;
        check_against(&cfg, &store.shape(), "evaluation")?;
        check_labels(&store, cfg.num_patterns, "evaluation")?;

        let model_cfg  = cfg.model_config()?;
        let composer   = LossComposer::new(cfg.loss_weights);
        let batch_size = req.batch_size.unwrap_or(cfg.batch_size);
        anyhow::ensure!(batch_size > 0, "batch_size must be at least 1");
        let store = Arc::new(store);

        let evaluation = match req.device {
            DeviceKind::Cpu => {
                use burn::backend::{ndarray::NdArrayDevice, NdArray};
                evaluate_checkpoint::<NdArray>(&model_cfg, &path, store, batch_size, &composer, NdArrayDevice::default())?
            }
            #[cfg(feature = "wgpu")]
            DeviceKind::Gpu => {
                use burn::backend::{wgpu::WgpuDevice, Wgpu};
                evaluate_checkpoint::<Wgpu>(&model_cfg, &path, store, batch_size, &composer, WgpuDevice::default())?
            }
            #[cfg(not(feature = "wgpu"))]
            DeviceKind::Gpu => {
                anyhow::bail!("This build has no GPU backend; rebuild with the `wgpu` feature")
            }
        };
        Ok(evaluation)
    }
}
