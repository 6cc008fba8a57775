// ============================================================
// Layer 6 — Checkpoints
// ============================================================
// One checkpoint file is one gzip-compressed MessagePack map:
//
//   epoch            → integer
//   model_state      → bytes  (Burn record, NamedMpkBytesRecorder)
//   optimizer_state  → bytes  (Burn record, NamedMpkBytesRecorder)
//   <extra keys>     → any JSON-shaped value
//
// Extra keys are merged after the three base fields, so an extra
// key with the same name replaces the base value. Every save
// writes the whole file; nothing is appended.
//
// Layout of a checkpoint directory:
//
//   checkpoints/
//     train_config.json   ← hyperparameters, needed to rebuild the model
//     latest.mpk.gz       ← written after every epoch
//     best.mpk.gz         ← lowest validation total so far
//     epoch_5.mpk.gz      ← only with --save-every
//     metrics.csv
//
// Reference: Burn Book §5 (Records and Checkpointing)

use std::{
    collections::BTreeMap,
    fmt,
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use burn::{
    module::AutodiffModule,
    optim::Optimizer,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkBytesRecorder, Record, Recorder},
    tensor::backend::AutodiffBackend,
};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{
    de::{self, value::{MapAccessDeserializer, SeqAccessDeserializer}, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::{Map, Value};

use crate::application::train_use_case::TrainConfig;
use crate::domain::error::{TrainError, TrainResult};

pub const EPOCH_KEY:           &str = "epoch";
pub const MODEL_STATE_KEY:     &str = "model_state";
pub const OPTIMIZER_STATE_KEY: &str = "optimizer_state";

const CONFIG_FILE: &str = "train_config.json";
const EXTENSION:   &str = "mpk.gz";

type StateRecorder = NamedMpkBytesRecorder<FullPrecisionSettings>;

// ─── CheckpointField ─────────────────────────────────────────────────────────
/// A value in the checkpoint map: raw record bytes or JSON-shaped metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointField {
    State(Vec<u8>),
    Meta(Value),
}

impl Serialize for CheckpointField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CheckpointField::State(bytes) => serializer.serialize_bytes(bytes),
            CheckpointField::Meta(value)  => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CheckpointField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FieldVisitor)
    }
}

struct FieldVisitor;

impl<'de> Visitor<'de> for FieldVisitor {
    type Value = CheckpointField;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("record bytes or a metadata value")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(CheckpointField::State(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        Ok(CheckpointField::State(v))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(CheckpointField::Meta(Value::Bool(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(CheckpointField::Meta(Value::from(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(CheckpointField::Meta(Value::from(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(CheckpointField::Meta(Value::from(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(CheckpointField::Meta(Value::String(v.to_owned())))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(CheckpointField::Meta(Value::String(v)))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(CheckpointField::Meta(Value::Null))
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(CheckpointField::Meta(Value::Null))
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, seq: A) -> Result<Self::Value, A::Error> {
        Value::deserialize(SeqAccessDeserializer::new(seq)).map(CheckpointField::Meta)
    }

    fn visit_map<A: de::MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
        Value::deserialize(MapAccessDeserializer::new(map)).map(CheckpointField::Meta)
    }
}

// ─── CheckpointRecord ────────────────────────────────────────────────────────
/// Everything stored in one checkpoint file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointRecord {
    fields: BTreeMap<String, CheckpointField>,
}

impl CheckpointRecord {
    pub fn new(epoch: usize, model_state: Vec<u8>, optimizer_state: Vec<u8>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(EPOCH_KEY.to_string(), CheckpointField::Meta(Value::from(epoch)));
        fields.insert(MODEL_STATE_KEY.to_string(), CheckpointField::State(model_state));
        fields.insert(OPTIMIZER_STATE_KEY.to_string(), CheckpointField::State(optimizer_state));
        Self { fields }
    }

    /// Insert caller-supplied fields. Existing keys, including the base
    /// fields, are replaced.
    pub fn merge_extra(&mut self, extra: &Map<String, Value>) {
        for (key, value) in extra {
            self.fields.insert(key.clone(), CheckpointField::Meta(value.clone()));
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn epoch(&self) -> TrainResult<usize> {
        match self.fields.get(EPOCH_KEY) {
            Some(CheckpointField::Meta(v)) => v
                .as_u64()
                .map(|e| e as usize)
                .ok_or_else(|| TrainError::checkpoint(format!("'{EPOCH_KEY}' is not an epoch number: {v}"))),
            Some(CheckpointField::State(_)) => {
                Err(TrainError::checkpoint(format!("'{EPOCH_KEY}' holds raw bytes")))
            }
            None => Err(TrainError::checkpoint(format!("'{EPOCH_KEY}' is missing"))),
        }
    }

    /// A metadata field, if present and not raw bytes.
    pub fn meta(&self, key: &str) -> Option<&Value> {
        match self.fields.get(key) {
            Some(CheckpointField::Meta(v)) => Some(v),
            _ => None,
        }
    }

    /// Raw record bytes stored under `key`.
    pub fn state(&self, key: &str) -> TrainResult<&[u8]> {
        match self.fields.get(key) {
            Some(CheckpointField::State(bytes)) => Ok(bytes),
            Some(CheckpointField::Meta(_)) => {
                Err(TrainError::checkpoint(format!("'{key}' does not hold record bytes")))
            }
            None => Err(TrainError::checkpoint(format!("'{key}' is missing"))),
        }
    }

    /// Rebuild `model` with the parameters stored under `model_state`.
    pub fn apply_model<B: Backend, M: Module<B>>(&self, model: M, device: &B::Device) -> TrainResult<M> {
        let record = decode_state::<B, M::Record>(self.state(MODEL_STATE_KEY)?, device)?;
        Ok(model.load_record(record))
    }

    /// Rebuild `optim` with the moment estimates stored under `optimizer_state`.
    pub fn apply_optimizer<B, M, O>(&self, optim: O, device: &B::Device) -> TrainResult<O>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let record = decode_state::<B, O::Record>(self.state(OPTIMIZER_STATE_KEY)?, device)?;
        Ok(optim.load_record(record))
    }

    /// Write the whole record to `path`, creating parent directories and
    /// replacing any existing file.
    pub fn write(&self, path: &Path) -> TrainResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| TrainError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| TrainError::io(path, e))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        rmp_serde::encode::write_named(&mut encoder, &self.fields)
            .map_err(|e| TrainError::checkpoint(format!("cannot encode '{}': {e}", path.display())))?;
        encoder.finish().map_err(|e| TrainError::io(path, e))?;
        Ok(())
    }

    pub fn read(path: &Path) -> TrainResult<Self> {
        let file = File::open(path).map_err(|e| TrainError::io(path, e))?;
        let decoder = GzDecoder::new(BufReader::new(file));
        let fields = rmp_serde::from_read(decoder)
            .map_err(|e| TrainError::checkpoint(format!("cannot decode '{}': {e}", path.display())))?;
        Ok(Self { fields })
    }
}

/// Serialise a Burn record to bytes.
pub fn encode_state<B: Backend, R: Record<B>>(record: R) -> TrainResult<Vec<u8>> {
    <StateRecorder as Recorder<B>>::record(&StateRecorder::default(), record, ())
        .map_err(|e| TrainError::checkpoint(format!("cannot record state: {e}")))
}

fn decode_state<B: Backend, R: Record<B>>(bytes: &[u8], device: &B::Device) -> TrainResult<R> {
    <StateRecorder as Recorder<B>>::load(&StateRecorder::default(), bytes.to_vec(), device)
        .map_err(|e| TrainError::checkpoint(format!("cannot load state: {e}")))
}

/// Snapshot model and optimizer at `epoch` and write them to `path`.
pub fn save_checkpoint<B, M, O>(
    path:  &Path,
    epoch: usize,
    model: &M,
    optim: &O,
    extra: Option<&Map<String, Value>>,
) -> TrainResult<()>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let model_state = encode_state::<B, _>(model.clone().into_record())?;
    let optim_state = encode_state::<B, _>(optim.to_record())?;

    let mut record = CheckpointRecord::new(epoch, model_state, optim_state);
    if let Some(extra) = extra {
        record.merge_extra(extra);
    }
    record.write(path)?;
    tracing::debug!("Saved checkpoint for epoch {} to '{}'", epoch, path.display());
    Ok(())
}

// ─── CheckpointManager ───────────────────────────────────────────────────────
/// Names files inside one checkpoint directory and persists the run config.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Open an existing directory without creating it.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        anyhow::ensure!(dir.is_dir(), "Checkpoint directory '{}' does not exist", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<name>.mpk.gz`
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{EXTENSION}"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Run 'train' with this checkpoint directory first.",
                path.display()
            )
        })?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config in '{}'", path.display()))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use burn::backend::{Autodiff, NdArray};
    use burn::optim::AdamConfig;
    use serde_json::json;

    use crate::data::assembler::BatchAssembler;
    use crate::data::testing::{labelled_store, FEATURE_DIM, FUTURE_STEPS, NUM_PATTERNS};
    use crate::ml::{
        epoch::train_pass,
        loss::LossComposer,
        model::{PatternFinderXl, PatternFinderXlConfig, PatternModel},
    };

    type TrainBackend = Autodiff<NdArray>;

    fn model_config() -> PatternFinderXlConfig {
        PatternFinderXlConfig::new(FEATURE_DIM, 8, 2, 1, NUM_PATTERNS, 2, FUTURE_STEPS).with_dropout(0.0)
    }

    fn extra(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("extra fields must be an object"),
        }
    }

    #[test]
    fn test_epoch_and_extras_survive_a_round_trip() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ckpt.mpk.gz");

        let mut record = CheckpointRecord::new(7, vec![1, 2, 3], vec![4, 5]);
        record.merge_extra(&extra(json!({
            "val_total":   0.125,
            "pattern_acc": 0.5,
            "note":        "warm start",
            "config":      { "batch_size": 64, "tags": ["a", "b"] },
        })));
        record.write(&path).unwrap();

        let loaded = CheckpointRecord::read(&path).unwrap();
        assert_eq!(loaded.epoch().unwrap(), 7);
        assert_eq!(loaded.meta("val_total"), Some(&json!(0.125)));
        assert_eq!(loaded.meta("note"), Some(&json!("warm start")));
        assert_eq!(loaded.meta("config"), Some(&json!({ "batch_size": 64, "tags": ["a", "b"] })));
        assert_eq!(loaded.state(MODEL_STATE_KEY).unwrap(), &[1, 2, 3]);
        assert_eq!(loaded.state(OPTIMIZER_STATE_KEY).unwrap(), &[4, 5]);
    }

    #[test]
    fn test_colliding_extra_keys_overwrite_base_fields() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.mpk.gz");

        let mut record = CheckpointRecord::new(3, vec![9], vec![9]);
        record.merge_extra(&extra(json!({ "epoch": 42 })));
        record.write(&path).unwrap();
        assert_eq!(CheckpointRecord::read(&path).unwrap().epoch().unwrap(), 42);

        // A later save to the same path replaces the whole file.
        CheckpointRecord::new(4, vec![], vec![]).write(&path).unwrap();
        let loaded = CheckpointRecord::read(&path).unwrap();
        assert_eq!(loaded.epoch().unwrap(), 4);
        assert_eq!(loaded.keys().count(), 3);
    }

    #[test]
    fn test_restore_reproduces_model_outputs() {
        let device = Default::default();
        let dir    = tempfile::tempdir().unwrap();
        let path   = dir.path().join("latest.mpk.gz");

        let store = Arc::new(labelled_store(16, Some(2)));
        let mut train = BatchAssembler::<TrainBackend>::training(store, 8, Default::default(), Some(5)).unwrap();
        let mut optim = AdamConfig::new().with_epsilon(1e-8).init();
        let model: PatternFinderXl<TrainBackend> = model_config().init(&device);
        let (model, _) = train_pass(model, &mut optim, 1e-2, 1.0, &mut train, &LossComposer::default());

        save_checkpoint::<TrainBackend, _, _>(&path, 1, &model, &optim, None).unwrap();

        let fresh: PatternFinderXl<TrainBackend> = model_config().init(&device);
        let record = CheckpointRecord::read(&path).unwrap();
        let restored = record.apply_model::<TrainBackend, _>(fresh, &device).unwrap();
        let _optim = record
            .apply_optimizer::<TrainBackend, PatternFinderXl<TrainBackend>, _>(
                AdamConfig::new().with_epsilon(1e-8).init(),
                &device,
            )
            .unwrap();

        let inputs = Tensor::<TrainBackend, 3>::ones([2, 4, FEATURE_DIM], &device);
        let expected: Vec<f32> = model.forward(inputs.clone()).projection.into_data().to_vec().unwrap();
        let actual:   Vec<f32> = restored.forward(inputs).projection.into_data().to_vec().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_overwritten_state_fails_to_restore() {
        let device = Default::default();
        let dir    = tempfile::tempdir().unwrap();
        let path   = dir.path().join("ckpt.mpk.gz");

        let model: PatternFinderXl<TrainBackend> = model_config().init(&device);
        let optim = AdamConfig::new().init::<TrainBackend, PatternFinderXl<TrainBackend>>();
        let extras = extra(json!({ "model_state": "not a record" }));
        save_checkpoint::<TrainBackend, _, _>(&path, 2, &model, &optim, Some(&extras)).unwrap();

        let record = CheckpointRecord::read(&path).unwrap();
        let err = record.apply_model::<TrainBackend, _>(model, &device).unwrap_err();
        assert!(matches!(err, TrainError::Checkpoint { .. }));
    }

    #[test]
    fn test_garbage_state_bytes_fail_to_decode() {
        let device = Default::default();
        let record = CheckpointRecord::new(1, vec![0xde, 0xad, 0xbe, 0xef], vec![]);
        let model: PatternFinderXl<TrainBackend> = model_config().init(&device);
        let err = record.apply_model::<TrainBackend, _>(model, &device).unwrap_err();
        assert!(matches!(err, TrainError::Checkpoint { .. }));
    }

    #[test]
    fn test_unwritable_path_is_an_io_error() {
        let dir     = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("a-file");
        fs::write(&blocker, b"x").unwrap();

        let err = CheckpointRecord::new(1, vec![], vec![])
            .write(&blocker.join("ckpt.mpk.gz"))
            .unwrap_err();
        assert!(matches!(err, TrainError::Io { .. }));
    }

    #[test]
    fn test_manager_names_files_in_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("run")).unwrap();
        assert_eq!(manager.path_for("best"), dir.path().join("run").join("best.mpk.gz"));
        assert!(!manager.exists("best"));
        assert!(CheckpointManager::open(dir.path().join("missing")).is_err());
    }
}
