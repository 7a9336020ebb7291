use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{BinFileRecorder, CompactRecorder, FullPrecisionSettings, RecorderError};
use thiserror::Error;

use crate::model::{UNet, UNetConfig};

/// File stem of the checkpoint-format record (`.mpk`).
pub const CHECKPOINT_STEM: &str = "model";
/// File stem of the portable full-precision record (`.bin`) consumed by
/// web/WASM inference targets.
pub const PORTABLE_STEM: &str = "model_portable";
/// Name of the serialized model configuration.
pub const CONFIG_FILE: &str = "model.json";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to create export directory: {path}")]
    DirectoryCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write model config: {path}")]
    ConfigWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize model record: {path}")]
    RecordFailed {
        path: PathBuf,
        #[source]
        source: RecorderError,
    },
}

/// Saves the trained model into `dir` in two on-disk formats plus its
/// configuration:
///
/// - `model.mpk`: named-MessagePack record, the same format used for
///   training checkpoints.
/// - `model_portable.bin`: full-precision bincode record for web/WASM
///   deployment targets.
/// - `model.json`: the [UNetConfig], so the module graph can be rebuilt
///   before loading either record.
pub fn export_model<B: Backend>(
    model: UNet<B>,
    config: &UNetConfig,
    dir: &Path,
) -> Result<(), ExportError> {
    std::fs::create_dir_all(dir).map_err(|source| ExportError::DirectoryCreateFailed {
        path: dir.to_path_buf(),
        source,
    })?;

    let config_path = dir.join(CONFIG_FILE);
    config
        .save(&config_path)
        .map_err(|source| ExportError::ConfigWriteFailed {
            path: config_path,
            source,
        })?;

    let checkpoint_path = dir.join(CHECKPOINT_STEM);
    model
        .clone()
        .save_file(checkpoint_path.clone(), &CompactRecorder::new())
        .map_err(|source| ExportError::RecordFailed {
            path: checkpoint_path,
            source,
        })?;

    let portable_path = dir.join(PORTABLE_STEM);
    model
        .save_file(
            portable_path.clone(),
            &BinFileRecorder::<FullPrecisionSettings>::new(),
        )
        .map_err(|source| ExportError::RecordFailed {
            path: portable_path,
            source,
        })?;

    tracing::info!(dir = %dir.display(), "model exported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn writes_both_record_formats_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();

        let config = UNetConfig::new([16, 16]).with_base_channels(2);
        let model = config.init::<TestBackend>(&device);

        export_model(model, &config, dir.path()).unwrap();

        assert!(dir.path().join("model.mpk").is_file());
        assert!(dir.path().join("model_portable.bin").is_file());
        assert!(dir.path().join("model.json").is_file());
    }

    #[test]
    fn checkpoint_round_trips_into_a_fresh_model() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();

        let config = UNetConfig::new([16, 16]).with_base_channels(2);
        let model = config.init::<TestBackend>(&device);
        export_model(model, &config, dir.path()).unwrap();

        let restored = UNetConfig::load(dir.path().join(CONFIG_FILE))
            .unwrap()
            .init::<TestBackend>(&device)
            .load_file(dir.path().join(CHECKPOINT_STEM), &CompactRecorder::new(), &device)
            .unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        assert_eq!(restored.forward(input).dims(), [1, 1, 16, 16]);
    }
}
