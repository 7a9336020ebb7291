use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::data::dataloader::{DataLoader, DataLoaderBuilder, Dataset};
use burn::lr_scheduler::exponential::ExponentialLrSchedulerConfig;
use burn::module::AutodiffModule;
use burn::train::checkpoint::{
    ComposedCheckpointingStrategy, KeepLastNCheckpoints, MetricCheckpointingStrategy,
};
use burn::train::metric::LossMetric;
use burn::train::metric::store::{Aggregate, Direction, Split};
use burn::{
    backend::{Autodiff, Wgpu, wgpu::WgpuDevice},
    optim::AdamConfig,
    prelude::*,
    record::CompactRecorder,
    train::{LearnerBuilder, MetricEarlyStoppingStrategy, StoppingCondition},
};
use clap::Args;
use landslide_unet::{
    InputMode, LandslideDataset, SegmentationConfig, UNet, UNetConfig,
    dataset::{SegmentationBatch, SegmentationBatcher},
    export::export_model,
    training::{self, AccuracyMetric, DiceMetric},
};

type MyBackend = Wgpu<f32, i32>;
type MyAutodiffBackend = Autodiff<MyBackend>;

#[derive(Args)]
pub struct TrainArgs {
    /// Data root with train/{images,masks} and test/{images,masks}.
    #[arg(short, long)]
    pub data_dir: PathBuf,

    #[arg(short, long, default_value_t = 50)]
    pub epochs: usize,

    #[arg(short, long, default_value_t = 16)]
    pub batch_size: usize,

    #[arg(short, long, default_value_t = 1e-4)]
    pub lr: f64,

    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    #[arg(short, long, default_value = "artifacts")]
    pub artifact_dir: PathBuf,

    #[arg(long, default_value_t = 64)]
    pub base_channels: usize,

    #[arg(long, default_value_t = 128)]
    pub image_size: usize,

    /// Fraction of the training data held out for validation.
    #[arg(long, default_value_t = 0.2)]
    pub val_ratio: f64,

    /// Stop when validation Dice has not improved for this many epochs.
    #[arg(long, default_value_t = 10)]
    pub patience: usize,

    /// Halve the learning rate every this many epochs.
    #[arg(long, default_value_t = 5)]
    pub lr_decay_epochs: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Cap on the number of training samples to load.
    #[arg(long)]
    pub max_train_samples: Option<usize>,

    /// Cap on the number of test samples to load.
    #[arg(long)]
    pub max_test_samples: Option<usize>,

    #[arg(short, long, action, default_value = "false")]
    pub grayscale: bool,
}

fn create_artifact_dir(artifact_dir: &str) {
    std::fs::remove_dir_all(artifact_dir).ok();
    std::fs::create_dir_all(artifact_dir).ok();
}

/// Per-step decay factor that halves the learning rate once every
/// `lr_decay_epochs` epochs.
fn decay_gamma(lr_decay_epochs: usize, steps_per_epoch: usize) -> f64 {
    0.5f64.powf(1.0 / (lr_decay_epochs * steps_per_epoch).max(1) as f64)
}

/// Checkpoint stems (paths without the `.mpk` extension) of saved model
/// records under `checkpoint_dir`, sorted by epoch. Optimizer and scheduler
/// records are skipped.
fn model_checkpoint_stems(checkpoint_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(checkpoint_dir) else {
        return Vec::new();
    };

    let mut stems: Vec<(usize, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?;
            let epoch = name
                .strip_prefix("model-")?
                .strip_suffix(".mpk")?
                .parse::<usize>()
                .ok()?;
            Some((epoch, path.with_extension("")))
        })
        .collect();

    stems.sort_by_key(|(epoch, _)| *epoch);
    stems.into_iter().map(|(_, stem)| stem).collect()
}

/// Re-scores the surviving epoch checkpoints on the validation split and
/// returns whichever weights reach the highest Dice, falling back to the
/// final-epoch model when no checkpoint beats it or none can be read.
fn restore_best_by_dice(
    checkpoint_dir: &Path,
    model_config: &UNetConfig,
    device: &WgpuDevice,
    dataloader_valid: Arc<dyn DataLoader<SegmentationBatch<MyBackend>>>,
    final_model: UNet<MyBackend>,
) -> UNet<MyBackend> {
    let mut best_model = final_model;
    let mut best_dice = training::evaluate(&best_model, dataloader_valid.clone()).dice;
    tracing::info!(dice = best_dice, "final-epoch validation Dice");

    for stem in model_checkpoint_stems(checkpoint_dir) {
        let candidate = match model_config
            .init::<MyBackend>(device)
            .load_file(&stem, &CompactRecorder::new(), device)
        {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!(checkpoint = %stem.display(), "skipping unreadable checkpoint: {e}");
                continue;
            }
        };

        let dice = training::evaluate(&candidate, dataloader_valid.clone()).dice;
        tracing::info!(checkpoint = %stem.display(), dice, "checkpoint validation Dice");

        if dice > best_dice {
            best_dice = dice;
            best_model = candidate;
        }
    }

    tracing::info!(dice = best_dice, "restored best validation Dice weights");
    best_model
}

pub fn run(args: &TrainArgs) -> Result<()> {
    let artifact_dir = args
        .artifact_dir
        .to_str()
        .context("Artifact dir is not valid UTF-8")?;
    create_artifact_dir(artifact_dir);

    tracing::info!("Initializing device...");
    let device = WgpuDevice::default();

    MyAutodiffBackend::seed(args.seed);

    let input_mode = if args.grayscale {
        InputMode::Grayscale
    } else {
        InputMode::RGB
    };
    let seg_config = SegmentationConfig::new(input_mode, [args.image_size, args.image_size]);

    tracing::info!(data_dir = %args.data_dir.display(), "Loading datasets...");
    let dataset = LandslideDataset::load(
        &args.data_dir.join("train"),
        &seg_config,
        args.max_train_samples,
    )?;
    let (train_dataset, valid_dataset) = dataset.split(1.0 - args.val_ratio, args.seed);
    let test_dataset = LandslideDataset::load(
        &args.data_dir.join("test"),
        &seg_config,
        args.max_test_samples,
    )?;

    tracing::info!(
        train = train_dataset.len(),
        valid = valid_dataset.len(),
        test = test_dataset.len(),
        "datasets ready"
    );

    let steps_per_epoch = train_dataset.len().div_ceil(args.batch_size).max(1);

    let batcher_train =
        SegmentationBatcher::<MyAutodiffBackend>::new(device.clone(), seg_config.clone());
    let batcher_valid = SegmentationBatcher::<MyBackend>::new(device.clone(), seg_config.clone());

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(args.batch_size)
        .num_workers(args.num_workers)
        .shuffle(args.seed)
        .build(train_dataset);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid.clone())
        .batch_size(args.batch_size)
        .shuffle(args.seed)
        .build(valid_dataset);

    let dataloader_test = DataLoaderBuilder::new(batcher_valid)
        .batch_size(args.batch_size)
        .build(test_dataset);

    tracing::info!(
        base_channels = args.base_channels,
        "Creating U-Net model..."
    );
    let model_config = UNetConfig::new([args.image_size, args.image_size])
        .with_input_channels(seg_config.input_mode.channels())
        .with_base_channels(args.base_channels);
    let model = model_config.init::<MyAutodiffBackend>(&device);

    let optimizer = AdamConfig::new().init();

    // The learner steps schedulers per iteration, so spread the halving over
    // lr_decay_epochs worth of steps.
    let gamma = decay_gamma(args.lr_decay_epochs, steps_per_epoch);
    let lr_scheduler = ExponentialLrSchedulerConfig::new(args.lr, gamma)
        .init()
        .map_err(|e| anyhow::anyhow!("Invalid learning rate schedule: {e}"))?;

    tracing::info!("Building learner...");
    let learner = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .metric_train_numeric(DiceMetric::new())
        .metric_valid_numeric(DiceMetric::new())
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .with_checkpointing_strategy(
            ComposedCheckpointingStrategy::builder()
                .add(KeepLastNCheckpoints::new(2))
                .add(MetricCheckpointingStrategy::new::<DiceMetric<MyBackend>>(
                    Aggregate::Mean,
                    Direction::Highest,
                    Split::Valid,
                ))
                .build(),
        )
        .early_stopping(MetricEarlyStoppingStrategy::new::<DiceMetric<MyBackend>>(
            Aggregate::Mean,
            Direction::Highest,
            Split::Valid,
            StoppingCondition::NoImprovementSince {
                n_epochs: args.patience,
            },
        ))
        .devices(vec![device.clone()])
        .num_epochs(args.epochs)
        .summary()
        .build(model, optimizer, lr_scheduler);

    tracing::info!("Starting training...");
    let model_trained = learner.fit(dataloader_train, dataloader_valid.clone());

    // Early stopping can leave the final epoch well past the best one, so
    // pick the checkpoint with the highest validation Dice for export.
    let model_best = restore_best_by_dice(
        &args.artifact_dir.join("checkpoint"),
        &model_config,
        &device,
        dataloader_valid,
        model_trained.valid(),
    );

    tracing::info!("Evaluating on test set...");
    let summary = training::evaluate(&model_best, dataloader_test);
    tracing::info!(
        loss = summary.loss,
        dice = summary.dice,
        accuracy = summary.accuracy,
        samples = summary.num_samples,
        "test evaluation"
    );

    export_model(model_best, &model_config, &args.artifact_dir.join("export"))?;

    tracing::info!("Training completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::lr_scheduler::LrScheduler;

    #[test]
    fn learning_rate_halves_after_decay_window() {
        let lr = 1e-4;
        let decay_epochs = 5;
        let steps_per_epoch = 20;

        let gamma = decay_gamma(decay_epochs, steps_per_epoch);
        let mut scheduler = ExponentialLrSchedulerConfig::new(lr, gamma)
            .init()
            .expect("valid schedule");

        let mut last = lr;
        for _ in 0..decay_epochs * steps_per_epoch {
            last = scheduler.step();
        }

        let relative_error = (last - lr / 2.0).abs() / (lr / 2.0);
        assert!(relative_error < 0.01, "lr after decay window = {last}");
    }

    #[test]
    fn decay_gamma_handles_degenerate_window() {
        let gamma = decay_gamma(0, 0);
        assert!(gamma > 0.0 && gamma <= 1.0);
    }

    #[test]
    fn checkpoint_stems_are_sorted_by_epoch() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "model-10.mpk",
            "model-2.mpk",
            "optim-10.mpk",
            "scheduler-10.mpk",
            "model-final.mpk",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let stems = model_checkpoint_stems(dir.path());
        let names: Vec<_> = stems
            .iter()
            .map(|s| s.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();

        assert_eq!(names, vec!["model-2", "model-10"]);
    }

    #[test]
    fn missing_checkpoint_dir_yields_no_stems() {
        let dir = tempfile::tempdir().unwrap();
        let stems = model_checkpoint_stems(&dir.path().join("does-not-exist"));
        assert!(stems.is_empty());
    }
}
