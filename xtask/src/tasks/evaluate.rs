use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::data::dataloader::{DataLoaderBuilder, Dataset};
use burn::{
    backend::{Wgpu, wgpu::WgpuDevice},
    prelude::*,
    record::CompactRecorder,
};
use clap::Args;
use landslide_unet::{
    InputMode, LandslideDataset, SegmentationConfig, UNetConfig,
    dataset::SegmentationBatcher,
    export::{CHECKPOINT_STEM, CONFIG_FILE},
    training,
};

#[derive(Args)]
pub struct EvaluateArgs {
    /// Dataset root with images/ and masks/ subdirectories.
    #[arg(short, long)]
    pub data_dir: PathBuf,

    /// Directory holding an exported model (model.json + model.mpk).
    #[arg(short, long, default_value = "artifacts/export")]
    pub model_dir: PathBuf,

    #[arg(short, long, default_value_t = 16)]
    pub batch_size: usize,

    /// Cap on the number of samples to load.
    #[arg(long)]
    pub max_samples: Option<usize>,
}

pub fn run(args: &EvaluateArgs) -> Result<()> {
    type MyBackend = Wgpu<f32, i32>;

    let device = WgpuDevice::default();

    let config_path = args.model_dir.join(CONFIG_FILE);
    let model_config = UNetConfig::load(&config_path).map_err(|e| {
        anyhow::anyhow!("Failed to load model config {}: {e}", config_path.display())
    })?;

    let input_mode = match model_config.input_channels {
        1 => InputMode::Grayscale,
        _ => InputMode::RGB,
    };
    let seg_config = SegmentationConfig::new(input_mode, model_config.input_size);

    tracing::info!(model_dir = %args.model_dir.display(), "Loading model...");
    let model = model_config
        .init::<MyBackend>(&device)
        .load_file(
            args.model_dir.join(CHECKPOINT_STEM),
            &CompactRecorder::new(),
            &device,
        )
        .context("Failed to load model checkpoint")?;

    tracing::info!(data_dir = %args.data_dir.display(), "Loading dataset...");
    let dataset = LandslideDataset::load(&args.data_dir, &seg_config, args.max_samples)?;
    tracing::info!(samples = dataset.len(), "dataset ready");

    let batcher = SegmentationBatcher::<MyBackend>::new(device.clone(), seg_config);
    let dataloader = DataLoaderBuilder::new(batcher)
        .batch_size(args.batch_size)
        .build(dataset);

    let summary = training::evaluate(&model, dataloader);
    tracing::info!(
        loss = summary.loss,
        dice = summary.dice,
        accuracy = summary.accuracy,
        samples = summary.num_samples,
        "evaluation complete"
    );

    Ok(())
}
