pub mod export;
pub mod model;

#[cfg(feature = "dataset")]
pub mod dataset;

#[cfg(feature = "training")]
pub mod training;

pub use model::UNet;
pub use model::UNetConfig;

#[cfg(feature = "dataset")]
pub use dataset::{InputMode, LandslideDataset, SegmentationConfig};

#[cfg(feature = "training")]
pub use training::{
    AccuracyMetric, CombinedLoss, CombinedLossConfig, DiceMetric, SegmentationOutput,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
