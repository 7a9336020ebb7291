mod landslide;
mod segmentation;

pub use landslide::{DatasetError, LandslideDataset, LandslideItem};
pub use segmentation::{InputMode, SegmentationBatch, SegmentationBatcher, SegmentationConfig};
