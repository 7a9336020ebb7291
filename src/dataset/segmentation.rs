use burn::{data::dataloader::batcher::Batcher, prelude::*};

use super::landslide::LandslideItem;

#[derive(Config, Debug)]
pub enum InputMode {
    Grayscale,
    RGB,
}

impl InputMode {
    pub fn channels(&self) -> usize {
        match self {
            InputMode::Grayscale => 1,
            InputMode::RGB => 3,
        }
    }
}

#[derive(Config, Debug)]
pub struct SegmentationConfig {
    pub input_mode: InputMode,
    pub image_size: [usize; 2],
    #[config(default = 0.5)]
    pub mask_threshold: f32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            input_mode: InputMode::RGB,
            image_size: [128, 128],
            mask_threshold: 0.5,
        }
    }
}

#[derive(Clone)]
pub struct SegmentationBatcher<B: Backend> {
    device: B::Device,
    config: SegmentationConfig,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub fn new(device: B::Device, config: SegmentationConfig) -> Self {
        Self { device, config }
    }
}

#[derive(Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    pub images: Tensor<B, 4, Float>,
    pub masks: Tensor<B, 4, Int>,
}

impl<B: Backend> Batcher<LandslideItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<LandslideItem>) -> SegmentationBatch<B> {
        let batch_size = items.len();
        let [height, width] = self.config.image_size;
        let channels = self.config.input_mode.channels();

        let (min, max) = intensity_range(&items);
        let range = max - min;

        let mut image_data = Vec::with_capacity(batch_size * channels * height * width);
        let mut mask_data = Vec::with_capacity(batch_size * height * width);

        for item in &items {
            // Interleaved HWC to planar CHW, min-max scaled over the batch.
            for c in 0..channels {
                for y in 0..height {
                    for x in 0..width {
                        let idx = (y * width + x) * channels + c;
                        let val = item.image.get(idx).copied().unwrap_or(0.0);
                        let scaled = if range > 0.0 { (val - min) / range } else { 0.0 };
                        image_data.push(scaled);
                    }
                }
            }

            for y in 0..height {
                for x in 0..width {
                    let val = item.mask.get(y * width + x).copied().unwrap_or(0.0);
                    mask_data.push(val > self.config.mask_threshold);
                }
            }
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(image_data, Shape::new([batch_size, channels, height, width]))
                .convert::<B::FloatElem>(),
            &self.device,
        );

        let masks = Tensor::<B, 4, Int>::from_data(
            TensorData::new(mask_data, Shape::new([batch_size, 1, height, width]))
                .convert::<B::BoolElem>(),
            &self.device,
        );

        SegmentationBatch { images, masks }
    }
}

/// Min and max image intensity over every sample in the batch.
fn intensity_range(items: &[LandslideItem]) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;

    for item in items {
        for &val in &item.image {
            min = min.min(val);
            max = max.max(val);
        }
    }

    if min.is_finite() && max.is_finite() {
        (min, max)
    } else {
        (0.0, 0.0)
    }
}
