use burn::{
    nn::conv::{Conv2d, Conv2dConfig},
    prelude::*,
};

#[cfg(feature = "training")]
use crate::{
    dataset::SegmentationBatch,
    training::{SegmentationOutput, loss::CombinedLossConfig},
};
#[cfg(feature = "training")]
use burn::tensor::backend::AutodiffBackend;
#[cfg(feature = "training")]
use burn::train::{TrainOutput, TrainStep, ValidStep};

use nn::Sigmoid;

use super::blocks::{
    ConvBlock, ConvBlockConfig, DecoderBlock, DecoderBlockConfig, EncoderBlock, EncoderBlockConfig,
};

/// Encoder-decoder network with skip connections for binary segmentation.
///
/// Four encoder stages double the filter count from `base_channels` while
/// halving the resolution, a bottleneck at 16x `base_channels`, then four
/// symmetric decoder stages. The head is a 1x1 convolution to a single
/// channel followed by a sigmoid, so the output is a probability map of the
/// same spatial size as the input.
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    encoder_block_1: EncoderBlock<B>,
    encoder_block_2: EncoderBlock<B>,
    encoder_block_3: EncoderBlock<B>,
    encoder_block_4: EncoderBlock<B>,
    bottleneck: ConvBlock<B>,
    decoder_block_1: DecoderBlock<B>,
    decoder_block_2: DecoderBlock<B>,
    decoder_block_3: DecoderBlock<B>,
    decoder_block_4: DecoderBlock<B>,
    conv_1x1: Conv2d<B>,
    activation: Sigmoid,
}

#[derive(Config, Debug)]
pub struct UNetConfig {
    /// Input resolution, must be divisible by 16.
    pub input_size: [usize; 2],
    #[config(default = "3")]
    pub input_channels: usize,
    #[config(default = "64")]
    pub base_channels: usize,
}

impl UNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        self.assertions();
        UNet {
            encoder_block_1: EncoderBlockConfig::new(ConvBlockConfig::new(
                self.input_channels,
                self.base_channels,
            ))
            .init(device),
            encoder_block_2: EncoderBlockConfig::new(ConvBlockConfig::new(
                self.base_channels,
                self.base_channels * 2,
            ))
            .init(device),
            encoder_block_3: EncoderBlockConfig::new(ConvBlockConfig::new(
                self.base_channels * 2,
                self.base_channels * 4,
            ))
            .init(device),
            encoder_block_4: EncoderBlockConfig::new(ConvBlockConfig::new(
                self.base_channels * 4,
                self.base_channels * 8,
            ))
            .init(device),
            bottleneck: ConvBlockConfig::new(self.base_channels * 8, self.base_channels * 16)
                .init(device),
            decoder_block_1: DecoderBlockConfig::new(
                self.base_channels * 16,
                self.base_channels * 8,
                ConvBlockConfig::new(self.base_channels * 16, self.base_channels * 8),
            )
            .init(device),
            decoder_block_2: DecoderBlockConfig::new(
                self.base_channels * 8,
                self.base_channels * 4,
                ConvBlockConfig::new(self.base_channels * 8, self.base_channels * 4),
            )
            .init(device),
            decoder_block_3: DecoderBlockConfig::new(
                self.base_channels * 4,
                self.base_channels * 2,
                ConvBlockConfig::new(self.base_channels * 4, self.base_channels * 2),
            )
            .init(device),
            decoder_block_4: DecoderBlockConfig::new(
                self.base_channels * 2,
                self.base_channels,
                ConvBlockConfig::new(self.base_channels * 2, self.base_channels),
            )
            .init(device),
            conv_1x1: Conv2dConfig::new([self.base_channels, 1], [1, 1]).init(device),
            activation: Sigmoid::new(),
        }
    }

    fn assertions(&self) {
        let [height, width] = self.input_size;
        assert!(
            height % 16 == 0 && width % 16 == 0,
            "Input size must be divisible by 16 (four 2x2 poolings). Got {}x{}",
            height,
            width
        );
        assert!(
            self.input_channels > 0,
            "Input channel count must be positive"
        );
    }
}

impl<B: Backend> UNet<B> {
    /// Computes per-pixel landslide probabilities, shape `[batch, 1, h, w]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = images;

        let (x, skip_features_1) = self.encoder_block_1.forward(x);
        let (x, skip_features_2) = self.encoder_block_2.forward(x);
        let (x, skip_features_3) = self.encoder_block_3.forward(x);
        let (x, skip_features_4) = self.encoder_block_4.forward(x);

        let x = self.bottleneck.forward(x);

        let x = self.decoder_block_1.forward(x, skip_features_4);
        let x = self.decoder_block_2.forward(x, skip_features_3);
        let x = self.decoder_block_3.forward(x, skip_features_2);
        let x = self.decoder_block_4.forward(x, skip_features_1);

        let x = self.conv_1x1.forward(x);

        self.activation.forward(x)
    }

    #[cfg(feature = "training")]
    pub fn forward_segmentation(&self, item: SegmentationBatch<B>) -> SegmentationOutput<B> {
        let targets = item.masks;
        let output = self.forward(item.images);

        let loss = CombinedLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        SegmentationOutput {
            loss,
            output,
            targets,
        }
    }
}

#[cfg(feature = "training")]
impl<B: AutodiffBackend> TrainStep<SegmentationBatch<B>, SegmentationOutput<B>> for UNet<B> {
    fn step(&self, batch: SegmentationBatch<B>) -> TrainOutput<SegmentationOutput<B>> {
        let item = self.forward_segmentation(batch);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

#[cfg(feature = "training")]
impl<B: Backend> ValidStep<SegmentationBatch<B>, SegmentationOutput<B>> for UNet<B> {
    fn step(&self, batch: SegmentationBatch<B>) -> SegmentationOutput<B> {
        self.forward_segmentation(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn forward_yields_single_channel_probabilities() {
        let device = Default::default();
        let model = UNetConfig::new([32, 32])
            .with_base_channels(4)
            .init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::random(
            [2, 3, 32, 32],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let output = model.forward(images);

        assert_eq!(output.dims(), [2, 1, 32, 32]);

        let data = output.into_data();
        for &p in data.as_slice::<f32>().unwrap() {
            assert!((0.0..=1.0).contains(&p), "probability out of range: {p}");
        }
    }

    #[test]
    fn grayscale_input_is_supported() {
        let device = Default::default();
        let model = UNetConfig::new([16, 16])
            .with_input_channels(1)
            .with_base_channels(2)
            .init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([1, 1, 16, 16], &device);
        assert_eq!(model.forward(images).dims(), [1, 1, 16, 16]);
    }

    #[test]
    #[should_panic(expected = "divisible by 16")]
    fn rejects_input_size_not_divisible_by_16() {
        let device = Default::default();
        let _ = UNetConfig::new([100, 100]).init::<TestBackend>(&device);
    }
}
