use std::marker::PhantomData;

use burn::prelude::*;

// Keeps log() away from 0 and 1 in the cross-entropy term.
const PROB_EPSILON: f64 = 1e-7;

/// Configuration to create a [DiceLoss] instance.
#[derive(Config, Debug)]
pub struct DiceLossConfig {
    /// Smoothing constant added to numerator and denominator.
    #[config(default = 1e-6)]
    pub smooth: f32,
}

impl DiceLossConfig {
    pub fn init<B: Backend>(&self, _device: &B::Device) -> DiceLoss<B> {
        self.assertions();
        DiceLoss {
            smooth: self.smooth,
            _b: PhantomData,
        }
    }

    fn assertions(&self) {
        assert!(
            self.smooth >= 0.,
            "Smoothing factor must be non-negative. Got {}",
            self.smooth
        );
    }
}

/// Region-overlap loss: `1 - dice(predictions, targets)`.
///
/// Inputs are sigmoid probabilities of shape `[batch, 1, height, width]`,
/// targets are binary masks of the same shape. The smoothed Dice coefficient
/// is `(2*intersection + smooth) / (|A| + |B| + smooth)`, so identical
/// non-empty masks score exactly 1 and disjoint masks approach 0.
#[derive(Module, Debug)]
pub struct DiceLoss<B: Backend> {
    pub smooth: f32,
    _b: PhantomData<B>,
}

impl<B: Backend> DiceLoss<B> {
    pub fn forward(&self, inputs: Tensor<B, 4>, targets: Tensor<B, 4, Int>) -> Tensor<B, 1> {
        assertions(&inputs, &targets);

        let device = &targets.device();
        let ones = Tensor::<B, 1>::ones([1], device);

        ones - self.dice_coefficient(inputs, targets)
    }

    pub fn dice_coefficient(
        &self,
        inputs: Tensor<B, 4>,
        targets: Tensor<B, 4, Int>,
    ) -> Tensor<B, 1> {
        let targets_float = targets.float();

        let intersection = (inputs.clone() * targets_float.clone()).sum();
        let denominator = inputs.sum() + targets_float.sum();

        (intersection.mul_scalar(2.0).add_scalar(self.smooth))
            / denominator.add_scalar(self.smooth)
    }
}

/// Configuration to create a [CombinedLoss] instance.
#[derive(Config, Debug)]
pub struct CombinedLossConfig {
    /// Smoothing constant forwarded to the Dice term.
    #[config(default = 1e-6)]
    pub smooth: f32,
}

impl CombinedLossConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CombinedLoss<B> {
        CombinedLoss {
            dice: DiceLossConfig::new().with_smooth(self.smooth).init(device),
        }
    }
}

/// Training loss: pixel-mean binary cross-entropy plus Dice loss.
///
/// The cross-entropy term keeps per-pixel gradients well behaved while the
/// Dice term directly optimizes region overlap on the (typically sparse)
/// landslide class. Inputs are probabilities, not logits.
#[derive(Module, Debug)]
pub struct CombinedLoss<B: Backend> {
    pub dice: DiceLoss<B>,
}

impl<B: Backend> CombinedLoss<B> {
    pub fn forward(&self, inputs: Tensor<B, 4>, targets: Tensor<B, 4, Int>) -> Tensor<B, 1> {
        assertions(&inputs, &targets);

        let bce = self.binary_cross_entropy(inputs.clone(), targets.clone());

        bce + self.dice.forward(inputs, targets)
    }

    fn binary_cross_entropy(
        &self,
        inputs: Tensor<B, 4>,
        targets: Tensor<B, 4, Int>,
    ) -> Tensor<B, 1> {
        let probs = inputs.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
        let targets = targets.float();

        let positive = targets.clone() * probs.clone().log();
        let negative =
            (targets.neg().add_scalar(1.0)) * (probs.neg().add_scalar(1.0)).log();

        (positive + negative).mean().neg()
    }
}

fn assertions<B: Backend>(inputs: &Tensor<B, 4>, targets: &Tensor<B, 4, Int>) {
    let input_dims = inputs.dims();
    let target_dims = targets.dims();

    assert!(
        input_dims == target_dims,
        "Shape mismatch: inputs ({:?}) vs targets ({:?})",
        input_dims,
        target_dims
    );

    assert!(
        input_dims[1] == 1,
        "Binary segmentation expects a single channel, got {}",
        input_dims[1]
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn probs(values: Vec<f32>, shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::from_data(TensorData::new(values, Shape::new(shape)), &Default::default())
    }

    fn targets(values: Vec<i32>, shape: [usize; 4]) -> Tensor<TestBackend, 4, Int> {
        Tensor::from_data(
            TensorData::new(values, Shape::new(shape)).convert::<i64>(),
            &Default::default(),
        )
    }

    #[test]
    fn dice_is_one_for_identical_non_empty_masks() {
        let device = Default::default();
        let loss = DiceLossConfig::new().init::<TestBackend>(&device);

        let prediction = probs(vec![1.0, 0.0, 1.0, 0.0], [1, 1, 2, 2]);
        let target = targets(vec![1, 0, 1, 0], [1, 1, 2, 2]);

        let dice = loss
            .dice_coefficient(prediction, target)
            .into_scalar()
            .elem::<f32>();
        assert!((dice - 1.0).abs() < 1e-6, "dice = {dice}");
    }

    #[test]
    fn dice_is_zero_for_disjoint_masks() {
        let device = Default::default();
        let loss = DiceLossConfig::new().init::<TestBackend>(&device);

        let prediction = probs(vec![1.0, 1.0, 0.0, 0.0], [1, 1, 2, 2]);
        let target = targets(vec![0, 0, 1, 1], [1, 1, 2, 2]);

        let dice = loss
            .dice_coefficient(prediction, target)
            .into_scalar()
            .elem::<f32>();
        assert!(dice.abs() < 1e-4, "dice = {dice}");
    }

    #[test]
    fn dice_loss_vanishes_for_perfect_prediction() {
        let device = Default::default();
        let loss = DiceLossConfig::new().init::<TestBackend>(&device);

        let prediction = probs(vec![1.0, 0.0, 0.0, 1.0], [1, 1, 2, 2]);
        let target = targets(vec![1, 0, 0, 1], [1, 1, 2, 2]);

        let value = loss.forward(prediction, target).into_scalar().elem::<f32>();
        assert!(value.abs() < 1e-6, "loss = {value}");
    }

    #[test]
    fn combined_loss_is_near_zero_for_perfect_prediction() {
        let device = Default::default();
        let loss = CombinedLossConfig::new().init::<TestBackend>(&device);

        let prediction = probs(vec![1.0, 0.0, 1.0, 0.0], [1, 1, 2, 2]);
        let target = targets(vec![1, 0, 1, 0], [1, 1, 2, 2]);

        let value = loss.forward(prediction, target).into_scalar().elem::<f32>();
        assert!(value < 1e-4, "loss = {value}");
    }

    #[test]
    fn combined_loss_penalizes_wrong_prediction() {
        let device = Default::default();
        let loss = CombinedLossConfig::new().init::<TestBackend>(&device);

        let prediction = probs(vec![0.9, 0.9, 0.1, 0.1], [1, 1, 2, 2]);
        let target = targets(vec![0, 0, 1, 1], [1, 1, 2, 2]);

        let value = loss.forward(prediction, target).into_scalar().elem::<f32>();
        assert!(value > 1.0, "loss = {value}");
    }

    #[test]
    #[should_panic(expected = "Shape mismatch")]
    fn rejects_mismatched_shapes() {
        let device = Default::default();
        let loss = DiceLossConfig::new().init::<TestBackend>(&device);

        let prediction = probs(vec![0.0; 4], [1, 1, 2, 2]);
        let target = targets(vec![0; 9], [1, 1, 3, 3]);
        let _ = loss.forward(prediction, target);
    }
}
