use std::marker::PhantomData;

use burn::prelude::*;
use burn::train::metric::state::{FormatOptions, NumericMetricState};
use burn::train::metric::{Metric, MetricEntry, MetricMetadata, Numeric};
use derive_new::new;

/// Predictions at or below this probability count as background.
const PREDICTION_THRESHOLD: f64 = 0.5;

/// Dice score of thresholded predictions against ground-truth masks.
///
/// `2 * |A intersect B| / (|A| + |B|)`, reported in percent. Identical
/// non-empty masks score 1.0, disjoint masks 0.0; two empty masks count as
/// perfect agreement.
#[derive(Default)]
pub struct DiceMetric<B: Backend> {
    state: NumericMetricState,
    _b: PhantomData<B>,
}

#[derive(new)]
pub struct DiceInput<B: Backend> {
    outputs: Tensor<B, 4>,
    targets: Tensor<B, 4, Int>,
}

impl<B: Backend> DiceMetric<B> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> Metric for DiceMetric<B> {
    type Input = DiceInput<B>;
    const NAME: &'static str = "Dice";

    fn update(&mut self, input: &DiceInput<B>, _metadata: &MetricMetadata) -> MetricEntry {
        let batch_size = input.outputs.dims()[0];
        let dice = dice_score(input.outputs.clone(), input.targets.clone());

        self.state.update(
            100.0 * dice,
            batch_size,
            FormatOptions::new(Self::NAME).unit("%").precision(2),
        )
    }

    fn clear(&mut self) {
        self.state.reset()
    }
}

impl<B: Backend> Numeric for DiceMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}

/// Fraction of pixels whose thresholded prediction matches the target,
/// reported in percent.
#[derive(Default)]
pub struct AccuracyMetric<B: Backend> {
    state: NumericMetricState,
    _b: PhantomData<B>,
}

#[derive(new)]
pub struct AccuracyInput<B: Backend> {
    outputs: Tensor<B, 4>,
    targets: Tensor<B, 4, Int>,
}

impl<B: Backend> AccuracyMetric<B> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> Metric for AccuracyMetric<B> {
    type Input = AccuracyInput<B>;
    const NAME: &'static str = "Accuracy";

    fn update(&mut self, input: &AccuracyInput<B>, _metadata: &MetricMetadata) -> MetricEntry {
        let batch_size = input.outputs.dims()[0];
        let accuracy = accuracy_score(input.outputs.clone(), input.targets.clone());

        self.state.update(
            100.0 * accuracy,
            batch_size,
            FormatOptions::new(Self::NAME).unit("%").precision(2),
        )
    }

    fn clear(&mut self) {
        self.state.reset()
    }
}

impl<B: Backend> Numeric for AccuracyMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}

/// Computes the pixel accuracy of thresholded probabilities.
pub fn accuracy_score<B: Backend>(outputs: Tensor<B, 4>, targets: Tensor<B, 4, Int>) -> f64 {
    let predictions = outputs.greater_elem(PREDICTION_THRESHOLD);

    predictions
        .equal(targets.bool())
        .float()
        .mean()
        .into_scalar()
        .elem::<f64>()
}

/// Computes the Dice coefficient of thresholded probabilities.
pub fn dice_score<B: Backend>(outputs: Tensor<B, 4>, targets: Tensor<B, 4, Int>) -> f64 {
    let predictions = outputs.greater_elem(PREDICTION_THRESHOLD).float();
    let targets = targets.float();

    let intersection = (predictions.clone() * targets.clone())
        .sum()
        .into_scalar()
        .elem::<f64>();
    let total = (predictions.sum() + targets.sum()).into_scalar().elem::<f64>();

    if total > 0.0 {
        2.0 * intersection / total
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn outputs(values: Vec<f32>) -> Tensor<TestBackend, 4> {
        let len = values.len();
        Tensor::from_data(
            TensorData::new(values, Shape::new([1, 1, 1, len])),
            &Default::default(),
        )
    }

    fn targets(values: Vec<i32>) -> Tensor<TestBackend, 4, Int> {
        let len = values.len();
        Tensor::from_data(
            TensorData::new(values, Shape::new([1, 1, 1, len])).convert::<i64>(),
            &Default::default(),
        )
    }

    #[test]
    fn perfect_prediction_scores_one() {
        let dice = dice_score(outputs(vec![0.9, 0.1, 0.8, 0.2]), targets(vec![1, 0, 1, 0]));
        assert_eq!(dice, 1.0);
    }

    #[test]
    fn disjoint_prediction_scores_zero() {
        let dice = dice_score(outputs(vec![0.9, 0.9, 0.1, 0.1]), targets(vec![0, 0, 1, 1]));
        assert_eq!(dice, 0.0);
    }

    #[test]
    fn empty_masks_count_as_agreement() {
        let dice = dice_score(outputs(vec![0.1, 0.2]), targets(vec![0, 0]));
        assert_eq!(dice, 1.0);
    }

    #[test]
    fn partial_overlap_is_fractional() {
        // |A| = 2, |B| = 2, intersection = 1 -> dice = 0.5.
        let dice = dice_score(outputs(vec![0.9, 0.9, 0.1, 0.1]), targets(vec![1, 0, 1, 0]));
        assert!((dice - 0.5).abs() < 1e-9, "dice = {dice}");
    }

    #[test]
    fn accuracy_is_one_for_perfect_prediction() {
        let accuracy =
            accuracy_score(outputs(vec![0.9, 0.1, 0.8, 0.2]), targets(vec![1, 0, 1, 0]));
        assert_eq!(accuracy, 1.0);
    }

    #[test]
    fn accuracy_counts_matching_pixels() {
        // Two of four pixels agree after thresholding.
        let accuracy =
            accuracy_score(outputs(vec![0.9, 0.9, 0.1, 0.1]), targets(vec![1, 0, 1, 0]));
        assert!((accuracy - 0.5).abs() < 1e-9, "accuracy = {accuracy}");
    }

    #[test]
    fn accuracy_is_zero_for_inverted_prediction() {
        let accuracy = accuracy_score(outputs(vec![0.9, 0.1]), targets(vec![0, 1]));
        assert_eq!(accuracy, 0.0);
    }

    #[test]
    fn metric_reports_percentage() {
        let metadata = MetricMetadata {
            progress: burn::data::dataloader::Progress {
                items_processed: 1,
                items_total: 1,
            },
            epoch: 1,
            epoch_total: 1,
            iteration: 1,
            lr: None,
        };

        let mut metric = DiceMetric::<TestBackend>::new();
        let input = DiceInput::new(outputs(vec![0.9, 0.1]), targets(vec![1, 0]));

        metric.update(&input, &metadata);
        assert_eq!(metric.value(), 100.0);
    }
}
