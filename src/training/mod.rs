pub mod learner;
pub mod loss;
pub mod metrics;

use std::sync::Arc;

use burn::data::dataloader::DataLoader;
use burn::prelude::*;

use crate::dataset::SegmentationBatch;
use crate::model::UNet;

pub use learner::SegmentationOutput;
pub use loss::{CombinedLoss, CombinedLossConfig, DiceLoss, DiceLossConfig};
pub use metrics::{AccuracyInput, AccuracyMetric, DiceInput, DiceMetric};

/// Aggregate loss, Dice and pixel accuracy over an evaluation pass.
#[derive(Clone, Copy, Debug)]
pub struct EvalSummary {
    pub loss: f64,
    pub dice: f64,
    pub accuracy: f64,
    pub num_samples: usize,
}

/// Runs the model over a dataloader and averages combined loss, Dice score
/// and pixel accuracy per sample. Used for the held-out test set after
/// training and for picking the best checkpoint.
pub fn evaluate<B: Backend>(
    model: &UNet<B>,
    loader: Arc<dyn DataLoader<SegmentationBatch<B>>>,
) -> EvalSummary {
    let mut loss_sum = 0.0;
    let mut dice_sum = 0.0;
    let mut accuracy_sum = 0.0;
    let mut num_samples = 0;

    for batch in loader.iter() {
        let batch_size = batch.images.dims()[0];
        let output = model.forward_segmentation(batch);

        let loss = output.loss.into_scalar().elem::<f64>();
        let dice = metrics::dice_score(output.output.clone(), output.targets.clone());
        let accuracy = metrics::accuracy_score(output.output, output.targets);

        loss_sum += loss * batch_size as f64;
        dice_sum += dice * batch_size as f64;
        accuracy_sum += accuracy * batch_size as f64;
        num_samples += batch_size;
    }

    if num_samples == 0 {
        tracing::warn!("evaluation dataloader yielded no samples");
        return EvalSummary {
            loss: 0.0,
            dice: 0.0,
            accuracy: 0.0,
            num_samples,
        };
    }

    EvalSummary {
        loss: loss_sum / num_samples as f64,
        dice: dice_sum / num_samples as f64,
        accuracy: accuracy_sum / num_samples as f64,
        num_samples,
    }
}
