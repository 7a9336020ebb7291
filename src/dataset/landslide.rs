use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use image::{DynamicImage, imageops::FilterType};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use thiserror::Error;

use super::segmentation::{InputMode, SegmentationConfig};

const SUPPORTED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "tif", "tiff"];

/// Errors raised while discovering and decoding image/mask pairs.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Images directory not found: {path}")]
    ImagesDirectoryNotFound { path: PathBuf },

    #[error("Masks directory not found: {path}")]
    MasksDirectoryNotFound { path: PathBuf },

    #[error("Failed to read directory: {path}")]
    DirectoryReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No valid image/mask pairs found in: {path}")]
    NoValidPairs { path: PathBuf },

    #[error("Failed to decode image: {path}")]
    ImageDecodeFailed {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// A single decoded sample, resized to the configured resolution.
///
/// `image` is interleaved row-major (height, width, channels) with
/// intensities scaled to [0, 1] at decode; `mask` is row-major
/// (height, width) in [0, 1]. Per-batch normalization and mask
/// binarization happen in the batcher.
#[derive(Clone, Debug)]
pub struct LandslideItem {
    pub image: Vec<f32>,
    pub mask: Vec<f32>,
}

/// In-memory dataset of satellite image / landslide mask pairs.
///
/// Samples live under `<root>/images/` and `<root>/masks/`, matched by file
/// stem. All samples are decoded and resized up front so that failures
/// surface at load time rather than mid-epoch.
#[derive(Clone)]
pub struct LandslideDataset {
    items: Vec<LandslideItem>,
}

impl LandslideDataset {
    pub fn load(
        root: &Path,
        config: &SegmentationConfig,
        max_samples: Option<usize>,
    ) -> Result<Self, DatasetError> {
        let mut pairs = pair_samples(root)?;

        if let Some(max_samples) = max_samples {
            pairs.truncate(max_samples);
        }

        tracing::info!(
            root = %root.display(),
            samples = pairs.len(),
            "loading image/mask pairs"
        );

        let mut items = Vec::with_capacity(pairs.len());
        for (image_path, mask_path) in pairs {
            items.push(LandslideItem {
                image: load_image(&image_path, &config.input_mode, config.image_size)?,
                mask: load_mask(&mask_path, config.image_size)?,
            });
        }

        Ok(Self { items })
    }

    /// Splits into train/validation parts with a seeded shuffle.
    ///
    /// The parts are disjoint and their sizes sum to the original length.
    pub fn split(self, train_ratio: f64, seed: u64) -> (Self, Self) {
        assert!(
            (0.0..=1.0).contains(&train_ratio),
            "Train ratio must be in [0, 1]. Got {}",
            train_ratio
        );

        let mut items = self.items;
        items.shuffle(&mut StdRng::seed_from_u64(seed));

        let split_at = (items.len() as f64 * train_ratio).round() as usize;
        let valid_items = items.split_off(split_at.min(items.len()));

        (Self { items }, Self { items: valid_items })
    }
}

impl Dataset<LandslideItem> for LandslideDataset {
    fn get(&self, index: usize) -> Option<LandslideItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Pairs `<root>/images/<stem>.<ext>` with `<root>/masks/<stem>.<ext>`,
/// sorted by image path. Images without a matching mask are skipped.
fn pair_samples(root: &Path) -> Result<Vec<(PathBuf, PathBuf)>, DatasetError> {
    let images_dir = root.join("images");
    let masks_dir = root.join("masks");

    if !images_dir.is_dir() {
        return Err(DatasetError::ImagesDirectoryNotFound { path: images_dir });
    }
    if !masks_dir.is_dir() {
        return Err(DatasetError::MasksDirectoryNotFound { path: masks_dir });
    }

    let entries = std::fs::read_dir(&images_dir).map_err(|source| {
        DatasetError::DirectoryReadFailed {
            path: images_dir.clone(),
            source,
        }
    })?;

    let mut pairs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DatasetError::DirectoryReadFailed {
            path: images_dir.clone(),
            source,
        })?;
        let path = entry.path();

        if !path.is_file() || !has_supported_extension(&path) {
            continue;
        }

        let Some(stem) = path.file_stem() else {
            continue;
        };

        for ext in SUPPORTED_EXTENSIONS {
            let mask_path = masks_dir.join(format!("{}.{}", stem.to_string_lossy(), ext));
            if mask_path.is_file() {
                pairs.push((path, mask_path));
                break;
            }
        }
    }

    if pairs.is_empty() {
        return Err(DatasetError::NoValidPairs {
            path: root.to_path_buf(),
        });
    }

    pairs.sort();
    Ok(pairs)
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|valid| valid.eq_ignore_ascii_case(ext))
        })
}

fn open_resized(
    path: &Path,
    [height, width]: [usize; 2],
) -> Result<DynamicImage, DatasetError> {
    let image = image::open(path).map_err(|source| DatasetError::ImageDecodeFailed {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(image.resize_exact(width as u32, height as u32, FilterType::Triangle))
}

fn load_image(
    path: &Path,
    input_mode: &InputMode,
    image_size: [usize; 2],
) -> Result<Vec<f32>, DatasetError> {
    let image = open_resized(path, image_size)?;

    Ok(match input_mode {
        InputMode::RGB => image.to_rgb32f().into_raw(),
        InputMode::Grayscale => image.to_luma32f().into_raw(),
    })
}

fn load_mask(path: &Path, image_size: [usize; 2]) -> Result<Vec<f32>, DatasetError> {
    Ok(open_resized(path, image_size)?.to_luma32f().into_raw())
}
