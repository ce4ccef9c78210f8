//! Configuration format.

use crate::{common::*, dataset::COCO_2017_TRAIN_NUM_IMAGES, label::AssignmentPolicy};

pub use dataset::*;
pub use model::*;

/// The main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config = json5::from_str(&text)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        Ok(config)
    }
}

mod dataset {
    use super::*;

    /// Dataset options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DatasetConfig {
        /// The COCO instances annotation file.
        pub annotation_file: PathBuf,
        /// The directory where image files are located.
        pub dataset_dir: PathBuf,
        /// The number of images the annotation file must have. Set to `null`
        /// to skip the check.
        #[serde(default = "default_expected_num_images")]
        pub expected_num_images: Option<usize>,
        /// The anchor assignment rule.
        #[serde(default)]
        pub assignment: AssignmentPolicy,
    }

    fn default_expected_num_images() -> Option<usize> {
        Some(COCO_2017_TRAIN_NUM_IMAGES)
    }
}

mod model {
    use super::*;

    /// The model options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelConfig {
        #[serde(with = "tch_serde::serde_device", default = "default_device")]
        pub device: Device,
        /// The number of channels of every pyramid feature map.
        #[serde(default = "default_fpn_channels")]
        pub fpn_channels: usize,
        /// The dropout rate after every convolution block.
        #[serde(default = "default_dropout")]
        pub dropout: R64,
        /// The scale of the L2 penalty on convolution kernels.
        #[serde(default = "default_weight_decay")]
        pub weight_decay: R64,
        /// The optional pretrained backbone weights file.
        pub backbone_weights: Option<PathBuf>,
    }

    impl Default for ModelConfig {
        fn default() -> Self {
            Self {
                device: default_device(),
                fpn_channels: default_fpn_channels(),
                dropout: default_dropout(),
                weight_decay: default_weight_decay(),
                backbone_weights: None,
            }
        }
    }

    fn default_device() -> Device {
        Device::Cpu
    }

    fn default_fpn_channels() -> usize {
        256
    }

    fn default_dropout() -> R64 {
        r64(0.2)
    }

    fn default_weight_decay() -> R64 {
        r64(1e-4)
    }
}
