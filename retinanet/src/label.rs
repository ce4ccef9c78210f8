//! Dense per-level classification and regression targets.

use crate::{
    bbox::{CyCxHW, RectFloat as _, TLBR},
    common::*,
    dataset::{Annotation, Image},
    level::Level,
};

/// The rule that assigns ground truth boxes to anchors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AssignmentPolicy {
    /// Produce all-zero targets regardless of the annotations.
    Placeholder,
    /// Match each anchor to the annotation with the highest IoU.
    ///
    /// Anchors with IoU of at least `positive_iou` become positives, those
    /// below `negative_iou` become background and the rest are ignored.
    /// Ties go to the annotation listed first.
    MaxIou {
        #[serde(default = "default_positive_iou")]
        positive_iou: R64,
        #[serde(default = "default_negative_iou")]
        negative_iou: R64,
    },
}

impl Default for AssignmentPolicy {
    fn default() -> Self {
        Self::Placeholder
    }
}

impl AssignmentPolicy {
    pub fn max_iou() -> Self {
        Self::MaxIou {
            positive_iou: default_positive_iou(),
            negative_iou: default_negative_iou(),
        }
    }
}

/// The classification value written to every class channel of an ignored anchor.
pub const IGNORE_VALUE: f32 = -1.0;

/// The targets of one pyramid level.
///
/// Both grids are laid out as `[height, width, channels]` where the channel
/// index is `anchor * k + component`, `k` being the number of classes or 4.
#[derive(Debug)]
pub struct LevelLabels {
    pub classification: Tensor,
    pub regression: Tensor,
}

/// The targets of all pyramid levels, ordered by descending level number.
#[derive(Debug)]
pub struct Labels {
    pub classifications: Vec<Tensor>,
    pub regressions: Vec<Tensor>,
}

impl Labels {
    pub fn num_levels(&self) -> usize {
        self.classifications.len()
    }
}

/// Encodes annotations into dense anchor targets.
#[derive(Debug, Clone, CopyGetters, Getters)]
pub struct LabelEncoder {
    #[getset(get_copy = "pub")]
    num_classes: usize,
    #[getset(get = "pub")]
    policy: AssignmentPolicy,
}

impl LabelEncoder {
    /// Create an encoder. Zero classes are allowed and give class grids
    /// without channels.
    pub fn new(num_classes: usize, policy: AssignmentPolicy) -> Result<Self> {
        if let AssignmentPolicy::MaxIou {
            positive_iou,
            negative_iou,
        } = policy
        {
            ensure!(
                (0.0..=1.0).contains(&negative_iou.raw())
                    && (0.0..=1.0).contains(&positive_iou.raw()),
                "IoU thresholds must be within [0, 1]"
            );
            ensure!(
                negative_iou <= positive_iou,
                "negative_iou must not exceed positive_iou"
            );
        }

        Ok(Self {
            num_classes,
            policy,
        })
    }

    /// Encode the targets of a single level.
    pub fn make_level_labels(
        &self,
        image: &Image,
        annotations: &[Annotation],
        level: &Level,
    ) -> Result<LevelLabels> {
        let num_classes = self.num_classes;
        let num_anchors = level.num_anchors();
        let (grid_h, grid_w) = level.grid_size(image.size);
        let cls_channels = num_classes * num_anchors;
        let reg_channels = 4 * num_anchors;

        let (positive_iou, negative_iou) = match self.policy {
            AssignmentPolicy::Placeholder => {
                debug!(
                    "encoded placeholder targets of image {} at level {}",
                    image.id,
                    level.number()
                );
                return Ok(LevelLabels {
                    classification: zeros_grid(grid_h, grid_w, cls_channels),
                    regression: zeros_grid(grid_h, grid_w, reg_channels),
                });
            }
            AssignmentPolicy::MaxIou {
                positive_iou,
                negative_iou,
            } => (positive_iou.raw(), negative_iou.raw()),
        };

        let targets: Vec<(TLBR<f64>, usize)> = annotations
            .iter()
            .map(|ann| -> Result<_> {
                ensure!(
                    ann.category_id < num_classes,
                    "category index {} is out of range of {} classes",
                    ann.category_id,
                    num_classes
                );
                Ok(ann.rect().map(|rect| (rect, ann.category_id)))
            })
            .filter_map(|result| result.transpose())
            .try_collect()?;

        let mut classification = vec![0f32; grid_h * grid_w * cls_channels];
        let mut regression = vec![0f32; grid_h * grid_w * reg_channels];
        let anchor_boxes = level.anchor_boxes();
        let stride = level.stride();

        if !targets.is_empty() {
            iproduct!(0..grid_h, 0..grid_w, anchor_boxes.iter().enumerate()).for_each(
                |(row, col, (anchor_index, anchor_box))| {
                    let anchor = anchor_box.at_cell(row, col, stride);

                    let (target_index, iou) = targets
                        .iter()
                        .map(|(rect, _)| anchor.iou_with(rect))
                        .enumerate()
                        .fold((0, f64::NEG_INFINITY), |best, (index, iou)| {
                            if iou > best.1 {
                                (index, iou)
                            } else {
                                best
                            }
                        });

                    let cell = row * grid_w + col;
                    let cls_offset = cell * cls_channels + anchor_index * num_classes;
                    let reg_offset = cell * reg_channels + anchor_index * 4;

                    if iou >= positive_iou {
                        let (ref rect, class) = targets[target_index];
                        classification[cls_offset + class] = 1.0;

                        let offsets = CyCxHW::from(rect).offsets_from(&anchor);
                        regression[reg_offset..(reg_offset + 4)]
                            .iter_mut()
                            .zip(offsets)
                            .for_each(|(dst, src)| *dst = src as f32);
                    } else if iou >= negative_iou {
                        classification[cls_offset..(cls_offset + num_classes)].fill(IGNORE_VALUE);
                    }
                },
            );
        }

        debug!(
            "encoded {} boxes of image {} at level {}",
            targets.len(),
            image.id,
            level.number()
        );

        Ok(LevelLabels {
            classification: Tensor::of_slice(&classification).view([
                grid_h as i64,
                grid_w as i64,
                cls_channels as i64,
            ]),
            regression: Tensor::of_slice(&regression).view([
                grid_h as i64,
                grid_w as i64,
                reg_channels as i64,
            ]),
        })
    }

    /// Encode the targets of all levels.
    ///
    /// The outcome is ordered from the highest level number to the lowest,
    /// the same order the model emits its predictions.
    pub fn make_labels(
        &self,
        image: &Image,
        annotations: &[Annotation],
        levels: &[Level],
    ) -> Result<Labels> {
        let (classifications, regressions): (Vec<_>, Vec<_>) = levels
            .iter()
            .rev()
            .map(|level| -> Result<_> {
                let LevelLabels {
                    classification,
                    regression,
                } = self.make_level_labels(image, annotations, level)?;
                Ok((classification, regression))
            })
            .process_results(|iter| iter.unzip())?;

        Ok(Labels {
            classifications,
            regressions,
        })
    }
}

/// Build the all-zero targets of a single level.
///
/// With zero classes the classification grid has no channels.
pub fn make_level_labels(
    image: &Image,
    annotations: &[Annotation],
    level: &Level,
    num_classes: usize,
) -> Result<LevelLabels> {
    LabelEncoder::new(num_classes, AssignmentPolicy::Placeholder)?.make_level_labels(
        image,
        annotations,
        level,
    )
}

/// Build the all-zero targets of all levels in descending level order.
pub fn make_labels(
    image: &Image,
    annotations: &[Annotation],
    levels: &[Level],
    num_classes: usize,
) -> Result<Labels> {
    LabelEncoder::new(num_classes, AssignmentPolicy::Placeholder)?.make_labels(
        image,
        annotations,
        levels,
    )
}

fn zeros_grid(height: usize, width: usize, channels: usize) -> Tensor {
    Tensor::zeros(&[height as i64, width as i64, channels as i64], FLOAT_CPU)
}

fn default_positive_iou() -> R64 {
    r64(0.5)
}

fn default_negative_iou() -> R64 {
    r64(0.4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::make_levels;

    fn image(height: usize, width: usize) -> Image {
        Image {
            id: 1,
            filename: "000000000001.png".into(),
            size: (height, width),
        }
    }

    #[test]
    fn level_label_shapes() -> Result<()> {
        let levels = make_levels();
        let image = image(100, 70);
        let anns = vec![Annotation {
            bbox: [5.0, 5.0, 20.0, 30.0],
            category_id: 3,
        }];

        for level in &levels {
            let LevelLabels {
                classification,
                regression,
            } = make_level_labels(&image, &anns, level, 5)?;
            let (h, w) = (100 >> level.number(), 70 >> level.number());

            assert_eq!(classification.size(), vec![h, w, 15]);
            assert_eq!(regression.size(), vec![h, w, 12]);
            assert!(bool::from(classification.eq(0.0).all()));
            assert!(bool::from(regression.eq(0.0).all()));
        }

        Ok(())
    }

    #[test]
    fn labels_are_in_descending_level_order() -> Result<()> {
        let levels = make_levels();
        let labels = make_labels(&image(640, 640), &[], &levels, 80)?;

        assert_eq!(labels.num_levels(), 5);
        assert_eq!(labels.regressions.len(), 5);

        let sizes: Vec<_> = labels
            .classifications
            .iter()
            .map(|tensor| tensor.size())
            .collect();
        assert_eq!(
            sizes,
            vec![
                vec![5, 5, 240],
                vec![10, 10, 240],
                vec![20, 20, 240],
                vec![40, 40, 240],
                vec![80, 80, 240],
            ]
        );
        assert_eq!(labels.regressions[0].size(), vec![5, 5, 12]);
        assert_eq!(labels.regressions[4].size(), vec![80, 80, 12]);
        Ok(())
    }

    #[test]
    fn max_iou_assignment() -> Result<()> {
        let levels = make_levels();
        let level = &levels[0];
        let encoder = LabelEncoder::new(2, AssignmentPolicy::max_iou())?;

        // a 40x40 box centered at the cell (1, 1) of stride 8
        let anns = vec![Annotation {
            bbox: [-8.0, -8.0, 40.0, 40.0],
            category_id: 1,
        }];
        let LevelLabels {
            classification,
            regression,
        } = encoder.make_level_labels(&image(64, 64), &anns, level)?;
        assert_eq!(classification.size(), vec![8, 8, 6]);

        // the square anchor at (1, 1) shares the center of the box
        assert_abs_diff_eq!(classification.double_value(&[1, 1, 2]), 0.0);
        assert_abs_diff_eq!(classification.double_value(&[1, 1, 3]), 1.0);
        assert_abs_diff_eq!(regression.double_value(&[1, 1, 4]), 0.0);
        assert_abs_diff_eq!(regression.double_value(&[1, 1, 5]), 0.0);
        assert_abs_diff_eq!(
            regression.double_value(&[1, 1, 6]),
            (40f64 / 32.0).ln(),
            epsilon = 1e-6
        );

        // IoU of the square anchor at (2, 2) is 784 / 1840
        assert_abs_diff_eq!(classification.double_value(&[2, 2, 2]), -1.0);
        assert_abs_diff_eq!(classification.double_value(&[2, 2, 3]), -1.0);
        assert_abs_diff_eq!(regression.double_value(&[2, 2, 6]), 0.0);

        // far away anchors are background
        assert!(bool::from(classification.i((7, 7)).eq(0.0).all()));
        assert!(bool::from(regression.i((7, 7)).eq(0.0).all()));

        Ok(())
    }

    #[test]
    fn tie_goes_to_first_annotation() -> Result<()> {
        let levels = make_levels();
        let encoder = LabelEncoder::new(3, AssignmentPolicy::max_iou())?;
        let bbox = [-4.0, -4.0, 32.0, 32.0];
        let anns = vec![
            Annotation {
                bbox,
                category_id: 2,
            },
            Annotation {
                bbox,
                category_id: 0,
            },
        ];
        let labels = encoder.make_level_labels(&image(64, 64), &anns, &levels[0])?;

        assert_abs_diff_eq!(labels.classification.double_value(&[1, 1, 5]), 1.0);
        assert_abs_diff_eq!(labels.classification.double_value(&[1, 1, 3]), 0.0);
        Ok(())
    }

    #[test]
    fn invalid_inputs() -> Result<()> {
        let levels = make_levels();
        let encoder = LabelEncoder::new(2, AssignmentPolicy::max_iou())?;
        let anns = vec![Annotation {
            bbox: [0.0, 0.0, 10.0, 10.0],
            category_id: 2,
        }];
        assert!(encoder
            .make_level_labels(&image(64, 64), &anns, &levels[0])
            .is_err());

        // degenerated boxes are skipped
        let anns = vec![Annotation {
            bbox: [0.0, 0.0, 0.0, 10.0],
            category_id: 1,
        }];
        let labels = encoder.make_level_labels(&image(64, 64), &anns, &levels[0])?;
        assert!(bool::from(labels.classification.eq(0.0).all()));

        assert!(LabelEncoder::new(
            2,
            AssignmentPolicy::MaxIou {
                positive_iou: r64(0.3),
                negative_iou: r64(0.4),
            }
        )
        .is_err());
        Ok(())
    }

    #[test]
    fn zero_classes_give_empty_class_grids() -> Result<()> {
        let levels = make_levels();
        let labels = make_labels(&image(64, 128), &[], &levels, 0)?;
        assert_eq!(labels.classifications[4].size(), vec![8, 16, 0]);
        assert_eq!(labels.regressions[4].size(), vec![8, 16, 12]);

        let encoder = LabelEncoder::new(0, AssignmentPolicy::max_iou())?;
        let LevelLabels { classification, .. } =
            encoder.make_level_labels(&image(64, 128), &[], &levels[0])?;
        assert_eq!(classification.size(), vec![8, 16, 0]);
        Ok(())
    }

    struct RecordingLogger;

    static RECORDING_LOGGER: RecordingLogger = RecordingLogger;

    lazy_static::lazy_static! {
        static ref LOG_LINES: std::sync::Mutex<Vec<String>> = Default::default();
    }

    impl log::Log for RecordingLogger {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            LOG_LINES.lock().unwrap().push(record.args().to_string());
        }

        fn flush(&self) {}
    }

    #[test]
    fn placeholder_targets_are_logged() -> Result<()> {
        let _ = log::set_logger(&RECORDING_LOGGER);
        log::set_max_level(log::LevelFilter::Debug);

        let image = Image {
            id: 31337,
            filename: "000000031337.png".into(),
            size: (128, 128),
        };
        make_labels(&image, &[], &make_levels(), 2)?;

        let count = LOG_LINES
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.contains("image 31337 at level"))
            .count();
        assert_eq!(count, 5);
        Ok(())
    }
}
