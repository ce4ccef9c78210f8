use super::*;
use crate::{config::ModelConfig, label::Labels};

/// The detector made of the backbone, the feature pyramid and per-level heads.
#[derive(Debug, Clone)]
pub struct RetinaNetInit {
    pub num_classes: usize,
    /// The pyramid levels in ascending order.
    pub levels: Vec<Level>,
    pub fpn_channels: usize,
    pub dropout: f64,
    /// The scale of the L2 penalty on convolution kernels.
    pub weight_decay: f64,
}

impl RetinaNetInit {
    pub fn new(config: &ModelConfig, levels: Vec<Level>, num_classes: usize) -> Self {
        Self {
            num_classes,
            levels,
            fpn_channels: config.fpn_channels,
            dropout: config.dropout.raw(),
            weight_decay: config.weight_decay.raw(),
        }
    }

    pub fn build<'p, P>(self, path: P) -> Result<RetinaNet>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            num_classes,
            levels,
            fpn_channels,
            dropout,
            weight_decay,
        } = self;

        ensure!(num_classes > 0, "num_classes must be positive");
        ensure!(fpn_channels > 0, "fpn_channels must be positive");
        ensure!(
            weight_decay.is_finite() && weight_decay >= 0.0,
            "weight_decay must be non-negative"
        );
        ensure!(
            levels
                .iter()
                .tuple_windows()
                .all(|(lhs, rhs)| rhs.number() == lhs.number() + 1),
            "levels must have consecutive numbers in ascending order"
        );

        let (backbone_levels, extra_levels): (Vec<_>, Vec<_>) = levels
            .iter()
            .cloned()
            .partition(|level| level.number() <= MAX_BACKBONE_LEVEL);
        ensure!(
            !backbone_levels.is_empty(),
            "at least one level numbered up to {} is required",
            MAX_BACKBONE_LEVEL
        );

        let in_channels: Vec<_> = backbone_levels
            .iter()
            .map(|level| Backbone::out_channels(level.number()))
            .try_collect()?;

        let backbone = BackboneInit {
            levels: backbone_levels,
        }
        .build(path)?;
        let fpn = FpnInit {
            in_channels,
            num_extra_levels: extra_levels.len(),
            channels: fpn_channels,
            dropout,
        }
        .build(path / "fpn")?;

        let make_heads = |name: &str, components: usize| -> Result<Vec<Head>> {
            levels
                .iter()
                .rev()
                .map(|level| {
                    HeadInit {
                        channels: fpn_channels,
                        num_anchors: level.num_anchors(),
                        components,
                        dropout,
                    }
                    .build(path / format!("{}_p{}", name, level.number()))
                })
                .try_collect()
        };
        let classification_heads = make_heads("classification", num_classes)?;
        let regression_heads = make_heads("regression", 4)?;

        Ok(RetinaNet {
            num_classes,
            levels,
            weight_decay,
            backbone,
            fpn,
            classification_heads,
            regression_heads,
        })
    }
}

#[derive(Debug, Getters, CopyGetters)]
pub struct RetinaNet {
    #[getset(get_copy = "pub")]
    num_classes: usize,
    #[getset(get = "pub")]
    levels: Vec<Level>,
    #[getset(get_copy = "pub")]
    weight_decay: f64,
    backbone: Backbone,
    fpn: Fpn,
    classification_heads: Vec<Head>,
    regression_heads: Vec<Head>,
}

impl RetinaNet {
    /// Run the detector on a `[batch, 3, height, width]` input.
    pub fn forward_t(&self, input: &Tensor, train: bool) -> Result<RetinaNetOutput> {
        let bottom_up = self.backbone.forward_t(input, train)?;
        let top_down = self.fpn.forward_t(&bottom_up, train)?;
        ensure!(
            top_down.len() == self.levels.len(),
            "the pyramid has {} maps, but {} levels are configured",
            top_down.len(),
            self.levels.len()
        );

        let (classifications, regressions): (Vec<_>, Vec<_>) = izip!(
            &top_down,
            &self.classification_heads,
            &self.regression_heads
        )
        .map(|(xs, classification_head, regression_head)| {
            let classification = classification_head
                .forward_t(xs, train)
                .permute(&[0, 2, 3, 1]);
            let regression = regression_head.forward_t(xs, train).permute(&[0, 2, 3, 1]);
            (classification, regression)
        })
        .unzip();

        Ok(RetinaNetOutput {
            classifications,
            regressions,
        })
    }

    /// The L2 penalty `weight_decay · Σ ‖w‖² / 2` over the kernels of the
    /// pyramid and the heads.
    pub fn l2_penalty(&self) -> Tensor {
        let sum_squares = chain!(
            self.fpn.kernels(),
            self.classification_heads.iter().flat_map(Head::kernels),
            self.regression_heads.iter().flat_map(Head::kernels)
        )
        .map(|kernel| kernel.square().sum(Kind::Float))
        .fold(None, |acc: Option<Tensor>, sum| match acc {
            Some(acc) => Some(acc + sum),
            None => Some(sum),
        });

        match sum_squares {
            Some(sum) => sum * (self.weight_decay / 2.0),
            None => Tensor::from(0f32),
        }
    }
}

/// The per-level predictions in `[batch, height, width, channels]` layout,
/// ordered by descending level number.
#[derive(Debug)]
pub struct RetinaNetOutput {
    pub classifications: Vec<Tensor>,
    pub regressions: Vec<Tensor>,
}

impl RetinaNetOutput {
    pub fn num_levels(&self) -> usize {
        self.classifications.len()
    }

    /// Check that the predictions line up with a set of targets.
    ///
    /// The targets may be a single record in `[height, width, channels]`
    /// layout or a batch in `[batch, height, width, channels]` layout.
    pub fn check_against(&self, labels: &Labels) -> Result<()> {
        ensure!(
            self.num_levels() == labels.num_levels()
                && self.regressions.len() == labels.regressions.len(),
            "the prediction has {} levels, but the targets have {}",
            self.num_levels(),
            labels.num_levels()
        );

        let pairs = chain!(
            izip!(&self.classifications, &labels.classifications).map(|pair| ("classification", pair)),
            izip!(&self.regressions, &labels.regressions).map(|pair| ("regression", pair))
        );

        pairs
            .enumerate()
            .try_for_each(|(index, (kind, (prediction, target)))| {
                let prediction_size = prediction.size();
                let target_size = target.size();
                let compared = match target_size.len() {
                    3 => &prediction_size[1..],
                    4 => &prediction_size[..],
                    _ => bail!(
                        "invalid {} target shape {:?}",
                        kind,
                        target_size
                    ),
                };
                ensure!(
                    compared == &target_size[..],
                    "{} shape mismatch at position {}, the prediction is {:?} but the target is {:?}",
                    kind,
                    index % self.num_levels(),
                    prediction_size,
                    target_size
                );
                Ok(())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dataset::Image, label::make_labels, level::make_levels};

    fn model(root: &nn::Path, weight_decay: f64) -> Result<RetinaNet> {
        RetinaNetInit {
            num_classes: 3,
            levels: make_levels(),
            fpn_channels: 8,
            dropout: 0.0,
            weight_decay,
        }
        .build(root)
    }

    fn image(height: usize, width: usize) -> Image {
        Image {
            id: 1,
            filename: "1.png".into(),
            size: (height, width),
        }
    }

    #[test]
    fn forward_shapes_match_labels() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = model(&vs.root(), 1e-4)?;

        let input = Tensor::rand(&[2, 3, 128, 256], FLOAT_CPU);
        let output = tch::no_grad(|| model.forward_t(&input, false))?;
        assert_eq!(output.num_levels(), 5);

        let sizes: Vec<_> = output
            .classifications
            .iter()
            .map(|tensor| tensor.size())
            .collect();
        assert_eq!(
            sizes,
            vec![
                vec![2, 1, 2, 9],
                vec![2, 2, 4, 9],
                vec![2, 4, 8, 9],
                vec![2, 8, 16, 9],
                vec![2, 16, 32, 9],
            ]
        );
        assert_eq!(output.regressions[4].size(), vec![2, 16, 32, 12]);

        let labels = make_labels(&image(128, 256), &[], model.levels(), 3)?;
        output.check_against(&labels)?;
        Ok(())
    }

    #[test]
    fn check_against_reports_size_mismatch() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = model(&vs.root(), 1e-4)?;

        // label grids are floored while feature maps are ceiled
        let input = Tensor::rand(&[1, 3, 100, 100], FLOAT_CPU);
        let output = tch::no_grad(|| model.forward_t(&input, false))?;
        assert_eq!(output.classifications[4].size(), vec![1, 13, 13, 9]);

        let labels = make_labels(&image(100, 100), &[], model.levels(), 3)?;
        assert!(output.check_against(&labels).is_err());

        let labels = make_labels(&image(100, 100), &[], &model.levels()[1..], 3)?;
        assert!(output.check_against(&labels).is_err());
        Ok(())
    }

    #[test]
    fn l2_penalty_scales_with_weight_decay() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = model(&vs.root(), 1e-4)?;
        let penalty = model.l2_penalty().double_value(&[]);
        assert!(penalty > 0.0);

        let expect: f64 = chain!(
            model.fpn.kernels(),
            model.classification_heads.iter().flat_map(Head::kernels),
            model.regression_heads.iter().flat_map(Head::kernels)
        )
        .map(|kernel| kernel.square().sum(Kind::Double).double_value(&[]))
        .sum::<f64>()
            * 1e-4
            / 2.0;
        assert_abs_diff_eq!(penalty, expect, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn reject_invalid_levels() {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        let mut levels = make_levels();
        levels.remove(2);
        let init = RetinaNetInit {
            num_classes: 3,
            levels,
            fpn_channels: 8,
            dropout: 0.0,
            weight_decay: 0.0,
        };
        assert!(init.build(&root / "gap").is_err());

        let levels: Vec<_> = make_levels().into_iter().skip(3).collect();
        let init = RetinaNetInit {
            num_classes: 3,
            levels,
            fpn_channels: 8,
            dropout: 0.0,
            weight_decay: 0.0,
        };
        assert!(init.build(&root / "extra_only").is_err());
    }

    #[test]
    fn build_from_config() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = ModelConfig {
            fpn_channels: 16,
            ..Default::default()
        };
        let model = RetinaNetInit::new(&config, make_levels(), 80).build(&vs.root())?;
        assert_eq!(model.num_classes(), 80);
        assert_eq!(model.levels().len(), 5);
        assert_abs_diff_eq!(model.weight_decay(), 1e-4);

        let names = vs.variables();
        assert!(names.contains_key("layer4.2.bn3.running_var"));
        assert!(names.contains_key("fpn.seed.conv.weight"));
        assert!(names.contains_key("classification_p7.output.weight"));
        assert!(names.contains_key("regression_p3.block_3.bn.weight"));
        Ok(())
    }
}
