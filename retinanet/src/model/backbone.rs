use super::*;

/// The output channels of the stem and of the four residual stages, indexed
/// by level number minus one.
const RESNET50_CHANNELS: [usize; 5] = [64, 256, 512, 1024, 2048];
const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];
const BOTTLENECK_EXPANSION: usize = 4;

/// The highest level number the backbone produces.
pub const MAX_BACKBONE_LEVEL: usize = 5;

/// The variable name prefixes owned by the backbone.
pub const BACKBONE_VAR_PREFIXES: [&str; 6] =
    ["conv1.", "bn1.", "layer1.", "layer2.", "layer3.", "layer4."];

fn plain_conv2d(path: nn::Path, in_c: usize, out_c: usize, k: usize, s: usize) -> nn::Conv2D {
    nn::conv2d(
        path,
        in_c as i64,
        out_c as i64,
        k as i64,
        nn::ConvConfig {
            stride: s as i64,
            padding: k as i64 / 2,
            bias: false,
            ..Default::default()
        },
    )
}

#[derive(Debug)]
struct Bottleneck {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    conv2: nn::Conv2D,
    bn2: nn::BatchNorm,
    conv3: nn::Conv2D,
    bn3: nn::BatchNorm,
    downsample: Option<(nn::Conv2D, nn::BatchNorm)>,
}

impl Bottleneck {
    fn new(path: &nn::Path, in_c: usize, mid_c: usize, stride: usize) -> Self {
        let out_c = mid_c * BOTTLENECK_EXPANSION;

        let conv1 = plain_conv2d(path / "conv1", in_c, mid_c, 1, 1);
        let bn1 = nn::batch_norm2d(path / "bn1", mid_c as i64, Default::default());
        let conv2 = plain_conv2d(path / "conv2", mid_c, mid_c, 3, stride);
        let bn2 = nn::batch_norm2d(path / "bn2", mid_c as i64, Default::default());
        let conv3 = plain_conv2d(path / "conv3", mid_c, out_c, 1, 1);
        let bn3 = nn::batch_norm2d(path / "bn3", out_c as i64, Default::default());

        let downsample = (stride != 1 || in_c != out_c).then(|| {
            let path = path / "downsample";
            (
                plain_conv2d(&path / "0", in_c, out_c, 1, stride),
                nn::batch_norm2d(&path / "1", out_c as i64, Default::default()),
            )
        });

        Self {
            conv1,
            bn1,
            conv2,
            bn2,
            conv3,
            bn3,
            downsample,
        }
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let ys = xs
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu()
            .apply(&self.conv2)
            .apply_t(&self.bn2, train)
            .relu()
            .apply(&self.conv3)
            .apply_t(&self.bn3, train);

        let shortcut = match &self.downsample {
            Some((conv, bn)) => xs.apply(conv).apply_t(bn, train),
            None => xs.shallow_clone(),
        };

        (ys + shortcut).relu()
    }
}

/// The ResNet-50 feature extractor.
///
/// Variables are named after the torchvision layout, so converted pretrained
/// weights can be loaded into the var store directly.
#[derive(Debug, Clone)]
pub struct BackboneInit {
    /// The pyramid levels to tap, all numbered within `1..=5`.
    pub levels: Vec<Level>,
}

impl BackboneInit {
    pub fn build<'p, P>(self, path: P) -> Result<Backbone>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self { levels } = self;

        ensure!(!levels.is_empty(), "at least one backbone level is required");
        ensure!(
            levels
                .iter()
                .all(|level| (1..=MAX_BACKBONE_LEVEL).contains(&level.number())),
            "backbone levels must be numbered within 1..={}",
            MAX_BACKBONE_LEVEL
        );
        ensure!(
            levels
                .iter()
                .tuple_windows()
                .all(|(lhs, rhs)| lhs.number() < rhs.number()),
            "backbone levels must be in ascending order"
        );

        let conv1 = nn::conv2d(
            path / "conv1",
            3,
            RESNET50_CHANNELS[0] as i64,
            7,
            nn::ConvConfig {
                stride: 2,
                padding: 3,
                bias: false,
                ..Default::default()
            },
        );
        let bn1 = nn::batch_norm2d(path / "bn1", RESNET50_CHANNELS[0] as i64, Default::default());

        // stages beyond the deepest tapped level are not needed
        let num_stages = levels.iter().map(|level| level.number()).max().unwrap_or(1) - 1;

        let stages: Vec<Vec<Bottleneck>> = RESNET50_BLOCKS
            .iter()
            .enumerate()
            .take(num_stages)
            .map(|(stage_index, &num_blocks)| {
                let path = path / format!("layer{}", stage_index + 1);
                let in_c = RESNET50_CHANNELS[stage_index];
                let out_c = RESNET50_CHANNELS[stage_index + 1];
                let mid_c = out_c / BOTTLENECK_EXPANSION;
                let stride = if stage_index == 0 { 1 } else { 2 };

                (0..num_blocks)
                    .map(|block_index| {
                        let path = &path / block_index;
                        if block_index == 0 {
                            Bottleneck::new(&path, in_c, mid_c, stride)
                        } else {
                            Bottleneck::new(&path, out_c, mid_c, 1)
                        }
                    })
                    .collect()
            })
            .collect();

        Ok(Backbone {
            levels,
            conv1,
            bn1,
            stages,
        })
    }
}

#[derive(Debug)]
pub struct Backbone {
    levels: Vec<Level>,
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    stages: Vec<Vec<Bottleneck>>,
}

impl Backbone {
    /// The number of channels of the feature map at a level.
    pub fn out_channels(number: usize) -> Result<usize> {
        ensure!(
            (1..=MAX_BACKBONE_LEVEL).contains(&number),
            "level {} is not produced by the backbone",
            number
        );
        Ok(RESNET50_CHANNELS[number - 1])
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Produce one feature map per tapped level in ascending level order.
    ///
    /// Each map must have the size `ceil(input / 2^number)`, otherwise the
    /// pass fails.
    pub fn forward_t(&self, input: &Tensor, train: bool) -> Result<Vec<Tensor>> {
        let (_b, in_c, in_h, in_w) = input.size4()?;
        ensure!(in_c == 3, "expect 3 input channels, but get {}", in_c);

        let stem = input
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu();
        let mut taps = vec![stem];

        let mut xs = taps[0].max_pool2d(&[3, 3], &[2, 2], &[1, 1], &[1, 1], false);
        for stage in &self.stages {
            xs = stage
                .iter()
                .fold(xs, |xs, block| block.forward_t(&xs, train));
            taps.push(xs.shallow_clone());
        }

        self.levels
            .iter()
            .map(|level| {
                let feature = taps[level.number() - 1].shallow_clone();
                let (_, _, feat_h, feat_w) = feature.size4()?;
                let expect = level.feature_size((in_h, in_w));
                ensure!(
                    (feat_h, feat_w) == expect,
                    "backbone feature size at level {} is {:?}, but expect {:?} for input size {:?}",
                    level.number(),
                    (feat_h, feat_w),
                    expect,
                    (in_h, in_w)
                );
                Ok(feature)
            })
            .try_collect()
    }
}

/// Whether a var store entry belongs to the backbone.
pub fn is_backbone_var(name: &str) -> bool {
    BACKBONE_VAR_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(*prefix))
}

/// Load pretrained backbone weights into a var store holding a model at its root.
///
/// Every backbone variable must be present in the file. Variables of other
/// parts are left untouched.
pub fn load_backbone_weights(vs: &mut nn::VarStore, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let missing = vs
        .load_partial(path)
        .with_context(|| format!("failed to load weights file '{}'", path.display()))?;

    let (missing_backbone, missing_others): (Vec<_>, Vec<_>) = missing
        .into_iter()
        .partition(|name| is_backbone_var(name));

    ensure!(
        missing_backbone.is_empty(),
        "backbone variables are missing in '{}': {}",
        path.display(),
        missing_backbone.iter().join(", ")
    );

    if !missing_others.is_empty() {
        warn!(
            "{} variables are not found in '{}' and keep their initial values",
            missing_others.len(),
            path.display()
        );
    }
    info!("loaded backbone weights from '{}'", path.display());

    Ok(())
}
