use super::*;

/// The number of stacked convolution blocks before the output projection.
pub const NUM_HEAD_BLOCKS: usize = 4;

/// A detection subnet applied to one pyramid map.
///
/// It stacks same-channel 3×3 blocks followed by a 3×3 projection to
/// `num_anchors × components` channels without activation.
#[derive(Debug, Clone)]
pub struct HeadInit {
    pub channels: usize,
    pub num_anchors: usize,
    /// The number of values per anchor, the number of classes or 4.
    pub components: usize,
    pub dropout: f64,
}

impl HeadInit {
    pub fn build<'p, P>(self, path: P) -> Result<Head>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            channels,
            num_anchors,
            components,
            dropout,
        } = self;

        ensure!(
            num_anchors > 0 && components > 0,
            "the head must have positive output channels"
        );

        let blocks: Vec<_> = (0..NUM_HEAD_BLOCKS)
            .map(|index| {
                ConvBlockInit {
                    dropout,
                    ..ConvBlockInit::new(channels, channels, 3)
                }
                .build(path / format!("block_{}", index))
            })
            .try_collect()?;
        let output = xavier_conv2d(path / "output", channels, num_anchors * components, 3, 1);

        Ok(Head { blocks, output })
    }
}

#[derive(Debug)]
pub struct Head {
    blocks: Vec<ConvBlock>,
    output: nn::Conv2D,
}

impl Head {
    pub fn kernels(&self) -> impl Iterator<Item = &Tensor> {
        self.blocks
            .iter()
            .map(ConvBlock::kernel)
            .chain(iter::once(&self.output.ws))
    }
}

impl nn::ModuleT for Head {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.blocks
            .iter()
            .fold(xs.shallow_clone(), |xs, block| block.forward_t(&xs, train))
            .apply(&self.output)
    }
}
