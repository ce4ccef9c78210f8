use super::*;

/// The Xavier uniform initializer of a `k × k` convolution kernel.
pub fn xavier_uniform(in_c: usize, out_c: usize, k: usize) -> nn::Init {
    let fan_in = (in_c * k * k) as f64;
    let fan_out = (out_c * k * k) as f64;
    let bound = (6.0 / (fan_in + fan_out)).sqrt();
    nn::Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Build a same-padded convolution with Xavier initialized kernel and zero bias.
pub fn xavier_conv2d<'p, P>(path: P, in_c: usize, out_c: usize, k: usize, s: usize) -> nn::Conv2D
where
    P: Borrow<nn::Path<'p>>,
{
    nn::conv2d(
        path,
        in_c as i64,
        out_c as i64,
        k as i64,
        nn::ConvConfig {
            stride: s as i64,
            padding: k as i64 / 2,
            bias: true,
            ws_init: xavier_uniform(in_c, out_c, k),
            bs_init: nn::Init::Const(0.0),
            ..Default::default()
        },
    )
}

/// The convolution, batch normalization, ReLU and dropout block.
#[derive(Debug, Clone)]
pub struct ConvBlockInit {
    pub in_c: usize,
    pub out_c: usize,
    pub k: usize,
    pub s: usize,
    pub dropout: f64,
}

impl ConvBlockInit {
    pub fn new(in_c: usize, out_c: usize, k: usize) -> Self {
        Self {
            in_c,
            out_c,
            k,
            s: 1,
            dropout: 0.0,
        }
    }

    pub fn build<'p, P>(self, path: P) -> Result<ConvBlock>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            in_c,
            out_c,
            k,
            s,
            dropout,
        } = self;

        ensure!(
            in_c > 0 && out_c > 0 && k > 0 && s > 0,
            "channels, kernel size and stride must be positive"
        );
        ensure!(
            (0.0..1.0).contains(&dropout),
            "dropout rate must be within [0, 1), but get {}",
            dropout
        );

        let conv = xavier_conv2d(path / "conv", in_c, out_c, k, s);
        let bn = nn::batch_norm2d(path / "bn", out_c as i64, Default::default());

        Ok(ConvBlock { conv, bn, dropout })
    }
}

#[derive(Debug)]
pub struct ConvBlock {
    conv: nn::Conv2D,
    bn: nn::BatchNorm,
    dropout: f64,
}

impl ConvBlock {
    /// The convolution kernel subject to weight decay.
    pub fn kernel(&self) -> &Tensor {
        &self.conv.ws
    }
}

impl nn::ModuleT for ConvBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        xs.apply(&self.conv)
            .apply_t(&self.bn, train)
            .relu()
            .dropout(self.dropout, train)
    }
}
