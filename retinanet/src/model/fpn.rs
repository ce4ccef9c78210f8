use super::*;

/// The feature pyramid on top of the backbone.
#[derive(Debug, Clone)]
pub struct FpnInit {
    /// The channels of the bottom-up maps in ascending level order.
    pub in_channels: Vec<usize>,
    /// The number of levels built above the coarsest bottom-up map.
    pub num_extra_levels: usize,
    /// The channels of every output map.
    pub channels: usize,
    pub dropout: f64,
}

impl FpnInit {
    pub fn build<'p, P>(self, path: P) -> Result<Fpn>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            in_channels,
            num_extra_levels,
            channels,
            dropout,
        } = self;

        let (&top_c, lateral_cs) = in_channels
            .split_last()
            .ok_or_else(|| format_err!("at least one bottom-up map is required"))?;

        let block = |in_c: usize, k: usize, s: usize, name: String| {
            ConvBlockInit {
                s,
                dropout,
                ..ConvBlockInit::new(in_c, channels, k)
            }
            .build(path / name)
        };

        let extras: Vec<_> = (0..num_extra_levels)
            .map(|index| {
                let in_c = if index == 0 { top_c } else { channels };
                block(in_c, 3, 2, format!("extra_{}", index))
            })
            .try_collect()?;

        let seed = block(top_c, 1, 1, "seed".into())?;

        // ordered from the coarsest remaining bottom-up map to the finest
        let (laterals, smooths): (Vec<_>, Vec<_>) = lateral_cs
            .iter()
            .rev()
            .enumerate()
            .map(|(index, &in_c)| -> Result<_> {
                let lateral = block(in_c, 1, 1, format!("lateral_{}", index))?;
                let smooth = block(channels, 3, 1, format!("smooth_{}", index))?;
                Ok((lateral, smooth))
            })
            .process_results(|iter| iter.unzip())?;

        Ok(Fpn {
            extras,
            seed,
            laterals,
            smooths,
        })
    }
}

#[derive(Debug)]
pub struct Fpn {
    extras: Vec<ConvBlock>,
    seed: ConvBlock,
    laterals: Vec<ConvBlock>,
    smooths: Vec<ConvBlock>,
}

impl Fpn {
    /// The number of output maps.
    pub fn num_outputs(&self) -> usize {
        self.extras.len() + 1 + self.laterals.len()
    }

    /// Iterate over the convolution kernels of all blocks.
    pub fn kernels(&self) -> impl Iterator<Item = &Tensor> {
        chain!(
            &self.extras,
            iter::once(&self.seed),
            &self.laterals,
            &self.smooths
        )
        .map(ConvBlock::kernel)
    }

    /// Fuse the bottom-up maps, given in ascending level order, into pyramid
    /// maps ordered by descending level number.
    pub fn forward_t(&self, bottom_up: &[Tensor], train: bool) -> Result<Vec<Tensor>> {
        ensure!(
            bottom_up.len() == self.laterals.len() + 1,
            "expect {} bottom-up maps, but get {}",
            self.laterals.len() + 1,
            bottom_up.len()
        );
        let (top, rest) = bottom_up
            .split_last()
            .ok_or_else(|| format_err!("empty bottom-up maps"))?;

        let mut top_down: Vec<Tensor> = vec![];

        // the coarsest extra level goes first
        {
            let mut xs = top.shallow_clone();
            for extra in &self.extras {
                xs = extra.forward_t(&xs, train);
                top_down.insert(0, xs.shallow_clone());
            }
        }

        let mut xs = self.seed.forward_t(top, train);
        top_down.push(xs.shallow_clone());

        for (lateral, lateral_block, smooth) in
            izip!(rest.iter().rev(), &self.laterals, &self.smooths)
        {
            let (_, _, lat_h, lat_w) = lateral.size4()?;
            let (_, _, top_h, top_w) = xs.size4()?;
            let ratio_h = (lat_h as f64 / top_h as f64).round();
            let ratio_w = (lat_w as f64 / top_w as f64).round();
            ensure!(
                ratio_h == 2.0 && ratio_w == 2.0,
                "lateral size {:?} is not twice the top-down size {:?}",
                (lat_h, lat_w),
                (top_h, top_w)
            );

            let lateral = lateral_block.forward_t(lateral, train);
            let merged = xs.upsample_bilinear2d(&[lat_h, lat_w], false, None, None) + lateral;
            xs = smooth.forward_t(&merged, train);
            top_down.push(xs.shallow_clone());
        }

        ensure!(
            top_down.len() == self.num_outputs(),
            "expect {} pyramid maps, but get {}",
            self.num_outputs(),
            top_down.len()
        );

        Ok(top_down)
    }
}
