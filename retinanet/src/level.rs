//! The feature pyramid levels and their anchor configuration.

use crate::{anchor::AnchorBox, common::*};

/// The relative width and height of an anchor box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AspectRatio {
    pub w: R64,
    pub h: R64,
}

impl AspectRatio {
    pub fn new(w: f64, h: f64) -> Self {
        Self { w: r64(w), h: r64(h) }
    }
}

/// One stage of the feature pyramid.
///
/// The spatial stride of the level is `2^number`. Levels are immutable once
/// built, and the aspect ratio list may be shared among levels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, CopyGetters, Getters)]
pub struct Level {
    #[getset(get_copy = "pub")]
    number: usize,
    #[getset(get_copy = "pub")]
    anchor_size: R64,
    #[getset(get = "pub")]
    anchor_aspect_ratios: Arc<[AspectRatio]>,
}

impl Level {
    pub fn new(
        number: usize,
        anchor_size: f64,
        anchor_aspect_ratios: Arc<[AspectRatio]>,
    ) -> Result<Self> {
        ensure!(number < 32, "level number {} is too large", number);
        ensure!(
            anchor_size.is_finite() && anchor_size > 0.0,
            "anchor_size must be positive"
        );
        ensure!(
            !anchor_aspect_ratios.is_empty(),
            "at least one anchor aspect ratio is required"
        );
        ensure!(
            anchor_aspect_ratios
                .iter()
                .all(|ratio| ratio.w > 0.0 && ratio.h > 0.0),
            "anchor aspect ratios must be positive"
        );

        Ok(Self {
            number,
            anchor_size: r64(anchor_size),
            anchor_aspect_ratios,
        })
    }

    /// The spatial stride in pixels.
    pub fn stride(&self) -> usize {
        1 << self.number
    }

    pub fn num_anchors(&self) -> usize {
        self.anchor_aspect_ratios.len()
    }

    /// The anchor box sizes in aspect ratio order.
    pub fn anchor_boxes(&self) -> Vec<AnchorBox> {
        self.anchor_aspect_ratios
            .iter()
            .map(|ratio| AnchorBox::new(self.anchor_size.raw(), ratio))
            .collect()
    }

    /// The label grid size for an image of `(height, width)` pixels.
    ///
    /// Partial cells at the bottom and right borders are dropped.
    pub fn grid_size(&self, image_size: (usize, usize)) -> (usize, usize) {
        let (height, width) = image_size;
        (height >> self.number, width >> self.number)
    }

    /// The feature map size a backbone produces for an input of
    /// `(height, width)` pixels, assuming same-padded stride-2 downsampling.
    pub fn feature_size(&self, input_size: (i64, i64)) -> (i64, i64) {
        let (height, width) = input_size;
        let stride = self.stride() as i64;
        (ceil_div(height, stride), ceil_div(width, stride))
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ratios = self
            .anchor_aspect_ratios
            .iter()
            .map(|ratio| format!("({}, {})", ratio.w, ratio.h))
            .join(", ");
        write!(
            f,
            "Level(number={}, anchor_size={}, anchor_aspect_ratios=[{}])",
            self.number, self.anchor_size, ratios
        )
    }
}

/// Build the canonical pyramid levels 3 to 7 in ascending order.
pub fn make_levels() -> Vec<Level> {
    let ratios: Arc<[AspectRatio]> = Arc::from(vec![
        AspectRatio::new(1.0, 2.0),
        AspectRatio::new(1.0, 1.0),
        AspectRatio::new(2.0, 1.0),
    ]);

    [(3, 32.0), (4, 64.0), (5, 128.0), (6, 256.0), (7, 512.0)]
        .into_iter()
        .map(|(number, anchor_size)| Level {
            number,
            anchor_size: r64(anchor_size),
            anchor_aspect_ratios: ratios.clone(),
        })
        .collect()
}

fn ceil_div(lhs: i64, rhs: i64) -> i64 {
    (lhs + rhs - 1) / rhs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_levels() {
        let levels = make_levels();
        let numbers: Vec<_> = levels.iter().map(|level| level.number()).collect();
        assert_eq!(numbers, vec![3, 4, 5, 6, 7]);

        levels.iter().tuple_windows().for_each(|(lhs, rhs)| {
            assert_eq!(rhs.number(), lhs.number() + 1);
            assert_eq!(rhs.anchor_size(), lhs.anchor_size() * 2.0);
            assert!(Arc::ptr_eq(
                lhs.anchor_aspect_ratios(),
                rhs.anchor_aspect_ratios()
            ));
        });

        assert_eq!(levels[0].anchor_size(), 32.0);
        assert!(levels.iter().all(|level| level.num_anchors() == 3));
    }

    #[test]
    fn grid_and_feature_size() {
        let levels = make_levels();
        assert_eq!(levels[0].grid_size((640, 480)), (80, 60));
        assert_eq!(levels[4].grid_size((640, 480)), (5, 3));
        assert_eq!(levels[4].feature_size((640, 480)), (5, 4));
        assert_eq!(levels[0].feature_size((100, 100)), (13, 13));
    }

    #[test]
    fn invalid_level() {
        let ratios: Arc<[AspectRatio]> = Arc::from(vec![AspectRatio::new(1.0, 1.0)]);
        assert!(Level::new(3, 0.0, ratios.clone()).is_err());
        assert!(Level::new(3, 32.0, Arc::from(vec![])).is_err());
        assert!(Level::new(3, 32.0, ratios).is_ok());
    }
}
