//! Anchor box geometry.

use crate::{bbox::CyCxHW, common::*, level::AspectRatio};

/// Compute the `(width, height)` of an anchor box.
///
/// The box keeps the area `base_size²` and the width to height ratio
/// `ratio.w : ratio.h`.
pub fn box_size(base_size: f64, ratio: &AspectRatio) -> (f64, f64) {
    let rw = ratio.w.raw();
    let rh = ratio.h.raw();
    let scale = (base_size.powi(2) / (rw * rh)).sqrt();
    (scale * rw, scale * rh)
}

/// The width and height of an anchor box in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorBox {
    pub width: f64,
    pub height: f64,
}

impl AnchorBox {
    pub fn new(base_size: f64, ratio: &AspectRatio) -> Self {
        let (width, height) = box_size(base_size, ratio);
        Self { width, height }
    }

    /// Place the anchor at a grid cell center of a level with `stride`.
    pub fn at_cell(&self, row: usize, col: usize, stride: usize) -> CyCxHW<f64> {
        let stride = stride as f64;
        CyCxHW {
            cy: (row as f64 + 0.5) * stride,
            cx: (col as f64 + 0.5) * stride,
            h: self.height,
            w: self.width,
        }
    }
}
