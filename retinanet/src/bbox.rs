//! Bounding box types in pixel units.

use crate::common::*;

pub use cycxhw::*;
pub use rect::*;
pub use tlbr::*;

mod rect {
    use super::*;

    /// The generic rectangle.
    pub trait Rect {
        type Type;

        fn t(&self) -> Self::Type;
        fn l(&self) -> Self::Type;
        fn b(&self) -> Self::Type;
        fn r(&self) -> Self::Type;
        fn cy(&self) -> Self::Type;
        fn cx(&self) -> Self::Type;
        fn h(&self) -> Self::Type;
        fn w(&self) -> Self::Type;

        fn area(&self) -> Self::Type
        where
            Self::Type: Mul<Output = Self::Type>,
        {
            self.h() * self.w()
        }
    }

    pub trait RectFloat: Rect
    where
        Self::Type: Float,
    {
        fn intersect_with<R>(&self, other: &R) -> Option<TLBR<Self::Type>>
        where
            R: Rect<Type = Self::Type>,
        {
            let t = self.t().max(other.t());
            let l = self.l().max(other.l());
            let b = self.b().min(other.b());
            let r = self.r().min(other.r());
            (b > t && r > l).then(|| TLBR { t, l, b, r })
        }

        fn intersection_area_with<R>(&self, other: &R) -> Self::Type
        where
            R: Rect<Type = Self::Type>,
        {
            self.intersect_with(other)
                .map(|rect| rect.area())
                .unwrap_or_else(Self::Type::zero)
        }

        /// Intersection over union. Returns zero if both boxes are empty.
        fn iou_with<R>(&self, other: &R) -> Self::Type
        where
            R: Rect<Type = Self::Type>,
        {
            let inter_area = self.intersection_area_with(other);
            let union_area = self.area() + other.area() - inter_area;

            if union_area > Self::Type::zero() {
                inter_area / union_area
            } else {
                Self::Type::zero()
            }
        }
    }

    impl<T> RectFloat for T
    where
        T: Rect,
        T::Type: Float,
    {
    }
}

mod tlbr {
    use super::*;

    /// Bounding box in TLBR format.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct TLBR<T> {
        pub(crate) t: T,
        pub(crate) l: T,
        pub(crate) b: T,
        pub(crate) r: T,
    }

    impl<T> TLBR<T>
    where
        T: Copy + Num + PartialOrd,
    {
        pub fn try_from_tlbr(tlbr: [T; 4]) -> Result<Self> {
            let [t, l, b, r] = tlbr;
            ensure!(b >= t && r >= l, "b >= t and r >= l must hold");
            Ok(Self { t, l, b, r })
        }

        pub fn try_from_tlhw(tlhw: [T; 4]) -> Result<Self> {
            let [t, l, h, w] = tlhw;
            Self::try_from_tlbr([t, l, t + h, l + w])
        }

        /// Build from a COCO `[x, y, width, height]` box.
        pub fn try_from_xywh(xywh: [T; 4]) -> Result<Self> {
            let [x, y, w, h] = xywh;
            Self::try_from_tlhw([y, x, h, w])
        }
    }

    impl<T> Rect for TLBR<T>
    where
        T: Copy + Num,
    {
        type Type = T;

        fn t(&self) -> T {
            self.t
        }

        fn l(&self) -> T {
            self.l
        }

        fn b(&self) -> T {
            self.b
        }

        fn r(&self) -> T {
            self.r
        }

        fn cy(&self) -> T {
            let two = T::one() + T::one();
            self.t + self.h() / two
        }

        fn cx(&self) -> T {
            let two = T::one() + T::one();
            self.l + self.w() / two
        }

        fn h(&self) -> T {
            self.b - self.t
        }

        fn w(&self) -> T {
            self.r - self.l
        }
    }
}

mod cycxhw {
    use super::*;

    /// Bounding box in CyCxHW format.
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct CyCxHW<T> {
        pub(crate) cy: T,
        pub(crate) cx: T,
        pub(crate) h: T,
        pub(crate) w: T,
    }

    impl<T> CyCxHW<T>
    where
        T: Copy + Num + PartialOrd,
    {
        pub fn try_from_cycxhw(cycxhw: [T; 4]) -> Result<Self> {
            let [cy, cx, h, w] = cycxhw;
            let zero = T::zero();
            ensure!(h >= zero && w >= zero, "h and w must be non-negative");
            Ok(Self { cy, cx, h, w })
        }
    }

    impl<T> CyCxHW<T>
    where
        T: Float,
    {
        /// The box offsets of `self` relative to the `anchor` box.
        ///
        /// Centers are shifted in units of the anchor size and sizes are
        /// expressed in log scale, giving `[dy, dx, dh, dw]`.
        pub fn offsets_from(&self, anchor: &CyCxHW<T>) -> [T; 4] {
            [
                (self.cy - anchor.cy) / anchor.h,
                (self.cx - anchor.cx) / anchor.w,
                (self.h / anchor.h).ln(),
                (self.w / anchor.w).ln(),
            ]
        }
    }

    impl<T> Rect for CyCxHW<T>
    where
        T: Copy + Num,
    {
        type Type = T;

        fn t(&self) -> T {
            let two = T::one() + T::one();
            self.cy - self.h / two
        }

        fn l(&self) -> T {
            let two = T::one() + T::one();
            self.cx - self.w / two
        }

        fn b(&self) -> T {
            let two = T::one() + T::one();
            self.cy + self.h / two
        }

        fn r(&self) -> T {
            let two = T::one() + T::one();
            self.cx + self.w / two
        }

        fn cy(&self) -> T {
            self.cy
        }

        fn cx(&self) -> T {
            self.cx
        }

        fn h(&self) -> T {
            self.h
        }

        fn w(&self) -> T {
            self.w
        }
    }

    impl<T> From<&TLBR<T>> for CyCxHW<T>
    where
        T: Copy + Num,
    {
        fn from(from: &TLBR<T>) -> Self {
            Self {
                cy: from.cy(),
                cx: from.cx(),
                h: from.h(),
                w: from.w(),
            }
        }
    }
}
