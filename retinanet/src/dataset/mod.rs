//! Dataset toolkit turning COCO-style annotation stores into label records.

mod coco_;
mod coco_store;
mod image;
mod label_dataset;
mod store;

pub use coco_::*;
pub use coco_store::*;
pub use image::*;
pub use label_dataset::*;
pub use store::*;
