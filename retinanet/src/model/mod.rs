//! The RetinaNet model: ResNet-50 backbone, feature pyramid and detection heads.

mod backbone;
mod conv_block;
mod fpn;
mod head;
mod retinanet;

pub use backbone::*;
pub use conv_block::*;
pub use fpn::*;
pub use head::*;
pub use retinanet::*;

use crate::{common::*, level::Level};
