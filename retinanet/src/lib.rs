//! Label generation and feature pyramid detection model for COCO-style datasets.

mod common;
pub mod anchor;
pub mod bbox;
pub mod config;
pub mod dataset;
pub mod label;
pub mod level;
pub mod model;

pub use anchor::*;
pub use level::*;
