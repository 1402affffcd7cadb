//! facewarp-core — Face alignment via 2D similarity transforms.
//!
//! Fits a least-squares similarity transform (scale, rotation, translation,
//! optional reflection) from detected landmarks to a canonical template,
//! then warps image rasters into the aligned frame.

pub mod aligner;
pub mod error;
pub mod raster;
pub mod template;
pub mod transform;
pub mod types;
pub mod warp;

pub use aligner::{
    apply_forward, apply_inverse, estimate_batch, solve, AlignedClip, AlignedFace, Alignment,
    SimilarityAligner,
};
pub use error::AlignError;
pub use template::{Template, TemplateLayout};
pub use transform::SimilarityTransform;
pub use types::{Point2D, PointSet, Size};
pub use warp::{warp_image, Border, Interpolation, Sample, WarpOptions};
