//! Canonical landmark templates that detected faces are aligned toward.

use crate::error::AlignError;
use crate::types::{PointSet, Size};
use serde::{Deserialize, Serialize};

/// ArcFace reference landmarks for a 112×112 crop.
const ARCFACE_112: [(f64, f64); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Five-point reference for the classic 96×112 face crop.
const MTCNN_96X112: [(f64, f64); 5] = [
    (30.2946, 51.6963),
    (65.5318, 51.5014),
    (48.0252, 71.7366),
    (33.5493, 92.3655),
    (62.7299, 92.2041),
];

/// Largest mismatch, in output pixels, tolerated between the requested
/// crop aspect and the template's.
const ASPECT_TOLERANCE_PX: f64 = 0.5;

/// A named landmark layout defined on a reference raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub size: Size,
    pub points: PointSet,
}

/// How to lay a template out on an output crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateLayout {
    pub output_size: Size,
    /// Fraction of the reference crop added on each side, in `[0, 1]`.
    pub inner_padding: f64,
    /// Pixels reserved on both sides of the output, per axis.
    pub outer_padding: (u32, u32),
    /// Pad the reference crop's short side to make it square first.
    pub square: bool,
}

impl TemplateLayout {
    pub fn new(output_size: Size) -> Self {
        Self {
            output_size,
            inner_padding: 0.0,
            outer_padding: (0, 0),
            square: false,
        }
    }
}

impl Template {
    pub fn new(name: impl Into<String>, size: Size, points: PointSet) -> Result<Self, AlignError> {
        let name = name.into();
        if !size.is_positive() {
            return Err(AlignError::geometry(format!(
                "template {name:?} has empty reference size {size}"
            )));
        }
        if points.len() < 2 || !points.is_finite() {
            return Err(AlignError::degenerate(format!(
                "template {name:?} needs at least 2 finite points, got {}",
                points.len()
            )));
        }
        Ok(Self { name, size, points })
    }

    pub fn arcface_112() -> Self {
        Self {
            name: "arcface-112".into(),
            size: Size::square(112),
            points: PointSet::from(ARCFACE_112),
        }
    }

    pub fn mtcnn_96x112() -> Self {
        Self {
            name: "mtcnn-96x112".into(),
            size: Size::new(96, 112),
            points: PointSet::from(MTCNN_96X112),
        }
    }

    pub fn builtins() -> Vec<Template> {
        vec![Self::arcface_112(), Self::mtcnn_96x112()]
    }

    pub fn builtin(name: &str) -> Option<Template> {
        Self::builtins().into_iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Target points for an unpadded crop of `output_size`.
    pub fn points_for(&self, output_size: Size) -> Result<PointSet, AlignError> {
        if output_size == self.size {
            return Ok(self.points.clone());
        }
        self.layout(&TemplateLayout::new(output_size))
    }

    /// Target points for a padded and rescaled crop.
    ///
    /// The padded reference crop is scaled uniformly to fill
    /// `output_size − 2·outer_padding`, so the two must share an aspect ratio.
    pub fn layout(&self, layout: &TemplateLayout) -> Result<PointSet, AlignError> {
        let out = layout.output_size;
        if !out.is_positive() {
            return Err(AlignError::geometry(format!(
                "output size must be positive, got {out}"
            )));
        }
        let pad = layout.inner_padding;
        if !(0.0..=1.0).contains(&pad) {
            return Err(AlignError::geometry(format!(
                "inner padding must be within [0, 1], got {pad}"
            )));
        }

        let mut points = self.points.clone();
        let (mut crop_w, mut crop_h) = (self.size.width as f64, self.size.height as f64);

        if layout.square {
            let side = crop_w.max(crop_h);
            points = points.translated((side - crop_w) / 2.0, (side - crop_h) / 2.0);
            crop_w = side;
            crop_h = side;
        }

        if pad > 0.0 {
            let (dw, dh) = (crop_w * pad * 2.0, crop_h * pad * 2.0);
            points = points.translated(dw / 2.0, dh / 2.0);
            crop_w += dw;
            crop_h += dh;
        }

        let (px, py) = layout.outer_padding;
        if 2 * u64::from(px) >= u64::from(out.width) || 2 * u64::from(py) >= u64::from(out.height) {
            return Err(AlignError::geometry(format!(
                "outer padding {px}x{py} leaves no room in {out}"
            )));
        }
        let inner_w = (out.width - 2 * px) as f64;
        let inner_h = (out.height - 2 * py) as f64;

        let scale = inner_w / crop_w;
        if (crop_h * scale - inner_h).abs() > ASPECT_TOLERANCE_PX {
            return Err(AlignError::geometry(format!(
                "{} crop {crop_w}x{crop_h} cannot fill {inner_w}x{inner_h} with uniform scale",
                self.name
            )));
        }

        Ok(points.scaled(scale).translated(px as f64, py as f64))
    }
}
