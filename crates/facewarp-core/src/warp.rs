//! Inverse-mapping affine warp of H×W×C rasters.

use crate::error::AlignError;
use crate::transform::SimilarityTransform;
use crate::types::Size;
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A numeric pixel sample that can be resampled in `f64`.
pub trait Sample: Copy + Send + Sync + 'static {
    fn to_f64(self) -> f64;
    /// Convert back, rounding and saturating for integer types.
    fn from_f64(v: f64) -> Self;
}

impl Sample for u8 {
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v.round().clamp(0.0, u8::MAX as f64) as u8
    }
}

impl Sample for u16 {
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v.round().clamp(0.0, u16::MAX as f64) as u16
    }
}

impl Sample for f32 {
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl Sample for f64 {
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
}

/// Resampling kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
}

impl FromStr for Interpolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "bilinear" | "linear" => Ok(Self::Bilinear),
            other => Err(format!("unknown interpolation {other:?} (expected nearest|bilinear)")),
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
        })
    }
}

/// What a sample outside the source raster reads as.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Border {
    /// Every out-of-bounds tap reads this value.
    Constant(f64),
    /// Clamp to the nearest edge pixel.
    Replicate,
}

impl Default for Border {
    fn default() -> Self {
        Self::Constant(0.0)
    }
}

impl FromStr for Border {
    type Err = String;

    /// `replicate`, `constant:<value>` or a bare number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("replicate") || s.eq_ignore_ascii_case("edge") {
            return Ok(Self::Replicate);
        }
        let value = s.strip_prefix("constant:").unwrap_or(s);
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Self::Constant)
            .ok_or_else(|| format!("unknown border {s:?} (expected replicate or a fill value)"))
    }
}

impl fmt::Display for Border {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "constant:{v}"),
            Self::Replicate => f.write_str("replicate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WarpOptions {
    pub interpolation: Interpolation,
    pub border: Border,
}

struct Sampler<'a, S> {
    image: ArrayView3<'a, S>,
    width: i64,
    height: i64,
    border: Border,
}

impl<S: Sample> Sampler<'_, S> {
    /// Pull a coordinate into `[-2, extent + 1]`. Every tap outside that
    /// range reads the border, so sampling is unchanged and the integer
    /// neighbours cannot overflow.
    fn clamp_coord(v: f64, extent: i64) -> f64 {
        if v.is_nan() {
            return -2.0;
        }
        v.clamp(-2.0, extent as f64 + 1.0)
    }

    fn fetch(&self, x: i64, y: i64, ch: usize) -> f64 {
        if x >= 0 && x < self.width && y >= 0 && y < self.height {
            return self.image[[y as usize, x as usize, ch]].to_f64();
        }
        match self.border {
            Border::Constant(v) => v,
            Border::Replicate if self.width > 0 && self.height > 0 => {
                let cx = x.clamp(0, self.width - 1) as usize;
                let cy = y.clamp(0, self.height - 1) as usize;
                self.image[[cy, cx, ch]].to_f64()
            }
            Border::Replicate => 0.0,
        }
    }

    fn nearest(&self, sx: f64, sy: f64, ch: usize) -> f64 {
        let sx = Self::clamp_coord(sx, self.width);
        let sy = Self::clamp_coord(sy, self.height);
        self.fetch(sx.round() as i64, sy.round() as i64, ch)
    }

    fn bilinear(&self, sx: f64, sy: f64, ch: usize) -> f64 {
        let sx = Self::clamp_coord(sx, self.width);
        let sy = Self::clamp_coord(sy, self.height);
        let x0 = sx.floor();
        let y0 = sy.floor();
        let fx = sx - x0;
        let fy = sy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        self.fetch(x0, y0, ch) * (1.0 - fx) * (1.0 - fy)
            + self.fetch(x0 + 1, y0, ch) * fx * (1.0 - fy)
            + self.fetch(x0, y0 + 1, ch) * (1.0 - fx) * fy
            + self.fetch(x0 + 1, y0 + 1, ch) * fx * fy
    }
}

/// Resample `image` into an `output_size` raster under `transform`.
///
/// Each destination pixel `(x, y)` reads the source at the inverse-mapped
/// coordinate. Pixel coordinates are integer positions (no half-pixel
/// offset). The channel count and sample type are preserved.
pub fn warp_image<S: Sample>(
    image: ArrayView3<'_, S>,
    transform: &SimilarityTransform,
    output_size: Size,
    options: &WarpOptions,
) -> Result<Array3<S>, AlignError> {
    if !output_size.is_positive() {
        return Err(AlignError::geometry(format!(
            "output size must be positive, got {output_size}"
        )));
    }
    let inverse = transform
        .inverse()
        .ok_or_else(|| AlignError::degenerate("cannot warp with a singular transform"))?;
    let [[a, c, tx], [b, d, ty]] = inverse.affine_2x3();

    let (src_h, src_w, channels) = image.dim();
    let out_w = output_size.width as usize;
    let out_h = output_size.height as usize;

    let sampler = Sampler {
        image,
        width: src_w as i64,
        height: src_h as i64,
        border: options.border,
    };

    let mut output = Array3::from_elem((out_h, out_w, channels), S::from_f64(0.0));
    for oy in 0..out_h {
        for ox in 0..out_w {
            let (u, v) = (ox as f64, oy as f64);
            let sx = a * u + c * v + tx;
            let sy = b * u + d * v + ty;

            for ch in 0..channels {
                let val = match options.interpolation {
                    Interpolation::Nearest => sampler.nearest(sx, sy, ch),
                    Interpolation::Bilinear => sampler.bilinear(sx, sy, ch),
                };
                output[[oy, ox, ch]] = S::from_f64(val);
            }
        }
    }

    Ok(output)
}
