//! Least-squares similarity alignment between corresponding point sets.
//!
//! For each source/target pair `(u, v) -> (x, y)` the non-reflective fit
//! stacks two equations
//! ```text
//!   u·sc − v·ss + tx = x
//!   v·sc + u·ss + ty = y
//! ```
//! into a 2N×4 system and solves `[sc, ss, tx, ty]` jointly by SVD.

use crate::error::AlignError;
use crate::template::Template;
use crate::transform::SimilarityTransform;
use crate::types::{PointSet, Size};
use crate::warp::{warp_image, Sample, WarpOptions};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

const SIMILARITY_PARAMS: usize = 4;
const MIN_CORRESPONDENCES: usize = 2;
/// A fit whose mapped source spread is below this fraction of the target's
/// extent has collapsed the plane.
const COLLAPSE_TOLERANCE: f64 = 1e-12;

/// A fitted transform pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    /// Maps source (detected) coordinates to target (template) coordinates.
    pub forward: SimilarityTransform,
    /// Maps target coordinates back to source coordinates.
    pub inverse: SimilarityTransform,
    /// Whether the reflected candidate won.
    pub reflected: bool,
    /// Sum of squared distances between the mapped source points and the targets.
    pub residual: f64,
}

impl Alignment {
    fn new(forward: SimilarityTransform, reflected: bool, residual: f64) -> Result<Self, AlignError> {
        let inverse = forward.inverse().ok_or_else(|| {
            AlignError::degenerate("fitted transform is singular (target points coincide)")
        })?;
        Ok(Self {
            forward,
            inverse,
            reflected,
            residual,
        })
    }

    pub fn into_pair(self) -> (SimilarityTransform, SimilarityTransform) {
        (self.forward, self.inverse)
    }
}

fn validate_pairs(source: &PointSet, target: &PointSet) -> Result<(), AlignError> {
    if source.len() != target.len() {
        return Err(AlignError::degenerate(format!(
            "source has {} points but target has {}",
            source.len(),
            target.len()
        )));
    }
    if source.len() < MIN_CORRESPONDENCES {
        return Err(AlignError::degenerate(format!(
            "need at least {MIN_CORRESPONDENCES} correspondences, got {}",
            source.len()
        )));
    }
    if !source.is_finite() || !target.is_finite() {
        return Err(AlignError::degenerate("point coordinates must be finite"));
    }
    Ok(())
}

/// Solve the non-reflective system for `source -> target`.
fn fit_non_reflective(
    source: &PointSet,
    target: &PointSet,
) -> Result<SimilarityTransform, AlignError> {
    let rows = 2 * source.len();
    let mut design = DMatrix::<f64>::zeros(rows, SIMILARITY_PARAMS);
    let mut rhs = DVector::<f64>::zeros(rows);

    for (i, (s, t)) in source.iter().zip(target.iter()).enumerate() {
        let r = 2 * i;
        // [u, -v, 1, 0] · [sc, ss, tx, ty] = x
        design[(r, 0)] = s.x;
        design[(r, 1)] = -s.y;
        design[(r, 2)] = 1.0;
        rhs[r] = t.x;
        // [v, u, 0, 1] · [sc, ss, tx, ty] = y
        design[(r + 1, 0)] = s.y;
        design[(r + 1, 1)] = s.x;
        design[(r + 1, 3)] = 1.0;
        rhs[r + 1] = t.y;
    }

    let svd = design.svd(true, true);
    let eps = svd.singular_values.max() * rows.max(SIMILARITY_PARAMS) as f64 * f64::EPSILON;
    let rank = svd.rank(eps);
    if rank < SIMILARITY_PARAMS {
        return Err(AlignError::degenerate(format!(
            "design matrix has rank {rank}, need {SIMILARITY_PARAMS} (source points coincide)"
        )));
    }

    let params = svd
        .solve(&rhs, eps)
        .map_err(|e| AlignError::degenerate(format!("least-squares solve failed: {e}")))?;

    Ok(SimilarityTransform::from_params(
        params[0], params[1], params[2], params[3],
    ))
}

/// Reject a fit that maps the sources to a single point within rounding.
fn ensure_not_collapsed(
    transform: &SimilarityTransform,
    source: &PointSet,
    target: &PointSet,
) -> Result<(), AlignError> {
    let mapped_spread = transform.scale() * source.rms_radius();
    let target_extent = target.rms_radius().max(target.max_abs_coordinate());
    if mapped_spread <= COLLAPSE_TOLERANCE * target_extent {
        return Err(AlignError::degenerate(
            "fitted transform collapses the source points (target points coincide)",
        ));
    }
    Ok(())
}

fn forward_residual(transform: &SimilarityTransform, source: &PointSet, target: &PointSet) -> f64 {
    apply_forward(transform, source).sum_squared_distance(target)
}

/// Fit the best similarity transform mapping `source` onto `target`.
///
/// With `allow_reflection`, a second candidate is fitted against the
/// x-mirrored targets and un-mirrored; whichever candidate leaves the smaller
/// forward residual wins (ties keep the non-reflective one). Collinear
/// sources are rejected in that mode since both orientations fit equally.
pub fn solve(
    source: &PointSet,
    target: &PointSet,
    allow_reflection: bool,
) -> Result<Alignment, AlignError> {
    validate_pairs(source, target)?;

    let direct = fit_non_reflective(source, target)?;
    let direct_residual = forward_residual(&direct, source, target);

    if !allow_reflection {
        tracing::debug!(
            points = source.len(),
            residual = direct_residual,
            "similarity fit (reflection disabled)"
        );
        ensure_not_collapsed(&direct, source, target)?;
        return Alignment::new(direct, false, direct_residual);
    }

    if source.is_collinear() {
        return Err(AlignError::degenerate(
            "source points are collinear; reflection cannot be resolved",
        ));
    }

    let mirrored = fit_non_reflective(source, &target.mirrored_x())?.reflected();
    let mirrored_residual = forward_residual(&mirrored, source, target);

    tracing::debug!(
        points = source.len(),
        direct_residual,
        mirrored_residual,
        "similarity candidates scored"
    );

    let (best, reflected, residual) = if mirrored_residual < direct_residual {
        (mirrored, true, mirrored_residual)
    } else {
        (direct, false, direct_residual)
    };
    ensure_not_collapsed(&best, source, target)?;
    Alignment::new(best, reflected, residual)
}

/// Map every point through `transform`.
pub fn apply_forward(transform: &SimilarityTransform, points: &PointSet) -> PointSet {
    points.iter().map(|p| transform.apply(*p)).collect()
}

/// Map every point through the algebraic inverse of `transform`.
pub fn apply_inverse(
    transform: &SimilarityTransform,
    points: &PointSet,
) -> Result<PointSet, AlignError> {
    let inverse = transform
        .inverse()
        .ok_or_else(|| AlignError::degenerate("transform is singular and has no inverse"))?;
    Ok(apply_forward(&inverse, points))
}

/// Jointly align many source sets to one shared target.
///
/// The sets are concatenated against the target repeated once per set and
/// solved as a single system, yielding one transform for the whole batch.
pub fn estimate_batch(
    sources: &[PointSet],
    target: &PointSet,
    allow_reflection: bool,
) -> Result<Alignment, AlignError> {
    if sources.is_empty() {
        return Err(AlignError::degenerate("no source point sets to align"));
    }
    if let Some((i, s)) = sources
        .iter()
        .enumerate()
        .find(|(_, s)| s.len() != target.len())
    {
        return Err(AlignError::degenerate(format!(
            "source set {i} has {} points but target has {}",
            s.len(),
            target.len()
        )));
    }

    let combined_source = PointSet::concat(sources);
    let combined_target = PointSet::concat(std::iter::repeat(target).take(sources.len()));

    tracing::debug!(sets = sources.len(), points = combined_source.len(), "batch alignment");
    solve(&combined_source, &combined_target, allow_reflection)
}

/// An aligned crop plus the transform pair that produced it.
#[derive(Debug, Clone)]
pub struct AlignedFace<S> {
    pub image: Array3<S>,
    pub alignment: Alignment,
}

/// Frames of a clip warped with one shared transform.
#[derive(Debug, Clone)]
pub struct AlignedClip<S> {
    pub frames: Vec<Array3<S>>,
    pub alignment: Alignment,
}

/// Alignment policies bundled for repeated use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityAligner {
    pub allow_reflection: bool,
    pub warp: WarpOptions,
}

impl Default for SimilarityAligner {
    fn default() -> Self {
        Self {
            allow_reflection: true,
            warp: WarpOptions::default(),
        }
    }
}

impl SimilarityAligner {
    pub fn new(allow_reflection: bool, warp: WarpOptions) -> Self {
        Self {
            allow_reflection,
            warp,
        }
    }

    pub fn solve(&self, source: &PointSet, target: &PointSet) -> Result<Alignment, AlignError> {
        solve(source, target, self.allow_reflection)
    }

    pub fn estimate_batch(
        &self,
        sources: &[PointSet],
        target: &PointSet,
    ) -> Result<Alignment, AlignError> {
        estimate_batch(sources, target, self.allow_reflection)
    }

    pub fn warp<S: Sample>(
        &self,
        image: ArrayView3<'_, S>,
        transform: &SimilarityTransform,
        output_size: Size,
    ) -> Result<Array3<S>, AlignError> {
        warp_image(image, transform, output_size, &self.warp)
    }

    /// Fit `landmarks` to `template` laid out at `output_size` and warp the
    /// face into that crop.
    pub fn align_face<S: Sample>(
        &self,
        image: ArrayView3<'_, S>,
        landmarks: &PointSet,
        template: &Template,
        output_size: Size,
    ) -> Result<AlignedFace<S>, AlignError> {
        let target = template.points_for(output_size)?;
        let alignment = self.solve(landmarks, &target)?;
        let image = self.warp(image, &alignment.forward, output_size)?;
        Ok(AlignedFace { image, alignment })
    }

    /// Fit one transform from every landmark set of a clip and warp all
    /// frames with it.
    pub fn align_clip<S: Sample>(
        &self,
        frames: &[ArrayView3<'_, S>],
        landmark_sets: &[PointSet],
        template: &Template,
        output_size: Size,
    ) -> Result<AlignedClip<S>, AlignError> {
        let target = template.points_for(output_size)?;
        let alignment = self.estimate_batch(landmark_sets, &target)?;
        let frames = frames
            .iter()
            .map(|frame| self.warp(frame.view(), &alignment.forward, output_size))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AlignedClip { frames, alignment })
    }

    /// Map crop-space points back into original image coordinates.
    pub fn map_back(&self, alignment: &Alignment, points: &PointSet) -> PointSet {
        apply_forward(&alignment.inverse, points)
    }
}
