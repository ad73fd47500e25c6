/*
  Copyright© 2023 Raúl Wolters(1)

  This file is part of rustronomy-segmentation.

  rustronomy is free software: you can redistribute it and/or modify it under
  the terms of the European Union Public License version 1.2 or later, as
  published by the European Commission.

  rustronomy is distributed in the hope that it will be useful, but WITHOUT ANY
  WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
  A PARTICULAR PURPOSE. See the European Union Public License for more details.

  You should have received a copy of the EUPL in an/all official language(s) of
  the European Union along with rustronomy.  If not, see
  <https://ec.europa.eu/info/european-union-public-licence_en/>.

  (1) Resident of the Kingdom of the Netherlands; agreement between licensor and
  licensee subject to Dutch law as per article 15 of the EUPL.
*/

//! Chamfer distance transforms.
//!
//! All transforms use the classic two-pass raster propagation: a *forward*
//! sweep in increasing raster order with the forward half of the chamfer mask,
//! followed by a *backward* sweep in decreasing raster order with the mirrored
//! half. Each voxel takes the minimum over the mask of "neighbour distance +
//! offset weight". The geodesic transform repeats the pair of sweeps until
//! nothing changes, because the mask it is constrained to can force paths
//! that wind back against the sweep direction.
//!
//! The output type is chosen with the [`DistanceValue`] parameter: `u16` and
//! `i32` use the integer weight table of the mask with saturating arithmetic,
//! `f32` uses the float weight table. In every type the maximal representable
//! value is the "infinity" sentinel for voxels that no source can reach.

use crate::chamfer::{ChamferMask, ChamferOffset};
use crate::control::{Control, Stage};
use crate::error::{raise, Outcome, Warning, WatershedError, WsResult};
use crate::grid::{try_alloc, Grid, Sample, Shape};

////////////////////////////////////////////////////////////////////////////////
//                              DISTANCE VALUES                               //
////////////////////////////////////////////////////////////////////////////////

/// Sample types a distance map can be computed in
pub trait DistanceValue: Sample {
  /// Sentinel for unreachable voxels
  const UNREACHABLE: Self;

  /// Whether final values are multiplied with the grid spacing
  const CALIBRATED: bool;

  /// Weight of `offset` in this type's weight table
  fn weight(offset: &ChamferOffset) -> Self;

  /// Weight of the unit step along x
  fn normalisation(mask: &ChamferMask) -> Self;

  /// `self + weight`. Infinity stays infinite; finite sums are clamped just
  /// below infinity, raising `saturated`.
  fn add_weight(self, weight: Self, saturated: &mut bool) -> Self;

  /// Divides a finite value by `by`
  fn normalise(self, by: Self) -> Self;

  /// Multiplies a finite value by `factor`
  fn scale(self, factor: f64) -> Self;
}

macro_rules! impl_integer_distance {
  ($t:ty, $wide:ty) => {
    impl DistanceValue for $t {
      const UNREACHABLE: Self = <$t>::MAX;
      const CALIBRATED: bool = false;

      #[inline(always)]
      fn weight(offset: &ChamferOffset) -> Self {
        offset.short_weight as $t
      }

      fn normalisation(mask: &ChamferMask) -> Self {
        mask.short_normalisation() as $t
      }

      #[inline(always)]
      fn add_weight(self, weight: Self, saturated: &mut bool) -> Self {
        if self == Self::UNREACHABLE {
          return self;
        }
        let sum = self as $wide + weight as $wide;
        if sum >= Self::UNREACHABLE as $wide {
          *saturated = true;
          Self::UNREACHABLE - 1
        } else {
          sum as $t
        }
      }

      fn normalise(self, by: Self) -> Self {
        self / by
      }

      fn scale(self, _factor: f64) -> Self {
        self
      }
    }
  };
}

impl_integer_distance!(u16, u32);
impl_integer_distance!(i32, i64);

impl DistanceValue for f32 {
  const UNREACHABLE: Self = f32::MAX;
  const CALIBRATED: bool = true;

  #[inline(always)]
  fn weight(offset: &ChamferOffset) -> Self {
    offset.float_weight
  }

  fn normalisation(mask: &ChamferMask) -> Self {
    mask.float_normalisation()
  }

  #[inline(always)]
  fn add_weight(self, weight: Self, saturated: &mut bool) -> Self {
    if self == Self::UNREACHABLE {
      return self;
    }
    let sum = self + weight;
    if sum >= Self::UNREACHABLE {
      *saturated = true;
      Self::UNREACHABLE.predecessor()
    } else {
      sum
    }
  }

  fn normalise(self, by: Self) -> Self {
    self / by
  }

  fn scale(self, factor: f64) -> Self {
    (self as f64 * factor) as f32
  }
}

////////////////////////////////////////////////////////////////////////////////
//                                 RESULTS                                    //
////////////////////////////////////////////////////////////////////////////////

/// Which voxels of a binary grid are at distance zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sources {
  /// Non-zero voxels are sources. Background voxels receive the distance to
  /// the nearest foreground voxel.
  #[default]
  Foreground,
  /// Zero voxels are sources. Foreground voxels receive the distance to the
  /// nearest background voxel (the "inside" distance used to split touching
  /// particles).
  Background,
}

/// A distance grid plus the data-quality warnings raised while computing it
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMap<W> {
  pub grid: Grid<W>,
  pub warnings: Vec<Warning>,
}

impl<W: DistanceValue> DistanceMap<W> {
  /// Number of voxels holding the infinity sentinel
  pub fn unreachable(&self) -> usize {
    self.grid.as_slice().iter().filter(|&&d| d == W::UNREACHABLE).count()
  }

  /// Largest finite distance, if any
  pub fn max_finite(&self) -> Option<W> {
    self.grid.as_slice().iter().copied().filter(|&d| d != W::UNREACHABLE).fold(None, |acc, d| {
      match acc {
        Some(m) if m >= d => Some(m),
        _ => Some(d),
      }
    })
  }
}

////////////////////////////////////////////////////////////////////////////////
//                               RASTER SWEEPS                                //
////////////////////////////////////////////////////////////////////////////////

/// `(offset, weight)` pairs of one half-mask in the output type
fn half_mask<W: DistanceValue>(half: &[ChamferOffset]) -> Vec<([isize; 3], W)> {
  half.iter().map(|o| (o.delta(), W::weight(o))).collect()
}

#[inline(always)]
fn ordered(n: usize, reverse: bool) -> impl Iterator<Item = usize> {
  (0..n).map(move |i| if reverse { n - 1 - i } else { i })
}

/// One chamfer sweep over a region grid. Voxels of region 0 are sources and
/// are never updated. A neighbour from another region acts as a source; a
/// neighbour from the same region propagates its own distance. Returns `false`
/// if cancelled.
fn region_sweep<W: DistanceValue>(
  shape: Shape,
  regions: &[u32],
  half: &[([isize; 3], W)],
  dist: &mut [W],
  reverse: bool,
  saturated: &mut bool,
  control: &Control,
) -> bool {
  for z in ordered(shape.depth, reverse) {
    for y in ordered(shape.height, reverse) {
      if control.is_cancelled() {
        return false;
      }
      for x in ordered(shape.width, reverse) {
        let idx = shape.index(x, y, z);
        let region = regions[idx];
        if region == 0 {
          continue;
        }
        let mut best = dist[idx];
        for &(d, w) in half {
          if let Some(n) = shape.offset((x, y, z), d) {
            let candidate = if regions[n] == region { dist[n].add_weight(w, saturated) } else { w };
            if candidate < best {
              best = candidate;
            }
          }
        }
        dist[idx] = best;
      }
    }
  }
  true
}

/// Forward and backward sweep over a region grid (see [`region_sweep`])
fn chamfer_regions<W: DistanceValue>(
  shape: Shape,
  regions: &[u32],
  mask: &ChamferMask,
  control: &Control,
) -> WsResult<Outcome<(Vec<W>, bool)>> {
  let mut dist = try_alloc(shape.len(), W::UNREACHABLE)?;
  for (d, &r) in dist.iter_mut().zip(regions) {
    if r == 0 {
      *d = W::zero();
    }
  }
  let rows = shape.height * shape.depth;
  let mut saturated = false;

  let forward = half_mask::<W>(mask.forward());
  let done = control.stage(Stage::DistanceForward, || {
    region_sweep(shape, regions, &forward, &mut dist, false, &mut saturated, control)
  });
  if !done {
    return Ok(Outcome::Cancelled);
  }
  control.progress(Stage::DistanceForward, rows, rows);

  let backward = half_mask::<W>(mask.backward());
  let done = control.stage(Stage::DistanceBackward, || {
    region_sweep(shape, regions, &backward, &mut dist, true, &mut saturated, control)
  });
  if !done {
    return Ok(Outcome::Cancelled);
  }
  control.progress(Stage::DistanceBackward, rows, rows);

  Ok(Outcome::Complete((dist, saturated)))
}

fn check_mask(shape: Shape, mask: &ChamferMask) -> WsResult<()> {
  if mask.is_planar() && !shape.is_planar() {
    Err(WatershedError::InvalidParameter(format!(
      "a planar chamfer mask cannot measure distances in a {shape} volume"
    )))
  } else {
    Ok(())
  }
}

/// Normalisation, calibration and warnings shared by all transforms.
/// `eligible` counts the voxels that should have received a finite distance.
fn finish<W: DistanceValue, S: Sample>(
  template: &Grid<S>,
  mut dist: Vec<W>,
  mask: &ChamferMask,
  normalize: bool,
  saturated: bool,
  eligible: usize,
  no_sources: bool,
) -> WsResult<DistanceMap<W>> {
  let shape = template.shape();
  let calibration = template.calibration();
  let mut warnings = Vec::new();

  let scale = W::CALIBRATED && !calibration.is_unit(shape);
  if scale && !calibration.is_isotropic(shape) {
    raise(&mut warnings, Warning::AnisotropicSpacing);
  }
  let by = W::normalisation(mask);
  let mut unreachable = 0;
  for d in dist.iter_mut() {
    if *d == W::UNREACHABLE {
      unreachable += 1;
      continue;
    }
    if normalize {
      *d = d.normalise(by);
    }
    if scale {
      *d = d.scale(calibration.x);
    }
  }

  if saturated {
    raise(&mut warnings, Warning::Saturated);
  }
  if no_sources && eligible > 0 {
    raise(&mut warnings, Warning::NoSources);
  } else if unreachable > 0 {
    raise(&mut warnings, Warning::Unreachable { count: unreachable });
  }

  let grid = Grid::from_vec(shape, dist)?.with_calibration(calibration.clone());
  Ok(DistanceMap { grid, warnings })
}

////////////////////////////////////////////////////////////////////////////////
//                              PUBLIC TRANSFORMS                             //
////////////////////////////////////////////////////////////////////////////////

/// Chamfer distance map of a binary grid (non-zero = foreground).
///
/// With [`Sources::Foreground`] every foreground voxel is 0 and every
/// background voxel holds the distance to the nearest foreground voxel; with
/// [`Sources::Background`] the roles are swapped. If `normalize` is set, values
/// are divided by the weight of the unit step so that one orthogonal step
/// measures 1 (integer outputs use integer division). Float outputs are
/// multiplied with the x spacing of the grid calibration.
///
/// Without any source voxel all other voxels hold `W::UNREACHABLE` and the result
/// carries [`Warning::NoSources`].
pub fn distance_map<T: Sample, W: DistanceValue>(
  grid: &Grid<T>,
  mask: &ChamferMask,
  sources: Sources,
  normalize: bool,
  control: &Control,
) -> WsResult<Outcome<DistanceMap<W>>> {
  let shape = grid.shape();
  check_mask(shape, mask)?;

  //Region 0 holds the sources, region 1 everything else
  let source_is_foreground = sources == Sources::Foreground;
  let regions: Vec<u32> = grid
    .as_slice()
    .iter()
    .map(|v| if v.is_foreground() == source_is_foreground { 0 } else { 1 })
    .collect();
  let eligible = regions.iter().filter(|&&r| r != 0).count();
  let no_sources = eligible == regions.len();

  let (dist, saturated) = match chamfer_regions::<W>(shape, &regions, mask, control)? {
    Outcome::Complete(swept) => swept,
    Outcome::Cancelled => return Ok(Outcome::Cancelled),
  };
  finish(grid, dist, mask, normalize, saturated, eligible, no_sources).map(Outcome::Complete)
}

/// Label-aware chamfer distance map.
///
/// Label 0 voxels are 0. Every labeled voxel holds the distance to the
/// nearest voxel carrying a different label (or label 0), so touching regions
/// each get their own distance ridge.
pub fn label_distance_map<W: DistanceValue>(
  labels: &Grid<u32>,
  mask: &ChamferMask,
  normalize: bool,
  control: &Control,
) -> WsResult<Outcome<DistanceMap<W>>> {
  let shape = labels.shape();
  check_mask(shape, mask)?;

  let regions = labels.as_slice();
  let eligible = regions.iter().filter(|&&r| r != 0).count();
  //A single label covering the whole grid has no boundary at all
  let first = regions.first().copied().unwrap_or(0);
  let no_sources = first != 0 && regions.iter().all(|&r| r == first);

  let (dist, saturated) = match chamfer_regions::<W>(shape, regions, mask, control)? {
    Outcome::Complete(swept) => swept,
    Outcome::Cancelled => return Ok(Outcome::Cancelled),
  };
  finish(labels, dist, mask, normalize, saturated, eligible, no_sources).map(Outcome::Complete)
}

/// Geodesic chamfer distance from the non-zero voxels of `marker`, measured
/// along paths that stay inside the non-zero voxels of `mask`.
///
/// Voxels outside the mask are 0. Mask voxels that no marker can reach hold
/// `W::UNREACHABLE` and are reported with [`Warning::Unreachable`]; callers that
/// derive geodesic lengths from this map must treat them as disconnected.
pub fn geodesic_distance_map<M: Sample, K: Sample, W: DistanceValue>(
  marker: &Grid<M>,
  mask: &Grid<K>,
  chamfer: &ChamferMask,
  normalize: bool,
  control: &Control,
) -> WsResult<Outcome<DistanceMap<W>>> {
  marker.ensure_same_shape(mask)?;
  let shape = mask.shape();
  check_mask(shape, chamfer)?;

  let domain: Vec<bool> = mask.as_slice().iter().map(|v| v.is_foreground()).collect();
  let mut dist = try_alloc(shape.len(), W::zero())?;
  let mut sources = 0;
  for ((d, &inside), m) in dist.iter_mut().zip(&domain).zip(marker.as_slice()) {
    if inside && m.is_foreground() {
      sources += 1;
    } else if inside {
      *d = W::UNREACHABLE;
    }
  }
  let eligible = domain.iter().filter(|&&inside| inside).count() - sources;

  let forward = half_mask::<W>(chamfer.forward());
  let backward = half_mask::<W>(chamfer.backward());
  let mut saturated = false;
  let mut iterations = 0;

  let done = control.stage(Stage::GeodesicSweep, || loop {
    let changed_fwd =
      match geodesic_sweep(shape, &domain, &forward, &mut dist, false, &mut saturated, control) {
        Some(changed) => changed,
        None => return false,
      };
    let changed_bwd =
      match geodesic_sweep(shape, &domain, &backward, &mut dist, true, &mut saturated, control) {
        Some(changed) => changed,
        None => return false,
      };
    iterations += 1;
    control.progress(Stage::GeodesicSweep, iterations, iterations);
    if !(changed_fwd || changed_bwd) {
      return true;
    }
  });
  if !done {
    return Ok(Outcome::Cancelled);
  }
  log::debug!("geodesic distance converged after {iterations} sweep pairs");

  //Outside the mask stays 0 and must not count as unreachable
  let map = finish(mask, dist, chamfer, normalize, saturated, eligible, sources == 0)?;
  Ok(Outcome::Complete(map))
}

/// One geodesic sweep. Returns whether any voxel changed, or `None` if cancelled.
fn geodesic_sweep<W: DistanceValue>(
  shape: Shape,
  domain: &[bool],
  half: &[([isize; 3], W)],
  dist: &mut [W],
  reverse: bool,
  saturated: &mut bool,
  control: &Control,
) -> Option<bool> {
  let mut changed = false;
  for z in ordered(shape.depth, reverse) {
    for y in ordered(shape.height, reverse) {
      if control.is_cancelled() {
        return None;
      }
      for x in ordered(shape.width, reverse) {
        let idx = shape.index(x, y, z);
        if !domain[idx] || dist[idx] == W::zero() {
          continue;
        }
        let mut best = dist[idx];
        for &(d, w) in half {
          if let Some(n) = shape.offset((x, y, z), d) {
            if domain[n] {
              let candidate = dist[n].add_weight(w, saturated);
              if candidate < best {
                best = candidate;
              }
            }
          }
        }
        if best < dist[idx] {
          dist[idx] = best;
          changed = true;
        }
      }
    }
  }
  Some(changed)
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn integer_addition_saturates_below_infinity() {
    let mut saturated = false;
    assert_eq!(65530u16.add_weight(10, &mut saturated), u16::MAX - 1);
    assert!(saturated);
    let mut saturated = false;
    assert_eq!(u16::MAX.add_weight(10, &mut saturated), u16::MAX);
    assert!(!saturated);
  }
}
