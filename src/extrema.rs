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

//! Regional and extended extrema, and extrema imposition.
//!
//! A *regional minimum* is a connected plateau of equal values none of whose
//! neighbours is strictly lower. The *extended minima* with dynamic `h` are the
//! regional minima of the h-minima transform: every basin shallower than `h` is
//! filled up to its spill level by reconstruction, which merges it into the
//! surrounding plateau. Imposition rebuilds a grid so that its only regional
//! minima are a prescribed set of markers.
//!
//! Everything in this module has a dual for maxima.

use crate::connectivity::{Connectivity, Neighbourhood};
use crate::control::{Control, Stage};
use crate::error::{complete_or_return, Outcome, WatershedError, WsResult};
use crate::grid::{try_alloc, Grid, Sample, FOREGROUND};
use crate::reconstruction::{reconstruct_by_dilation, reconstruct_by_erosion};

////////////////////////////////////////////////////////////////////////////////
//                             REGIONAL EXTREMA                               //
////////////////////////////////////////////////////////////////////////////////

/// Binary mask (255 = minimum) of the regional minima of `grid`.
///
/// NaN voxels are never part of a minimum and do not disqualify a neighbouring
/// plateau.
pub fn regional_minima<T: Sample>(
  grid: &Grid<T>,
  connectivity: Connectivity,
  control: &Control,
) -> WsResult<Outcome<Grid<u8>>> {
  regional_extrema(grid, connectivity, |neighbour, plateau| neighbour < plateau, control)
}

/// Binary mask (255 = maximum) of the regional maxima of `grid`
pub fn regional_maxima<T: Sample>(
  grid: &Grid<T>,
  connectivity: Connectivity,
  control: &Control,
) -> WsResult<Outcome<Grid<u8>>> {
  regional_extrema(grid, connectivity, |neighbour, plateau| neighbour > plateau, control)
}

/// Flood fills every plateau once. A plateau is an extremum unless one of its
/// members has a neighbour that `beats` the plateau value.
fn regional_extrema<T: Sample>(
  grid: &Grid<T>,
  connectivity: Connectivity,
  beats: impl Fn(T, T) -> bool,
  control: &Control,
) -> WsResult<Outcome<Grid<u8>>> {
  let shape = grid.shape();
  let hood = Neighbourhood::new(shape, connectivity)?;
  let values = grid.as_slice();

  let mut visited = try_alloc(shape.len(), false)?;
  let mut out = try_alloc(shape.len(), 0u8)?;
  let mut stack = Vec::new();
  let mut plateau = Vec::new();

  let done = control.stage(Stage::RegionalExtrema, || {
    let mut ticker = control.ticker(Stage::RegionalExtrema, shape.len());
    for seed in 0..values.len() {
      if visited[seed] || values[seed].is_nan() {
        continue;
      }
      let level = values[seed];
      let mut extremum = true;
      visited[seed] = true;
      stack.push(seed);
      plateau.clear();

      while let Some(p) = stack.pop() {
        if ticker.tick() {
          return false;
        }
        plateau.push(p);
        for n in hood.of(p) {
          let v = values[n];
          if v == level {
            if !visited[n] {
              visited[n] = true;
              stack.push(n);
            }
          } else if beats(v, level) {
            extremum = false;
          }
        }
      }

      if extremum {
        for &p in &plateau {
          out[p] = FOREGROUND;
        }
      }
    }
    ticker.finish();
    true
  });
  if !done {
    return Ok(Outcome::Cancelled);
  }

  Ok(Outcome::Complete(Grid::from_vec(shape, out)?.with_calibration(grid.calibration().clone())))
}

////////////////////////////////////////////////////////////////////////////////
//                             EXTENDED EXTREMA                               //
////////////////////////////////////////////////////////////////////////////////

fn check_dynamic(dynamic: f64) -> WsResult<()> {
  if dynamic.is_finite() && dynamic >= 0.0 {
    Ok(())
  } else {
    Err(WatershedError::InvalidParameter(format!(
      "dynamic must be a finite, non-negative number, not {dynamic}"
    )))
  }
}

/// Extended minima of `grid`: the regional minima that are at least `dynamic`
/// deep with respect to the lowest saddle leading to another minimum.
///
/// `dynamic == 0` yields the regional minima. For integer grids the fractional
/// part of `dynamic` is dropped and `grid + dynamic` saturates at the top of
/// the type's range.
pub fn extended_minima<T: Sample>(
  grid: &Grid<T>,
  dynamic: f64,
  connectivity: Connectivity,
  control: &Control,
) -> WsResult<Outcome<Grid<u8>>> {
  check_dynamic(dynamic)?;
  connectivity.check(grid.shape())?;
  log::debug!("extended minima with dynamic {dynamic} and {connectivity}");

  let raised = grid.map(|&v| v.saturating_offset(dynamic));
  let filled = complete_or_return!(reconstruct_by_erosion(&raised, grid, connectivity, control)?);
  regional_minima(&filled, connectivity, control)
}

/// Extended maxima of `grid`, the dual of [`extended_minima`]
pub fn extended_maxima<T: Sample>(
  grid: &Grid<T>,
  dynamic: f64,
  connectivity: Connectivity,
  control: &Control,
) -> WsResult<Outcome<Grid<u8>>> {
  check_dynamic(dynamic)?;
  connectivity.check(grid.shape())?;
  log::debug!("extended maxima with dynamic {dynamic} and {connectivity}");

  let lowered = grid.map(|&v| v.saturating_offset(-dynamic));
  let cut = complete_or_return!(reconstruct_by_dilation(&lowered, grid, connectivity, control)?);
  regional_maxima(&cut, connectivity, control)
}

////////////////////////////////////////////////////////////////////////////////
//                                IMPOSITION                                  //
////////////////////////////////////////////////////////////////////////////////

/// Imposes the non-zero voxels of `markers` as the only regional minima of
/// `grid`.
///
/// Marker voxels are set to the minimum of `T`. Every other voxel becomes the
/// lowest value that is at least its original value (and strictly above the
/// type minimum) and that can be reached from a marker without descending.
/// Imposing the same markers a second time changes nothing.
pub fn impose_minima<T: Sample, M: Sample>(
  grid: &Grid<T>,
  markers: &Grid<M>,
  connectivity: Connectivity,
  control: &Control,
) -> WsResult<Outcome<Grid<T>>> {
  grid.ensure_same_shape(markers)?;
  let (lo, hi) = (T::min_value(), T::max_value());
  let floor = lo.successor();

  let mut marker_image = grid.map(|_| hi);
  let mut mask = grid.map(|&v| if v < floor { floor } else { v });
  for ((m, f), seed) in marker_image
    .as_slice_mut()
    .iter_mut()
    .zip(mask.as_slice_mut().iter_mut())
    .zip(markers.as_slice())
  {
    if seed.is_foreground() {
      *m = lo;
      *f = lo;
    }
  }
  reconstruct_by_erosion(&marker_image, &mask, connectivity, control)
}

/// Imposes the non-zero voxels of `markers` as the only regional maxima of
/// `grid`, the dual of [`impose_minima`]
pub fn impose_maxima<T: Sample, M: Sample>(
  grid: &Grid<T>,
  markers: &Grid<M>,
  connectivity: Connectivity,
  control: &Control,
) -> WsResult<Outcome<Grid<T>>> {
  grid.ensure_same_shape(markers)?;
  let (lo, hi) = (T::min_value(), T::max_value());
  let ceiling = hi.predecessor();

  let mut marker_image = grid.map(|_| lo);
  let mut mask = grid.map(|&v| if v > ceiling { ceiling } else { v });
  for ((m, f), seed) in marker_image
    .as_slice_mut()
    .iter_mut()
    .zip(mask.as_slice_mut().iter_mut())
    .zip(markers.as_slice())
  {
    if seed.is_foreground() {
      *m = hi;
      *f = hi;
    }
  }
  reconstruct_by_dilation(&marker_image, &mask, connectivity, control)
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::grid::Shape;

  #[test]
  fn plateau_touching_lower_voxel_is_not_a_minimum() {
    let shape = Shape::new_2d(6, 1);
    let grid = Grid::from_vec(shape, vec![3u8, 1, 1, 2, 2, 0]).unwrap();
    let minima = regional_minima(&grid, Connectivity::C4, &Control::new()).unwrap().complete().unwrap();
    assert_eq!(minima.as_slice(), &[0, 255, 255, 0, 0, 255]);
  }

  #[test]
  fn negative_dynamic_is_rejected() {
    let grid = Grid::<u8>::zeros(Shape::new_2d(2, 2)).unwrap();
    assert!(matches!(
      extended_minima(&grid, -1.0, Connectivity::C4, &Control::new()),
      Err(WatershedError::InvalidParameter(_))
    ));
  }
}
