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

//! Grey-level morphological reconstruction.
//!
//! Both reconstructions are computed with a priority flood: voxels are
//! processed from the most "settled" value outwards (lowest first for
//! reconstruction by erosion, highest first for reconstruction by dilation),
//! so that every voxel is final once it is popped. Each voxel is pushed at most
//! once per improvement, and entries whose value was improved after they were
//! pushed are skipped when popped.

use crate::connectivity::{Connectivity, Neighbourhood};
use crate::control::{Control, Stage};
use crate::error::{Outcome, WsResult};
use crate::grid::{try_alloc, Grid, Sample};
use crate::queue::FloodQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
  Erosion,
  Dilation,
}

impl Direction {
  #[inline(always)]
  fn priority(self, key: f64) -> f64 {
    match self {
      Direction::Erosion => key,
      Direction::Dilation => -key,
    }
  }

  /// Value `mask_value` receives when reached from a voxel holding `from`
  #[inline(always)]
  fn propagate<T: Sample>(self, from: T, mask_value: T) -> T {
    match self {
      Direction::Erosion if from > mask_value => from,
      Direction::Dilation if from < mask_value => from,
      _ => mask_value,
    }
  }

  #[inline(always)]
  fn improves<T: Sample>(self, candidate: T, current: T) -> bool {
    match self {
      Direction::Erosion => candidate < current,
      Direction::Dilation => candidate > current,
    }
  }
}

/// Reconstruction by erosion of `marker` above `mask`.
///
/// The result is the largest grid that lies above `mask`, below
/// `max(marker, mask)`, and has no regional minimum that is not rooted in a
/// voxel where the marker touches the mask. It fills every basin of `mask` that
/// contains no marker up to its spill level.
pub fn reconstruct_by_erosion<T: Sample>(
  marker: &Grid<T>,
  mask: &Grid<T>,
  connectivity: Connectivity,
  control: &Control,
) -> WsResult<Outcome<Grid<T>>> {
  reconstruct(marker, mask, connectivity, Direction::Erosion, control)
}

/// Reconstruction by dilation of `marker` under `mask`: the dual of
/// [`reconstruct_by_erosion`]. Lowers every dome of `mask` without a marker
/// down to its saddle level.
pub fn reconstruct_by_dilation<T: Sample>(
  marker: &Grid<T>,
  mask: &Grid<T>,
  connectivity: Connectivity,
  control: &Control,
) -> WsResult<Outcome<Grid<T>>> {
  reconstruct(marker, mask, connectivity, Direction::Dilation, control)
}

fn reconstruct<T: Sample>(
  marker: &Grid<T>,
  mask: &Grid<T>,
  connectivity: Connectivity,
  direction: Direction,
  control: &Control,
) -> WsResult<Outcome<Grid<T>>> {
  marker.ensure_same_shape(mask)?;
  let shape = mask.shape();
  let hood = Neighbourhood::new(shape, connectivity)?;
  let mask_values = mask.as_slice();

  //Voxels at the bound of the direction can never lower (raise) a neighbour
  let inert = match direction {
    Direction::Erosion => T::max_value(),
    Direction::Dilation => T::min_value(),
  };

  let mut result = try_alloc(shape.len(), T::zero())?;
  let mut queue = FloodQueue::with_capacity(shape.len())?;
  for (idx, (r, (&m, &f))) in
    result.iter_mut().zip(marker.as_slice().iter().zip(mask_values)).enumerate()
  {
    *r = direction.propagate(m, f);
    if *r != inert && !r.is_nan() {
      queue.push(direction.priority(r.key()), idx, 0);
    }
  }

  let done = control.stage(Stage::Reconstruction, || {
    let mut ticker = control.ticker(Stage::Reconstruction, shape.len());
    while let Some(entry) = queue.pop() {
      if ticker.tick() {
        return false;
      }
      let p = entry.index;
      //Stale entry: the voxel was improved after this entry was pushed
      if entry.priority != direction.priority(result[p].key()) {
        continue;
      }
      let level = result[p];
      for n in hood.of(p) {
        let candidate = direction.propagate(level, mask_values[n]);
        if direction.improves(candidate, result[n]) {
          result[n] = candidate;
          queue.push(direction.priority(candidate.key()), n, 0);
        }
      }
    }
    ticker.finish();
    true
  });
  if !done {
    return Ok(Outcome::Cancelled);
  }

  let grid = Grid::from_vec(shape, result)?.with_calibration(mask.calibration().clone());
  Ok(Outcome::Complete(grid))
}
