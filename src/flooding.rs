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

//! Marker-controlled flooding.
//!
//! Basins grow from labelled markers in order of increasing grid value. A
//! voxel is claimed by the first basin that reaches it and is queued at its own
//! value; equal values are processed in the order they were queued. With dams
//! enabled, a queued voxel that is reached by a *second* basin becomes part of
//! the watershed line (label 0) and never spreads any further. Its unclaimed
//! neighbours are handed to the basin that reached it first, so a pocket that
//! is enclosed by dams is still flooded.
//!
//! # Memory usage
//! Flooding allocates the output label grid, one status byte per voxel and a
//! priority queue that holds at most one live entry per voxel. One can count on
//! roughly `len * (4 + 1 + 32)` bytes in the worst case.

use crate::connectivity::{Connectivity, Neighbourhood};
use crate::control::{Control, Stage};
use crate::error::{raise, Outcome, Warning, WsResult};
use crate::grid::{try_alloc, Grid, Sample};
use crate::queue::FloodQueue;

/// Label of dam voxels in the output
pub const DAM: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq)]
/// Options for [`flood`]
pub struct FloodOptions {
  /// Must match the connectivity used to label the markers
  pub connectivity: Connectivity,
  /// Draw watershed lines where basins meet
  pub dams: bool,
  /// Voxels with a value above this level are never flooded
  pub max_level: Option<f64>,
}

impl Default for FloodOptions {
  fn default() -> Self {
    FloodOptions { connectivity: Connectivity::C4, dams: true, max_level: None }
  }
}

impl FloodOptions {
  pub fn new(connectivity: Connectivity) -> Self {
    FloodOptions { connectivity, ..Default::default() }
  }

  pub fn with_dams(mut self, dams: bool) -> Self {
    self.dams = dams;
    self
  }

  pub fn with_max_level(mut self, max_level: f64) -> Self {
    self.max_level = Some(max_level);
    self
  }
}

/// Output of [`flood`]
#[derive(Debug, Clone, PartialEq)]
pub struct Flooded {
  /// Basin ids of the markers, [`DAM`] on watershed lines and on every voxel
  /// that was not flooded
  pub labels: Grid<u32>,
  pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
  Unvisited,
  Queued,
  Done,
  Dam,
}

/// Floods `image` from the labelled voxels of `markers`.
///
/// Only voxels inside `mask` (non-zero, if given) are flooded; NaN voxels and
/// voxels above `options.max_level` are never entered. Markers outside the
/// mask are ignored. Eligible voxels that no marker reaches keep label 0 and
/// are reported with [`Warning::Unreachable`].
///
/// The output does not depend on the internal layout of the queue: ties are
/// always resolved in insertion order, and markers are inserted in raster
/// order.
pub fn flood<T: Sample>(
  image: &Grid<T>,
  markers: &Grid<u32>,
  mask: Option<&Grid<u8>>,
  options: &FloodOptions,
  control: &Control,
) -> WsResult<Outcome<Flooded>> {
  image.ensure_same_shape(markers)?;
  if let Some(mask) = mask {
    image.ensure_same_shape(mask)?;
  }
  let shape = image.shape();
  let hood = Neighbourhood::new(shape, options.connectivity)?;
  let values = image.as_slice();
  let max_level = options.max_level.unwrap_or(f64::INFINITY);

  //Which voxels may be claimed by a basin?
  let inside = |idx: usize| mask.map_or(true, |m| m.as_slice()[idx] != 0);
  let eligible = |idx: usize| {
    let key = values[idx].key();
    inside(idx) && !key.is_nan() && key <= max_level
  };

  let mut labels = try_alloc(shape.len(), DAM)?;
  let mut status = try_alloc(shape.len(), Status::Unvisited)?;
  let mut queue = FloodQueue::with_capacity(shape.len())?;
  let mut seeds = 0usize;
  for (idx, &label) in markers.as_slice().iter().enumerate() {
    if label != 0 && inside(idx) {
      labels[idx] = label;
      status[idx] = Status::Queued;
      queue.push(values[idx].key(), idx, label);
      seeds += 1;
    }
  }
  let seeded = |idx: usize| markers.as_slice()[idx] != 0 && inside(idx);
  log::debug!("flooding {shape} grid from {seeds} marker voxels");

  let done = control.stage(Stage::Flooding, || {
    let mut ticker = control.ticker(Stage::Flooding, shape.len());
    while let Some(entry) = queue.pop() {
      if ticker.tick() {
        return false;
      }
      let p = entry.index;
      //Carved into a dam after it was queued
      if labels[p] != entry.label {
        continue;
      }
      status[p] = Status::Done;

      for n in hood.of(p) {
        match status[n] {
          Status::Unvisited if eligible(n) => {
            labels[n] = entry.label;
            status[n] = Status::Queued;
            queue.push(values[n].key(), n, entry.label);
          }
          Status::Queued if options.dams && labels[n] != entry.label && !seeded(n) => {
            let first = labels[n];
            labels[n] = DAM;
            status[n] = Status::Dam;
            //Untouched neighbours of a dam go to the basin that reached it first
            for m in hood.of(n) {
              if status[m] == Status::Unvisited && eligible(m) {
                labels[m] = first;
                status[m] = Status::Queued;
                queue.push(values[m].key(), m, first);
              }
            }
          }
          _ => {}
        }
      }
    }
    ticker.finish();
    true
  });
  if !done {
    return Ok(Outcome::Cancelled);
  }

  let mut warnings = Vec::new();
  let unreached =
    status.iter().enumerate().filter(|&(idx, &s)| s == Status::Unvisited && eligible(idx)).count();
  if unreached > 0 {
    raise(&mut warnings, Warning::Unreachable { count: unreached });
  }

  let labels = Grid::from_vec(shape, labels)?.with_calibration(image.calibration().clone());
  Ok(Outcome::Complete(Flooded { labels, warnings }))
}
