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

//! Connected-component labelling and marker preparation.

use std::collections::{BTreeSet, HashMap};

use crate::connectivity::Connectivity;
use crate::control::{Control, Stage};
use crate::error::{Outcome, WatershedError, WsResult};
use crate::grid::{try_alloc, Grid, Sample, Shape};

/// Label grid together with the number of labels in it
#[derive(Debug, Clone, PartialEq)]
pub struct Labelled {
  /// 0 = background, 1..=count = component id
  pub grid: Grid<u32>,
  pub count: u32,
}

////////////////////////////////////////////////////////////////////////////////
//                                UNION-FIND                                  //
////////////////////////////////////////////////////////////////////////////////

/// Disjoint sets over provisional labels. Roots are always the smallest
/// provisional label of their set, so the order of first appearance survives
/// the merge.
struct DisjointSets {
  parent: Vec<u32>,
}

impl DisjointSets {
  fn new() -> Self {
    //Provisional label 0 is the background
    DisjointSets { parent: vec![0] }
  }

  fn make_set(&mut self) -> WsResult<u32> {
    let label = u32::try_from(self.parent.len()).map_err(|_| too_many_labels())?;
    self.parent.push(label);
    Ok(label)
  }

  fn find(&mut self, mut x: u32) -> u32 {
    while self.parent[x as usize] != x {
      //Path halving
      let grandparent = self.parent[self.parent[x as usize] as usize];
      self.parent[x as usize] = grandparent;
      x = grandparent;
    }
    x
  }

  fn union(&mut self, a: u32, b: u32) -> u32 {
    let (ra, rb) = (self.find(a), self.find(b));
    let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
    self.parent[child as usize] = root;
    root
  }
}

fn too_many_labels() -> WatershedError {
  WatershedError::ResourceExhaustion {
    requested: u32::MAX as usize + 1,
    available: Some(u32::MAX as usize),
  }
}

/// Labels the connected components of the non-zero, non-NaN voxels of `mask`.
///
/// Labels are numbered `1..=count` in raster order of the first voxel of each
/// component. Use the same connectivity here as in the flooding stage.
pub fn label_components<T: Sample>(
  mask: &Grid<T>,
  connectivity: Connectivity,
  control: &Control,
) -> WsResult<Outcome<Labelled>> {
  let shape = mask.shape();
  connectivity.check(shape)?;
  let preceding = connectivity.forward_offsets();
  let values = mask.as_slice();

  let mut provisional = try_alloc(shape.len(), 0u32)?;
  let mut sets = DisjointSets::new();

  let labelled = control.stage(Stage::Labelling, || -> WsResult<Option<u32>> {
    //First pass: provisional labels and equivalences
    for z in 0..shape.depth {
      for y in 0..shape.height {
        if control.is_cancelled() {
          return Ok(None);
        }
        for x in 0..shape.width {
          let idx = shape.index(x, y, z);
          let v = values[idx];
          if !v.is_foreground() || v.is_nan() {
            continue;
          }
          let mut label = 0;
          for &d in &preceding {
            if let Some(n) = shape.offset((x, y, z), d) {
              let other = provisional[n];
              if other == 0 {
                continue;
              }
              label = if label == 0 { other } else { sets.union(label, other) };
            }
          }
          provisional[idx] = if label == 0 { sets.make_set()? } else { label };
        }
      }
    }

    //Second pass: resolve to sequential final labels
    let mut finals = vec![0u32; sets.parent.len()];
    let mut count = 0u32;
    for label in provisional.iter_mut().filter(|l| **l != 0) {
      let root = sets.find(*label) as usize;
      if finals[root] == 0 {
        count += 1;
        finals[root] = count;
      }
      *label = finals[root];
    }
    control.progress(Stage::Labelling, shape.len(), shape.len());
    Ok(Some(count))
  })?;

  match labelled {
    None => Ok(Outcome::Cancelled),
    Some(count) => {
      log::debug!("found {count} connected components");
      let grid = Grid::from_vec(shape, provisional)?.with_calibration(mask.calibration().clone());
      Ok(Outcome::Complete(Labelled { grid, count }))
    }
  }
}

////////////////////////////////////////////////////////////////////////////////
//                               MARKER HELPERS                               //
////////////////////////////////////////////////////////////////////////////////

/// Rasterises a list of `[x, y, z]` marker points into a label grid. Point `i`
/// receives label `i + 1`; a later point on the same voxel overwrites an
/// earlier one.
pub fn rasterise_markers(shape: Shape, points: &[[usize; 3]]) -> WsResult<Labelled> {
  let mut grid = Grid::<u32>::zeros(shape)?;
  if points.len() > u32::MAX as usize {
    return Err(too_many_labels());
  }
  for (i, &[x, y, z]) in points.iter().enumerate() {
    let voxel = grid.get_mut(x, y, z).ok_or_else(|| {
      WatershedError::InvalidParameter(format!("marker ({x}, {y}, {z}) lies outside the {shape} grid"))
    })?;
    *voxel = i as u32 + 1;
  }
  Ok(Labelled { grid, count: points.len() as u32 })
}

/// Renumbers the non-zero labels of `labels` to `1..=n` in raster order of
/// their first occurrence.
pub fn relabel_sequential(labels: &Grid<u32>) -> Labelled {
  let mut mapping: HashMap<u32, u32> = HashMap::new();
  let grid = labels.map(|&l| {
    if l == 0 {
      return 0;
    }
    let next = mapping.len() as u32 + 1;
    *mapping.entry(l).or_insert(next)
  });
  Labelled { grid, count: mapping.len() as u32 }
}

/// The distinct non-zero labels of `labels`, in increasing order
pub fn distinct_labels(labels: &Grid<u32>) -> BTreeSet<u32> {
  labels.as_slice().iter().copied().filter(|&l| l != 0).collect()
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn union_keeps_smallest_root() {
    let mut sets = DisjointSets::new();
    let a = sets.make_set().unwrap();
    let b = sets.make_set().unwrap();
    let c = sets.make_set().unwrap();
    sets.union(c, b);
    sets.union(b, a);
    assert_eq!(sets.find(c), a);
  }
}
