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

use ndarray as nd;

use crate::connectivity::Connectivity;
use crate::control::{Control, Stage};
use crate::error::{Outcome, WsResult};
use crate::grid::{Grid, Sample};

/// Morphological gradient: the difference between the largest and the smallest
/// value in the neighbourhood of every voxel (the voxel included). NaN
/// neighbours are ignored; NaN voxels stay NaN. Integer results saturate.
///
/// Voxels are independent, so the gradient is computed on the rayon pool.
pub fn morphological_gradient<T: Sample>(
  grid: &Grid<T>,
  connectivity: Connectivity,
  control: &Control,
) -> WsResult<Outcome<Grid<T>>> {
  let shape = grid.shape();
  connectivity.check(shape)?;
  let offsets = connectivity.offsets();
  let values = grid.as_slice();
  let token = control.cancel_token().clone();

  let mut out = Grid::<T>::zeros(shape)?.with_calibration(grid.calibration().clone());
  control.stage(Stage::Gradient, || {
    nd::Zip::indexed(out.view_mut()).par_for_each(|(z, y, x), voxel| {
      if token.is_cancelled() {
        return;
      }
      let centre = values[shape.index(x, y, z)];
      if centre.is_nan() {
        *voxel = centre;
        return;
      }
      let (mut lo, mut hi) = (centre, centre);
      for &d in &offsets {
        if let Some(n) = shape.offset((x, y, z), d) {
          let v = values[n];
          if v < lo {
            lo = v;
          } else if v > hi {
            hi = v;
          }
        }
      }
      *voxel = T::zero().saturating_offset(hi.key() - lo.key());
    });
    control.progress(Stage::Gradient, shape.len(), shape.len());
  });

  if control.is_cancelled() {
    Ok(Outcome::Cancelled)
  } else {
    Ok(Outcome::Complete(out))
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::grid::Shape;

  #[test]
  fn step_edge_has_gradient_on_both_sides() {
    let shape = Shape::new_2d(4, 1);
    let grid = Grid::from_vec(shape, vec![1u8, 1, 7, 7]).unwrap();
    let gradient =
      morphological_gradient(&grid, Connectivity::C4, &Control::new()).unwrap().complete().unwrap();
    assert_eq!(gradient.as_slice(), &[0, 6, 6, 0]);
  }
}
