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
use ndarray_rand::{rand_distr::Uniform, RandomExt};
use rustronomy_segmentation::prelude::*;

//This constant determines the randomly generated images' sizes
const RF_SIZE: (usize, usize) = (48, 64);

fn random_binary() -> Grid<u8> {
  let mut rf = nd::Array2::<u8>::random(RF_SIZE, Uniform::new(0, 8));
  //Sparse foreground, but never empty
  rf.mapv_inplace(|v| if v == 0 { FOREGROUND } else { 0 });
  rf[[0, 0]] = FOREGROUND;
  Grid::from_array2(rf)
}

fn run<W: DistanceValue>(
  grid: &Grid<u8>,
  weights: ChamferWeights,
  sources: Sources,
  normalize: bool,
) -> DistanceMap<W> {
  distance_map::<u8, W>(grid, &weights.mask(), sources, normalize, &Control::new())
    .unwrap()
    .complete()
    .unwrap()
}

#[test]
fn chessboard_square() {
  //3x3 square centered at (2,2) in a 5x5 image
  let mut img = nd::Array2::<u8>::zeros((5, 5));
  img.slice_mut(nd::s![1..4, 1..4]).fill(FOREGROUND);
  let grid = Grid::from_array2(img);

  let map = run::<u16>(&grid, ChamferWeights::Chessboard, Sources::Foreground, false);
  for y in 0..5 {
    for x in 0..5 {
      let (dx, dy) = (x as isize - 2, y as isize - 2);
      let expected = (dx.abs().max(dy.abs()) - 1).max(0) as u16;
      assert_eq!(map.grid.get(x, y, 0), Some(expected), "at ({x}, {y})");
    }
  }
  assert!(map.warnings.is_empty());

  //Same answer in floating point
  let map = run::<f32>(&grid, ChamferWeights::Chessboard, Sources::Foreground, true);
  assert_eq!(map.grid.get(0, 0, 0), Some(1.0));
  assert_eq!(map.grid.get(2, 2, 0), Some(0.0));
}

#[test]
fn sources_are_zero_and_everything_else_positive() {
  let grid = random_binary();
  let map = run::<i32>(&grid, ChamferWeights::Borgefors, Sources::Foreground, false);
  for (&v, &d) in grid.as_slice().iter().zip(map.grid.as_slice()) {
    if v != 0 {
      assert_eq!(d, 0);
    } else {
      assert!(d > 0 && d < i32::MAX);
    }
  }

  //Inverted convention
  let map = run::<i32>(&grid, ChamferWeights::Borgefors, Sources::Background, false);
  for (&v, &d) in grid.as_slice().iter().zip(map.grid.as_slice()) {
    if v == 0 {
      assert_eq!(d, 0);
    } else {
      assert!(d > 0);
    }
  }
}

#[test]
fn neighbouring_distances_differ_by_at_most_the_offset_weight() {
  let grid = random_binary();
  let shape = grid.shape();
  let mask = ChamferWeights::Borgefors.mask();
  let map = run::<i32>(&grid, ChamferWeights::Borgefors, Sources::Foreground, false);

  for y in 0..shape.height {
    for x in 0..shape.width {
      let d = map.grid.get(x, y, 0).unwrap();
      for offset in mask.offsets() {
        let (nx, ny) = (x as isize + offset.dx, y as isize + offset.dy);
        if nx < 0 || ny < 0 {
          continue;
        }
        if let Some(n) = map.grid.get(nx as usize, ny as usize, 0) {
          assert!((d - n).abs() <= offset.short_weight as i32, "({x}, {y}) -> ({nx}, {ny})");
        }
      }
    }
  }
}

#[test]
fn normalisation_divides_by_orthogonal_weight() {
  let mut img = nd::Array2::<u8>::zeros((7, 7));
  img[[3, 3]] = FOREGROUND;
  let grid = Grid::from_array2(img);

  let raw = run::<u16>(&grid, ChamferWeights::Borgefors, Sources::Foreground, false);
  assert_eq!(raw.grid.get(4, 3, 0), Some(3));
  assert_eq!(raw.grid.get(4, 4, 0), Some(4));

  let normalised = run::<u16>(&grid, ChamferWeights::Borgefors, Sources::Foreground, true);
  assert_eq!(normalised.grid.get(4, 3, 0), Some(1));
  assert_eq!(normalised.grid.get(4, 4, 0), Some(1));

  let float = run::<f32>(&grid, ChamferWeights::QuasiEuclidean, Sources::Foreground, true);
  assert_eq!(float.grid.get(4, 3, 0), Some(1.0));
  assert_eq!(float.grid.get(4, 4, 0), Some(std::f32::consts::SQRT_2));
}

#[test]
fn empty_grid_is_infinitely_far_away() {
  let grid = Grid::<u8>::zeros(Shape::new_2d(6, 4)).unwrap();
  let map = run::<u16>(&grid, ChamferWeights::Chessboard, Sources::Foreground, true);
  assert!(map.grid.as_slice().iter().all(|&d| d == u16::UNREACHABLE));
  assert_eq!(map.warnings, vec![Warning::NoSources]);
  assert_eq!(map.unreachable(), 24);
  assert_eq!(map.max_finite(), None);
}

#[test]
fn label_distance_measures_to_other_labels() {
  let labels = Grid::from_vec(Shape::new_2d(5, 1), vec![1u32, 1, 2, 2, 0]).unwrap();
  let mask = ChamferWeights::Chessboard.mask();
  let map = label_distance_map::<u16>(&labels, &mask, false, &Control::new())
    .unwrap()
    .complete()
    .unwrap();
  assert_eq!(map.grid.as_slice(), &[2, 1, 1, 1, 0]);
}

#[test]
fn geodesic_distance_follows_the_mask() {
  //U-shaped corridor: the way from (0,2) to (4,2) goes around the top row
  let mut mask = nd::Array2::<u8>::zeros((3, 5));
  mask.row_mut(0).fill(FOREGROUND);
  mask.column_mut(0).fill(FOREGROUND);
  mask.column_mut(4).fill(FOREGROUND);
  let mut marker = nd::Array2::<u8>::zeros((3, 5));
  marker[[2, 0]] = FOREGROUND;
  let (mask, marker) = (Grid::from_array2(mask), Grid::from_array2(marker));

  let chamfer = ChamferWeights::CityBlock.mask();
  let map = geodesic_distance_map::<u8, u8, f32>(&marker, &mask, &chamfer, false, &Control::new())
    .unwrap()
    .complete()
    .unwrap();
  assert_eq!(map.grid.get(4, 2, 0), Some(8.0));
  assert_eq!(map.grid.get(2, 0, 0), Some(4.0));
  //Outside the mask
  assert_eq!(map.grid.get(2, 2, 0), Some(0.0));
  assert!(map.warnings.is_empty());
}

#[test]
fn geodesic_distance_reports_disconnected_voxels() {
  let mask = Grid::from_vec(Shape::new_2d(5, 1), vec![1u8, 1, 0, 1, 1]).unwrap();
  let marker = Grid::from_vec(Shape::new_2d(5, 1), vec![1u8, 0, 0, 0, 0]).unwrap();
  let chamfer = ChamferWeights::Chessboard.mask();
  let map = geodesic_distance_map::<u8, u8, u16>(&marker, &mask, &chamfer, true, &Control::new())
    .unwrap()
    .complete()
    .unwrap();
  assert_eq!(map.grid.as_slice(), &[0, 1, 0, u16::MAX, u16::MAX]);
  assert_eq!(map.warnings, vec![Warning::Unreachable { count: 2 }]);
}

#[test]
fn calibrated_float_distances_are_scaled() {
  let mut img = nd::Array2::<u8>::zeros((3, 3));
  img[[1, 1]] = FOREGROUND;
  let grid = Grid::from_array2(img).with_calibration(Calibration::isotropic(0.5, "um"));
  let map = run::<f32>(&grid, ChamferWeights::Chessboard, Sources::Foreground, true);
  assert_eq!(map.grid.get(0, 0, 0), Some(0.5));
  assert!(map.warnings.is_empty());

  let anisotropic = Calibration { x: 0.5, y: 2.0, z: 1.0, unit: "um".to_string() };
  let grid = grid.with_calibration(anisotropic);
  let map = run::<f32>(&grid, ChamferWeights::Chessboard, Sources::Foreground, true);
  assert_eq!(map.warnings, vec![Warning::AnisotropicSpacing]);
}

#[test]
fn volumes_need_volumetric_masks() {
  let grid = Grid::<u8>::zeros(Shape::new_3d(4, 4, 4)).unwrap();
  let result = distance_map::<u8, f32>(
    &grid,
    &ChamferWeights::Borgefors.mask(),
    Sources::Foreground,
    true,
    &Control::new(),
  );
  assert!(matches!(result, Err(WatershedError::InvalidParameter(_))));
}

#[test]
fn volumetric_distance() {
  let mut grid = Grid::<u8>::zeros(Shape::new_3d(5, 5, 5)).unwrap();
  *grid.get_mut(2, 2, 2).unwrap() = FOREGROUND;
  let map = distance_map::<u8, u16>(
    &grid,
    &ChamferWeights::Borgefors3D.mask(),
    Sources::Foreground,
    false,
    &Control::new(),
  )
  .unwrap()
  .complete()
  .unwrap();
  assert_eq!(map.grid.get(2, 2, 3), Some(3));
  assert_eq!(map.grid.get(3, 3, 2), Some(4));
  assert_eq!(map.grid.get(3, 3, 3), Some(5));
  assert_eq!(map.grid.get(0, 0, 0), Some(10));
}

#[test]
fn cancelled_transform_publishes_nothing() {
  let grid = random_binary();
  let control = Control::new();
  control.cancel_token().cancel();
  let outcome = distance_map::<u8, f32>(
    &grid,
    &ChamferWeights::Borgefors.mask(),
    Sources::Foreground,
    true,
    &control,
  )
  .unwrap();
  assert!(outcome.is_cancelled());
}

#[test]
fn geodesic_shape_mismatch() {
  let marker = Grid::<u8>::zeros(Shape::new_2d(4, 4)).unwrap();
  let mask = Grid::<u8>::zeros(Shape::new_2d(4, 5)).unwrap();
  let result = geodesic_distance_map::<u8, u8, f32>(
    &marker,
    &mask,
    &ChamferWeights::Chessboard.mask(),
    true,
    &Control::new(),
  );
  assert!(matches!(result, Err(WatershedError::ShapeMismatch { .. })));
}
