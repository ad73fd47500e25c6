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

//! Dense 2D/3D sample grids.
//!
//! A [`Grid`] is a thin wrapper around an `ndarray::Array3` in standard layout,
//! indexed `[z, y, x]`. Planar images are grids with a depth of one. Keeping a
//! single storage order lets every engine walk the samples as one flat slice
//! in raster order (x fastest, then y, then z), which is the visiting order the
//! chamfer sweeps rely on.
//!
//! Public accessors take coordinates in `(x, y, z)` order.

use crate::error::{WatershedError, WsResult};
use ndarray as nd;
use num_traits::{Bounded, NumCast, ToPrimitive, Zero};

/// Value written into binary masks for foreground voxels
pub const FOREGROUND: u8 = u8::MAX;

////////////////////////////////////////////////////////////////////////////////
//                                 SAMPLES                                    //
////////////////////////////////////////////////////////////////////////////////

/// Numeric sample types that can be stored in a [`Grid`].
///
/// Implemented for `u8`, `u16`, `u32`, `i32`, `f32` and `f64`.
pub trait Sample:
  Copy
  + PartialOrd
  + Bounded
  + NumCast
  + ToPrimitive
  + Zero
  + Send
  + Sync
  + std::fmt::Debug
  + 'static
{
  /// Priority key of this sample. NaN samples map to NaN.
  fn key(self) -> f64;

  /// Smallest representable value strictly greater than `self` (saturating)
  fn successor(self) -> Self;

  /// Largest representable value strictly smaller than `self` (saturating)
  fn predecessor(self) -> Self;

  /// `self + delta`, clamped to the range of the type. Integer types drop the
  /// fractional part of `delta`.
  fn saturating_offset(self, delta: f64) -> Self;

  fn is_nan(self) -> bool {
    false
  }

  fn is_foreground(self) -> bool {
    !self.is_zero()
  }
}

macro_rules! impl_integer_sample {
  ($($t:ty),*) => {$(
    impl Sample for $t {
      #[inline(always)]
      fn key(self) -> f64 {
        self as f64
      }

      #[inline(always)]
      fn successor(self) -> Self {
        self.saturating_add(1)
      }

      #[inline(always)]
      fn predecessor(self) -> Self {
        self.saturating_sub(1)
      }

      #[inline(always)]
      fn saturating_offset(self, delta: f64) -> Self {
        //float -> int casts saturate
        (self as f64 + delta.trunc()) as $t
      }
    }
  )*};
}

macro_rules! impl_float_sample {
  ($($t:ty),*) => {$(
    impl Sample for $t {
      #[inline(always)]
      fn key(self) -> f64 {
        self as f64
      }

      fn successor(self) -> Self {
        if self.is_nan() || self == <$t>::INFINITY || self == <$t>::MAX {
          self
        } else if self == 0.0 {
          //smallest positive subnormal
          <$t>::from_bits(1)
        } else if self > 0.0 {
          <$t>::from_bits(self.to_bits() + 1)
        } else {
          <$t>::from_bits(self.to_bits() - 1)
        }
      }

      fn predecessor(self) -> Self {
        -(-self).successor()
      }

      fn saturating_offset(self, delta: f64) -> Self {
        if !self.is_finite() {
          return self;
        }
        let shifted = self as f64 + delta;
        if shifted >= <$t>::MAX as f64 {
          <$t>::MAX
        } else if shifted <= <$t>::MIN as f64 {
          <$t>::MIN
        } else {
          shifted as $t
        }
      }

      #[inline(always)]
      fn is_nan(self) -> bool {
        <$t>::is_nan(self)
      }
    }
  )*};
}

impl_integer_sample!(u8, u16, u32, i32);
impl_float_sample!(f32, f64);

////////////////////////////////////////////////////////////////////////////////
//                            SHAPE & CALIBRATION                             //
////////////////////////////////////////////////////////////////////////////////

/// Extent of a grid. Planar grids have `depth == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
  pub width: usize,
  pub height: usize,
  pub depth: usize,
}

impl Shape {
  pub fn new_2d(width: usize, height: usize) -> Self {
    Shape { width, height, depth: 1 }
  }

  pub fn new_3d(width: usize, height: usize, depth: usize) -> Self {
    Shape { width, height, depth }
  }

  /// Number of voxels. Use [`Shape::checked_len`] for untrusted shapes.
  #[inline(always)]
  pub fn len(&self) -> usize {
    self.width * self.height * self.depth
  }

  pub fn checked_len(&self) -> Option<usize> {
    self.width.checked_mul(self.height)?.checked_mul(self.depth)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_planar(&self) -> bool {
    self.depth == 1
  }

  /// Flat raster index of `(x, y, z)`
  #[inline(always)]
  pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
    (z * self.height + y) * self.width + x
  }

  /// Inverse of [`Shape::index`]
  #[inline(always)]
  pub fn coords(&self, index: usize) -> (usize, usize, usize) {
    let x = index % self.width;
    let rest = index / self.width;
    (x, rest % self.height, rest / self.height)
  }

  /// Flat index of `(x, y, z) + (dx, dy, dz)`, or `None` if that falls outside
  #[inline(always)]
  pub fn offset(&self, (x, y, z): (usize, usize, usize), d: [isize; 3]) -> Option<usize> {
    let nx = x.checked_add_signed(d[0])?;
    let ny = y.checked_add_signed(d[1])?;
    let nz = z.checked_add_signed(d[2])?;
    if nx < self.width && ny < self.height && nz < self.depth {
      Some(self.index(nx, ny, nz))
    } else {
      None
    }
  }

  /// ndarray dimension tuple, `(depth, height, width)`
  pub(crate) fn dim(&self) -> (usize, usize, usize) {
    (self.depth, self.height, self.width)
  }
}

impl std::fmt::Display for Shape {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}x{}x{}", self.width, self.height, self.depth)
  }
}

/// Physical voxel spacing. Only used to scale final distance values.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
  pub x: f64,
  pub y: f64,
  pub z: f64,
  pub unit: String,
}

impl Default for Calibration {
  fn default() -> Self {
    Calibration { x: 1.0, y: 1.0, z: 1.0, unit: "pixel".to_string() }
  }
}

impl Calibration {
  pub fn isotropic(spacing: f64, unit: &str) -> Self {
    Calibration { x: spacing, y: spacing, z: spacing, unit: unit.to_string() }
  }

  /// True if all spacings relevant for `shape` are 1
  pub fn is_unit(&self, shape: Shape) -> bool {
    self.x == 1.0 && self.y == 1.0 && (shape.is_planar() || self.z == 1.0)
  }

  /// True if all spacings relevant for `shape` are equal
  pub fn is_isotropic(&self, shape: Shape) -> bool {
    self.x == self.y && (shape.is_planar() || self.x == self.z)
  }
}

////////////////////////////////////////////////////////////////////////////////
//                                   GRID                                     //
////////////////////////////////////////////////////////////////////////////////

/// Allocates a buffer of `len` copies of `value`, reporting impossible or
/// refused allocations instead of aborting.
pub(crate) fn try_alloc<T: Clone>(len: usize, value: T) -> WsResult<Vec<T>> {
  const LIMIT: usize = isize::MAX as usize;
  let bytes = len.checked_mul(std::mem::size_of::<T>());
  match bytes {
    Some(bytes) if bytes <= LIMIT => {
      let mut buffer = Vec::new();
      buffer
        .try_reserve_exact(len)
        .map_err(|_| WatershedError::ResourceExhaustion { requested: bytes, available: None })?;
      buffer.resize(len, value);
      Ok(buffer)
    }
    _ => Err(WatershedError::ResourceExhaustion {
      requested: bytes.unwrap_or(usize::MAX),
      available: Some(LIMIT),
    }),
  }
}

/// A dense 2D or 3D grid of samples with a spatial calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
  data: nd::Array3<T>,
  calibration: Calibration,
}

impl<T: Sample> Grid<T> {
  /// Allocates a grid with every voxel set to `value`
  pub fn filled(shape: Shape, value: T) -> WsResult<Self> {
    let len = shape.checked_len().ok_or(WatershedError::ResourceExhaustion {
      requested: usize::MAX,
      available: Some(isize::MAX as usize),
    })?;
    Self::from_vec(shape, try_alloc(len, value)?)
  }

  pub fn zeros(shape: Shape) -> WsResult<Self> {
    Self::filled(shape, T::zero())
  }

  /// Wraps a raster-ordered buffer
  pub fn from_vec(shape: Shape, data: Vec<T>) -> WsResult<Self> {
    if shape.checked_len() != Some(data.len()) {
      return Err(WatershedError::InvalidParameter(format!(
        "buffer of {} samples does not fit a {shape} grid",
        data.len()
      )));
    }
    let data = nd::Array3::from_shape_vec(shape.dim(), data)
      .map_err(|err| WatershedError::InvalidParameter(err.to_string()))?;
    Ok(Grid { data, calibration: Calibration::default() })
  }

  /// Wraps a planar image indexed `[y, x]` (rows, columns)
  pub fn from_array2(array: nd::Array2<T>) -> Self {
    Self::from_array3(array.insert_axis(nd::Axis(0)))
  }

  /// Wraps a volume indexed `[z, y, x]`
  pub fn from_array3(array: nd::Array3<T>) -> Self {
    let data = if array.is_standard_layout() {
      array
    } else {
      array.as_standard_layout().into_owned()
    };
    Grid { data, calibration: Calibration::default() }
  }

  pub fn with_calibration(mut self, calibration: Calibration) -> Self {
    self.calibration = calibration;
    self
  }

  pub fn calibration(&self) -> &Calibration {
    &self.calibration
  }

  pub fn shape(&self) -> Shape {
    let (depth, height, width) = self.data.dim();
    Shape { width, height, depth }
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn get(&self, x: usize, y: usize, z: usize) -> Option<T> {
    self.data.get([z, y, x]).copied()
  }

  pub fn get_mut(&mut self, x: usize, y: usize, z: usize) -> Option<&mut T> {
    self.data.get_mut([z, y, x])
  }

  /// Samples in raster order
  #[inline(always)]
  pub fn as_slice(&self) -> &[T] {
    self.data.as_slice().expect("grid storage is always in standard layout")
  }

  #[inline(always)]
  pub fn as_slice_mut(&mut self) -> &mut [T] {
    self.data.as_slice_mut().expect("grid storage is always in standard layout")
  }

  /// ndarray view indexed `[z, y, x]`
  pub fn view(&self) -> nd::ArrayView3<'_, T> {
    self.data.view()
  }

  pub fn view_mut(&mut self) -> nd::ArrayViewMut3<'_, T> {
    self.data.view_mut()
  }

  /// Planar slice at depth `z`, indexed `[y, x]`
  pub fn slice(&self, z: usize) -> nd::ArrayView2<'_, T> {
    self.data.index_axis(nd::Axis(0), z)
  }

  pub fn into_array(self) -> nd::Array3<T> {
    self.data
  }

  /// Applies `f` to every sample, keeping shape and calibration
  pub fn map<U: Sample>(&self, f: impl FnMut(&T) -> U) -> Grid<U> {
    Grid { data: self.data.map(f), calibration: self.calibration.clone() }
  }

  /// Binary mask of the non-zero samples
  pub fn foreground(&self) -> Grid<u8> {
    self.map(|&v| if v.is_foreground() { FOREGROUND } else { 0 })
  }

  /// Errors with `ShapeMismatch` unless `other` has the same shape
  pub fn ensure_same_shape<U: Sample>(&self, other: &Grid<U>) -> WsResult<()> {
    if self.shape() == other.shape() {
      Ok(())
    } else {
      Err(WatershedError::ShapeMismatch { expected: self.shape(), found: other.shape() })
    }
  }

  /// Extreme finite values of the grid, NaNs ignored. `None` for empty grids
  /// and all-NaN grids.
  pub fn min_max(&self) -> Option<(T, T)> {
    self.as_slice().iter().filter(|v| !v.is_nan()).fold(None, |acc, &v| match acc {
      None => Some((v, v)),
      Some((lo, hi)) => Some((if v < lo { v } else { lo }, if v > hi { v } else { hi })),
    })
  }

  /// Converts every sample to `U`, clamping to the range of `U`
  pub fn cast<U: Sample>(&self) -> Grid<U> {
    let (lo, hi) = (U::min_value().key(), U::max_value().key());
    self.map(|&v| {
      let key = v.key();
      if key.is_nan() {
        <U as NumCast>::from(f64::NAN).unwrap_or_else(U::zero)
      } else {
        <U as NumCast>::from(key.clamp(lo, hi)).unwrap_or_else(U::zero)
      }
    })
  }
}

////////////////////////////////////////////////////////////////////////////////
//                              DYNAMIC GRIDS                                 //
////////////////////////////////////////////////////////////////////////////////

/// The sample types a host may hand to the segmentation pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
  U8,
  U16,
  I32,
  F32,
}

/// A grid of any of the sample types supported by the pipelines.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleGrid {
  U8(Grid<u8>),
  U16(Grid<u16>),
  I32(Grid<i32>),
  F32(Grid<f32>),
}

/// Binds the wrapped grid of a `SampleGrid` to `$grid` and evaluates `$body`
/// for whichever sample type it holds.
macro_rules! with_sample_grid {
  ($input:expr, $grid:ident => $body:expr) => {
    match $input {
      $crate::grid::SampleGrid::U8($grid) => $body,
      $crate::grid::SampleGrid::U16($grid) => $body,
      $crate::grid::SampleGrid::I32($grid) => $body,
      $crate::grid::SampleGrid::F32($grid) => $body,
    }
  };
}
pub(crate) use with_sample_grid;

impl SampleGrid {
  pub fn shape(&self) -> Shape {
    with_sample_grid!(self, grid => grid.shape())
  }

  pub fn calibration(&self) -> &Calibration {
    with_sample_grid!(self, grid => grid.calibration())
  }

  pub fn sample_type(&self) -> SampleType {
    match self {
      SampleGrid::U8(_) => SampleType::U8,
      SampleGrid::U16(_) => SampleType::U16,
      SampleGrid::I32(_) => SampleType::I32,
      SampleGrid::F32(_) => SampleType::F32,
    }
  }

  /// Binary mask of the non-zero samples
  pub fn foreground(&self) -> Grid<u8> {
    with_sample_grid!(self, grid => grid.foreground())
  }
}

impl From<Grid<u8>> for SampleGrid {
  fn from(grid: Grid<u8>) -> Self {
    SampleGrid::U8(grid)
  }
}

impl From<Grid<u16>> for SampleGrid {
  fn from(grid: Grid<u16>) -> Self {
    SampleGrid::U16(grid)
  }
}

impl From<Grid<i32>> for SampleGrid {
  fn from(grid: Grid<i32>) -> Self {
    SampleGrid::I32(grid)
  }
}

impl From<Grid<f32>> for SampleGrid {
  fn from(grid: Grid<f32>) -> Self {
    SampleGrid::F32(grid)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn float_successor_is_strictly_greater() {
    for v in [-1.5f32, -0.0, 0.0, 1e-30, 3.0] {
      assert!(v.successor() > v, "{v}");
      assert!(v.predecessor() < v, "{v}");
    }
    assert!(f32::MIN.successor() > f32::MIN);
    assert!(f32::MAX.predecessor() < f32::MAX);
    assert_eq!(f32::MAX.saturating_offset(1e300), f32::MAX);
  }

  #[test]
  fn float_neighbours_saturate_at_the_finite_bounds() {
    assert_eq!(f32::MAX.successor(), f32::MAX);
    assert_eq!(f32::MIN.predecessor(), f32::MIN);
    assert_eq!(f64::MIN.predecessor(), f64::MIN);
    assert_eq!(f32::INFINITY.successor(), f32::INFINITY);
    assert_eq!(u8::MIN.predecessor(), u8::MIN);
  }

  #[test]
  fn index_round_trips_through_coords() {
    let shape = Shape::new_3d(4, 3, 2);
    assert_eq!(shape.coords(shape.index(3, 1, 1)), (3, 1, 1));
    assert_eq!(shape.offset((0, 0, 0), [-1, 0, 0]), None);
    assert_eq!(shape.offset((0, 0, 0), [1, 1, 1]), Some(shape.index(1, 1, 1)));
  }

  #[test]
  fn unreasonable_shapes_are_rejected() {
    let shape = Shape::new_3d(usize::MAX, 2, 2);
    assert!(matches!(
      Grid::<u8>::zeros(shape),
      Err(WatershedError::ResourceExhaustion { .. })
    ));
  }
}
