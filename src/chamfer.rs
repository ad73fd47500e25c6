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

//! Chamfer masks: small sets of `(offset, weight)` pairs that approximate the
//! euclidean distance through local propagation.
//!
//! Every mask carries two weight tables. The integer ("short") weights are used
//! when the distance map is computed in an integer type, the float weights when
//! it is computed in `f32`. The named tables of [`ChamferWeights`] cover the
//! usual 3x3 and 5x5 masks in 2D and the 3x3x3 and 5x5x5 masks in 3D. Custom
//! masks can be built with [`ChamferMask::from_weights_2d`],
//! [`ChamferMask::from_weights_3d`] or [`ChamferMask::new`].

use crate::connectivity::precedes_origin;
use crate::error::{WatershedError, WsResult};

/// A single `(offset, weight)` pair of a chamfer mask
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChamferOffset {
  pub dx: isize,
  pub dy: isize,
  pub dz: isize,
  pub short_weight: u16,
  pub float_weight: f32,
}

impl ChamferOffset {
  pub fn new(dx: isize, dy: isize, dz: isize, short_weight: u16, float_weight: f32) -> Self {
    ChamferOffset { dx, dy, dz, short_weight, float_weight }
  }

  #[inline(always)]
  pub fn delta(&self) -> [isize; 3] {
    [self.dx, self.dy, self.dz]
  }

  fn mirrored(&self) -> Self {
    ChamferOffset { dx: -self.dx, dy: -self.dy, dz: -self.dz, ..*self }
  }

  fn l1(&self) -> usize {
    self.dx.unsigned_abs() + self.dy.unsigned_abs() + self.dz.unsigned_abs()
  }
}

/// A validated, point-symmetric chamfer mask.
///
/// The mask is stored as its full offset set and as the two half-masks used by
/// the raster sweeps: the *forward* half holds the offsets that precede the
/// origin in raster order, the *backward* half their mirror images.
#[derive(Debug, Clone, PartialEq)]
pub struct ChamferMask {
  offsets: Vec<ChamferOffset>,
  forward: Vec<ChamferOffset>,
  backward: Vec<ChamferOffset>,
  planar: bool,
}

impl ChamferMask {
  /// Builds a mask from its full offset set.
  ///
  /// Fails with `InvalidMask` unless: the set is non-empty and free of
  /// duplicates and of the zero offset, all weights are strictly positive, each
  /// offset's mirror image is present with the same weights, the orthogonal
  /// unit moves are present, and no weight exceeds the cost of reaching the
  /// same offset with unit moves.
  pub fn new(offsets: Vec<ChamferOffset>) -> WsResult<Self> {
    let invalid = |msg: String| Err(WatershedError::InvalidMask(msg));
    if offsets.is_empty() {
      return invalid("mask has no offsets".to_string());
    }
    let planar = offsets.iter().all(|o| o.dz == 0);

    for (i, o) in offsets.iter().enumerate() {
      if o.delta() == [0, 0, 0] {
        return invalid("mask contains the zero offset".to_string());
      }
      if o.short_weight == 0 || !(o.float_weight > 0.0 && o.float_weight.is_finite()) {
        return invalid(format!("offset {:?} has a non-positive weight", o.delta()));
      }
      if offsets[..i].iter().any(|p| p.delta() == o.delta()) {
        return invalid(format!("offset {:?} appears twice", o.delta()));
      }
      let mirror = o.mirrored();
      if !offsets.contains(&mirror) {
        return invalid(format!("offset {:?} has no mirror image with equal weights", o.delta()));
      }
    }

    //Unit moves along every axis of the mask must exist
    let find = |d: [isize; 3]| offsets.iter().find(|o| o.delta() == d).copied();
    let axes: &[[isize; 3]] =
      if planar { &[[1, 0, 0], [0, 1, 0]] } else { &[[1, 0, 0], [0, 1, 0], [0, 0, 1]] };
    let mut unit = [(0u32, 0f32); 3];
    for (axis, &d) in axes.iter().enumerate() {
      match find(d) {
        Some(o) => unit[axis] = (o.short_weight as u32, o.float_weight),
        None => return invalid(format!("mask lacks the orthogonal unit move {d:?}")),
      }
    }

    //Triangle inequality with respect to the unit moves
    for o in &offsets {
      let steps = [o.dx.unsigned_abs(), o.dy.unsigned_abs(), o.dz.unsigned_abs()];
      let short_bound: u64 = steps.iter().zip(unit.iter()).map(|(&s, u)| s as u64 * u.0 as u64).sum();
      let float_bound: f32 = steps.iter().zip(unit.iter()).map(|(&s, u)| s as f32 * u.1).sum();
      if o.short_weight as u64 > short_bound || o.float_weight > float_bound * (1.0 + 1e-6) {
        return invalid(format!(
          "weight of offset {:?} exceeds the cost of {} unit moves",
          o.delta(),
          o.l1()
        ));
      }
    }

    Ok(Self::split(offsets, planar))
  }

  fn split(offsets: Vec<ChamferOffset>, planar: bool) -> Self {
    let forward: Vec<_> = offsets.iter().copied().filter(|o| precedes_origin(o.delta())).collect();
    let backward = forward.iter().map(ChamferOffset::mirrored).collect();
    ChamferMask { offsets, forward, backward, planar }
  }

  /// Expands `(generator, short, float)` triples into every axis permutation
  /// and sign combination of the generator.
  fn symmetric(generators: &[([isize; 3], u16, f32)], planar: bool) -> Vec<ChamferOffset> {
    let perms: &[[usize; 3]] = if planar {
      &[[0, 1, 2], [1, 0, 2]]
    } else {
      &[[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]]
    };
    let mut offsets: Vec<ChamferOffset> = Vec::new();
    for &(gen, short, float) in generators {
      for perm in perms {
        let d = [gen[perm[0]], gen[perm[1]], gen[perm[2]]];
        for sx in [1, -1] {
          for sy in [1, -1] {
            for sz in [1, -1] {
              let o = ChamferOffset::new(d[0] * sx, d[1] * sy, d[2] * sz, short, float);
              if !offsets.iter().any(|p| p.delta() == o.delta()) {
                offsets.push(o);
              }
            }
          }
        }
      }
    }
    offsets
  }

  /// Planar mask from a weight table: two weights give a 3x3 mask (orthogonal,
  /// diagonal), three weights a 5x5 mask that adds the knight moves.
  pub fn from_weights_2d(short: &[u16], float: &[f32]) -> WsResult<Self> {
    const GENERATORS: [[isize; 3]; 3] = [[1, 0, 0], [1, 1, 0], [2, 1, 0]];
    Self::from_table(&GENERATORS, short, float, 2..=3, true)
  }

  /// Volumetric mask from a weight table: three weights give a 3x3x3 mask
  /// (face, edge, corner), four weights a 5x5x5 mask that adds the knight moves.
  pub fn from_weights_3d(short: &[u16], float: &[f32]) -> WsResult<Self> {
    const GENERATORS: [[isize; 3]; 4] = [[1, 0, 0], [1, 1, 0], [1, 1, 1], [2, 1, 0]];
    Self::from_table(&GENERATORS, short, float, 3..=4, false)
  }

  fn from_table(
    generators: &[[isize; 3]],
    short: &[u16],
    float: &[f32],
    lengths: std::ops::RangeInclusive<usize>,
    planar: bool,
  ) -> WsResult<Self> {
    if short.len() != float.len() || !lengths.contains(&short.len()) {
      return Err(WatershedError::InvalidMask(format!(
        "expected between {} and {} weights in both tables, got {} and {}",
        lengths.start(),
        lengths.end(),
        short.len(),
        float.len()
      )));
    }
    let table: Vec<_> = generators
      .iter()
      .zip(short.iter().zip(float.iter()))
      .map(|(&gen, (&s, &f))| (gen, s, f))
      .collect();
    Self::new(Self::symmetric(&table, planar))
  }

  pub fn offsets(&self) -> &[ChamferOffset] {
    &self.offsets
  }

  /// Offsets preceding the origin in raster order
  pub fn forward(&self) -> &[ChamferOffset] {
    &self.forward
  }

  /// Mirror images of the forward offsets
  pub fn backward(&self) -> &[ChamferOffset] {
    &self.backward
  }

  pub fn is_planar(&self) -> bool {
    self.planar
  }

  /// Integer weight of the unit step along x, used for normalisation
  pub fn short_normalisation(&self) -> u16 {
    self.unit_x().map(|o| o.short_weight).unwrap_or(1)
  }

  /// Float weight of the unit step along x, used for normalisation
  pub fn float_normalisation(&self) -> f32 {
    self.unit_x().map(|o| o.float_weight).unwrap_or(1.0)
  }

  fn unit_x(&self) -> Option<&ChamferOffset> {
    self.offsets.iter().find(|o| o.delta() == [1, 0, 0])
  }

  /// Largest component of any offset
  pub fn radius(&self) -> usize {
    self
      .offsets
      .iter()
      .map(|o| o.dx.unsigned_abs().max(o.dy.unsigned_abs()).max(o.dz.unsigned_abs()))
      .max()
      .unwrap_or(0)
  }
}

////////////////////////////////////////////////////////////////////////////////
//                             NAMED WEIGHT TABLES                            //
////////////////////////////////////////////////////////////////////////////////

/// Named chamfer weight tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChamferWeights {
  /// 3x3, (1, 1)
  Chessboard,
  /// 3x3, (1, 2)
  CityBlock,
  /// 3x3, (1, √2); integer table (10, 14)
  QuasiEuclidean,
  /// 3x3, (3, 4)
  Borgefors,
  /// 3x3, (2, 3)
  Weights23,
  /// 5x5, (5, 7, 11)
  ChessKnight,
  /// 3x3x3, (1, 1, 1)
  Chessboard3D,
  /// 3x3x3, (1, 2, 3)
  CityBlock3D,
  /// 3x3x3, (1, √2, √3); integer table (10, 14, 17)
  QuasiEuclidean3D,
  /// 3x3x3, (3, 4, 5)
  Borgefors3D,
  /// 5x5x5, (3, 4, 5, 7)
  Weights3457,
}

impl ChamferWeights {
  pub const ALL: [ChamferWeights; 11] = [
    ChamferWeights::Chessboard,
    ChamferWeights::CityBlock,
    ChamferWeights::QuasiEuclidean,
    ChamferWeights::Borgefors,
    ChamferWeights::Weights23,
    ChamferWeights::ChessKnight,
    ChamferWeights::Chessboard3D,
    ChamferWeights::CityBlock3D,
    ChamferWeights::QuasiEuclidean3D,
    ChamferWeights::Borgefors3D,
    ChamferWeights::Weights3457,
  ];

  pub fn name(self) -> &'static str {
    match self {
      ChamferWeights::Chessboard => "chessboard",
      ChamferWeights::CityBlock => "city-block",
      ChamferWeights::QuasiEuclidean => "quasi-euclidean",
      ChamferWeights::Borgefors => "borgefors",
      ChamferWeights::Weights23 => "weights-23",
      ChamferWeights::ChessKnight => "chess-knight",
      ChamferWeights::Chessboard3D => "chessboard-3d",
      ChamferWeights::CityBlock3D => "city-block-3d",
      ChamferWeights::QuasiEuclidean3D => "quasi-euclidean-3d",
      ChamferWeights::Borgefors3D => "borgefors-3d",
      ChamferWeights::Weights3457 => "weights-3457",
    }
  }

  pub fn is_planar(self) -> bool {
    self.tables().0
  }

  /// `(planar, short weights, float weights)`
  fn tables(self) -> (bool, &'static [u16], &'static [f32]) {
    use std::f32::consts::SQRT_2;
    const SQRT_3: f32 = 1.732_050_8;
    match self {
      ChamferWeights::Chessboard => (true, &[1, 1], &[1.0, 1.0]),
      ChamferWeights::CityBlock => (true, &[1, 2], &[1.0, 2.0]),
      ChamferWeights::QuasiEuclidean => (true, &[10, 14], &[1.0, SQRT_2]),
      ChamferWeights::Borgefors => (true, &[3, 4], &[3.0, 4.0]),
      ChamferWeights::Weights23 => (true, &[2, 3], &[2.0, 3.0]),
      ChamferWeights::ChessKnight => (true, &[5, 7, 11], &[5.0, 7.0, 11.0]),
      ChamferWeights::Chessboard3D => (false, &[1, 1, 1], &[1.0, 1.0, 1.0]),
      ChamferWeights::CityBlock3D => (false, &[1, 2, 3], &[1.0, 2.0, 3.0]),
      ChamferWeights::QuasiEuclidean3D => (false, &[10, 14, 17], &[1.0, SQRT_2, SQRT_3]),
      ChamferWeights::Borgefors3D => (false, &[3, 4, 5], &[3.0, 4.0, 5.0]),
      ChamferWeights::Weights3457 => (false, &[3, 4, 5, 7], &[3.0, 4.0, 5.0, 7.0]),
    }
  }

  /// The chamfer mask described by this table
  pub fn mask(self) -> ChamferMask {
    const PLANAR: [[isize; 3]; 3] = [[1, 0, 0], [1, 1, 0], [2, 1, 0]];
    const VOLUME: [[isize; 3]; 4] = [[1, 0, 0], [1, 1, 0], [1, 1, 1], [2, 1, 0]];
    let (planar, short, float) = self.tables();
    let generators: &[[isize; 3]] = if planar { &PLANAR } else { &VOLUME };
    let table: Vec<_> = generators
      .iter()
      .zip(short.iter().zip(float.iter()))
      .map(|(&gen, (&s, &f))| (gen, s, f))
      .collect();
    //Named tables are checked by the unit tests below
    ChamferMask::split(ChamferMask::symmetric(&table, planar), planar)
  }
}

impl std::fmt::Display for ChamferWeights {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

impl std::str::FromStr for ChamferWeights {
  type Err = WatershedError;

  fn from_str(s: &str) -> WsResult<Self> {
    let wanted = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
    ChamferWeights::ALL.into_iter().find(|w| w.name() == wanted).ok_or_else(|| {
      WatershedError::InvalidParameter(format!("unknown chamfer weights \"{s}\""))
    })
  }
}

impl From<ChamferWeights> for ChamferMask {
  fn from(weights: ChamferWeights) -> Self {
    weights.mask()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn named_tables_are_valid_masks() {
    for weights in ChamferWeights::ALL {
      let mask = weights.mask();
      let validated = ChamferMask::new(mask.offsets().to_vec()).unwrap();
      assert_eq!(validated, mask, "{weights}");
      assert_eq!(mask.forward().len() * 2, mask.offsets().len());
    }
  }

  #[test]
  fn mask_sizes() {
    assert_eq!(ChamferWeights::Borgefors.mask().offsets().len(), 8);
    assert_eq!(ChamferWeights::ChessKnight.mask().offsets().len(), 16);
    assert_eq!(ChamferWeights::Borgefors3D.mask().offsets().len(), 26);
    assert_eq!(ChamferWeights::Weights3457.mask().offsets().len(), 26 + 24);
    assert_eq!(ChamferWeights::ChessKnight.mask().radius(), 2);
  }

  #[test]
  fn asymmetric_masks_are_rejected() {
    let offsets = vec![
      ChamferOffset::new(1, 0, 0, 1, 1.0),
      ChamferOffset::new(-1, 0, 0, 2, 2.0),
      ChamferOffset::new(0, 1, 0, 1, 1.0),
      ChamferOffset::new(0, -1, 0, 1, 1.0),
    ];
    assert!(matches!(ChamferMask::new(offsets), Err(WatershedError::InvalidMask(_))));
  }

  #[test]
  fn overweight_diagonals_are_rejected() {
    assert!(ChamferMask::from_weights_2d(&[1, 3], &[1.0, 3.0]).is_err());
    assert!(ChamferMask::from_weights_2d(&[0, 1], &[0.0, 1.0]).is_err());
    assert!(ChamferMask::from_weights_2d(&[3, 4], &[3.0, 4.0]).is_ok());
  }

  #[test]
  fn names_parse() {
    assert_eq!("Quasi Euclidean".parse::<ChamferWeights>().unwrap(), ChamferWeights::QuasiEuclidean);
    assert!("manhattan".parse::<ChamferWeights>().is_err());
  }
}
