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

use crate::error::{WatershedError, WsResult};
use crate::grid::Shape;

/// Neighbour adjacency rule. The same connectivity must be used by every stage
/// of a pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Connectivity {
  /// planar, edge neighbours only
  #[default]
  C4,
  /// planar, edge and corner neighbours
  C8,
  /// volumetric, face neighbours only
  C6,
  /// volumetric, face and edge neighbours
  C18,
  /// volumetric, face, edge and corner neighbours
  C26,
}

impl Connectivity {
  /// Number of neighbours of an interior voxel
  pub fn count(self) -> usize {
    match self {
      Connectivity::C4 => 4,
      Connectivity::C8 => 8,
      Connectivity::C6 => 6,
      Connectivity::C18 => 18,
      Connectivity::C26 => 26,
    }
  }

  pub fn is_planar(self) -> bool {
    matches!(self, Connectivity::C4 | Connectivity::C8)
  }

  /// The default connectivity for a grid: 4 for planar grids, 6 for volumes
  pub fn default_for(shape: Shape) -> Self {
    if shape.is_planar() {
      Connectivity::C4
    } else {
      Connectivity::C6
    }
  }

  /// Planar connectivities only make sense on planar grids
  pub fn check(self, shape: Shape) -> WsResult<()> {
    if self.is_planar() && !shape.is_planar() {
      Err(WatershedError::InvalidParameter(format!(
        "{}-connectivity is planar, but the grid has depth {}",
        self.count(),
        shape.depth
      )))
    } else {
      Ok(())
    }
  }

  /// `(dx, dy, dz)` offsets of all neighbours, in raster order
  pub fn offsets(self) -> Vec<[isize; 3]> {
    let mut offsets = Vec::with_capacity(self.count());
    let dzs: &[isize] = if self.is_planar() { &[0] } else { &[-1, 0, 1] };
    for &dz in dzs {
      for dy in -1isize..=1 {
        for dx in -1isize..=1 {
          //How many axes does this offset move along?
          let axes = (dx != 0) as usize + (dy != 0) as usize + (dz != 0) as usize;
          let keep = match self {
            Connectivity::C4 | Connectivity::C6 => axes == 1,
            Connectivity::C18 => axes == 1 || axes == 2,
            Connectivity::C8 | Connectivity::C26 => axes >= 1,
          };
          if keep {
            offsets.push([dx, dy, dz]);
          }
        }
      }
    }
    offsets
  }

  /// The neighbours that precede a voxel in raster order
  pub fn forward_offsets(self) -> Vec<[isize; 3]> {
    self.offsets().into_iter().filter(|&d| precedes_origin(d)).collect()
  }
}

/// True if `d` points to a voxel visited before the origin in raster order
#[inline(always)]
pub(crate) fn precedes_origin([dx, dy, dz]: [isize; 3]) -> bool {
  dz < 0 || (dz == 0 && (dy < 0 || (dy == 0 && dx < 0)))
}

impl TryFrom<u8> for Connectivity {
  type Error = WatershedError;

  fn try_from(value: u8) -> WsResult<Self> {
    match value {
      4 => Ok(Connectivity::C4),
      8 => Ok(Connectivity::C8),
      6 => Ok(Connectivity::C6),
      18 => Ok(Connectivity::C18),
      26 => Ok(Connectivity::C26),
      other => Err(WatershedError::InvalidParameter(format!(
        "connectivity must be one of 4, 8, 6, 18 or 26, not {other}"
      ))),
    }
  }
}

impl std::fmt::Display for Connectivity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}-connectivity", self.count())
  }
}

/// Neighbour lookup for one grid shape.
#[derive(Debug, Clone)]
pub(crate) struct Neighbourhood {
  shape: Shape,
  offsets: Vec<[isize; 3]>,
}

impl Neighbourhood {
  pub fn new(shape: Shape, connectivity: Connectivity) -> WsResult<Self> {
    connectivity.check(shape)?;
    Ok(Neighbourhood { shape, offsets: connectivity.offsets() })
  }

  /// Flat indices of the in-bounds neighbours of the voxel at `index`
  #[inline]
  pub fn of(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
    let coords = self.shape.coords(index);
    self.offsets.iter().filter_map(move |&d| self.shape.offset(coords, d))
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn neighbour_counts() {
    for (conn, n) in [
      (Connectivity::C4, 4),
      (Connectivity::C8, 8),
      (Connectivity::C6, 6),
      (Connectivity::C18, 18),
      (Connectivity::C26, 26),
    ] {
      assert_eq!(conn.offsets().len(), n);
      assert_eq!(conn.forward_offsets().len(), n / 2);
    }
  }

  #[test]
  fn corner_voxel_has_clipped_neighbourhood() {
    let shape = Shape::new_2d(3, 3);
    let hood = Neighbourhood::new(shape, Connectivity::C8).unwrap();
    let mut nbs: Vec<usize> = hood.of(0).collect();
    nbs.sort();
    assert_eq!(nbs, vec![1, 3, 4]);
  }

  #[test]
  fn planar_connectivity_rejects_volumes() {
    assert!(Connectivity::C8.check(Shape::new_3d(2, 2, 2)).is_err());
    assert!(Connectivity::C26.check(Shape::new_2d(2, 2)).is_ok());
  }
}
