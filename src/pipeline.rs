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

//! Ready-made segmentation pipelines and the builder that configures them.

use crate::chamfer::{ChamferMask, ChamferWeights};
use crate::connectivity::Connectivity;
use crate::control::{Control, PerfReport};
use crate::distance::{distance_map, DistanceValue, Sources};
use crate::error::{complete_or_return, Outcome, Warning, WatershedError, WsResult};
use crate::extrema::{extended_minima, impose_minima};
use crate::flooding::{flood, FloodOptions};
use crate::gradient::morphological_gradient;
use crate::grid::{with_sample_grid, Grid, Sample, SampleGrid, Shape};
use crate::labelling::{distinct_labels, label_components, rasterise_markers};

////////////////////////////////////////////////////////////////////////////////
//                              INPUT & OUTPUT                                //
////////////////////////////////////////////////////////////////////////////////

/// The ways a host can specify the flooding seeds
#[derive(Debug, Clone, PartialEq)]
pub enum Markers {
  /// Pre-labelled grid, 0 = no marker
  Labels(Grid<u32>),
  /// Binary grid, labelled into connected components before flooding
  Mask(Grid<u8>),
  /// `[x, y, z]` points, point `i` becomes label `i + 1`
  Points(Vec<[usize; 3]>),
}

/// Everything a pipeline invocation consumes. The pipeline only borrows it.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationInput {
  pub image: SampleGrid,
  pub markers: Option<Markers>,
  /// Binary mask restricting the flooded area
  pub mask: Option<Grid<u8>>,
}

impl SegmentationInput {
  pub fn new(image: impl Into<SampleGrid>) -> Self {
    SegmentationInput { image: image.into(), markers: None, mask: None }
  }

  pub fn with_markers(mut self, markers: Markers) -> Self {
    self.markers = Some(markers);
    self
  }

  pub fn with_mask(mut self, mask: Grid<u8>) -> Self {
    self.mask = Some(mask);
    self
  }
}

/// Result of a completed pipeline invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
  /// Basin ids, 0 on dams and outside the flooded area
  pub labels: Grid<u32>,
  /// Number of distinct basin ids in `labels`
  pub label_count: usize,
  /// Data-quality warnings raised by any stage
  pub warnings: Vec<Warning>,
  pub report: PerfReport,
}

/// Output type of the distance map in the distance-transform pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceKind {
  U16,
  I32,
  #[default]
  F32,
}

////////////////////////////////////////////////////////////////////////////////
//                                 BUILDER                                    //
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineKind {
  MarkerControlled,
  Morphological,
  DistanceTransform,
}

#[derive(Debug, Clone)]
/// Builder for configuring a segmentation pipeline.
///
/// Use `new_marker_controlled()` to flood an image from host-supplied markers,
/// `new_morphological()` to flood an image from its own extended minima, or
/// `new_distance_transform()` to split touching particles of a binary image.
/// Once configured, `build()` validates the options and returns a
/// `Box<dyn Segmenter + Send + Sync>` that can be shared between threads and
/// reused for any number of inputs.
pub struct SegmentationBuilder {
  kind: PipelineKind,
  connectivity: Option<Connectivity>,
  dams: bool,
  max_level: Option<f64>,
  dynamic: f64,
  gradient: bool,
  chamfer: Option<ChamferMask>,
  normalize: bool,
  distance_kind: DistanceKind,
}

impl SegmentationBuilder {
  fn new(kind: PipelineKind, dynamic: f64) -> Self {
    SegmentationBuilder {
      kind,
      connectivity: None,
      dams: true,
      max_level: None,
      dynamic,
      gradient: false,
      chamfer: None,
      normalize: true,
      distance_kind: DistanceKind::default(),
    }
  }

  /// creates a new `SegmentationBuilder` that floods from the markers of the input
  pub fn new_marker_controlled() -> Self {
    Self::new(PipelineKind::MarkerControlled, 0.0)
  }

  /// creates a new `SegmentationBuilder` that floods from the extended minima
  /// of the image (or of its morphological gradient)
  pub fn new_morphological() -> Self {
    Self::new(PipelineKind::Morphological, 10.0)
  }

  /// creates a new `SegmentationBuilder` that floods the inverted inside
  /// distance map of a binary image
  pub fn new_distance_transform() -> Self {
    Self::new(PipelineKind::DistanceTransform, 1.0)
  }

  /// Set the connectivity of every stage. Defaults to 4-connectivity for
  /// planar images and 6-connectivity for volumes.
  pub fn set_connectivity(mut self, connectivity: Connectivity) -> Self {
    self.connectivity = Some(connectivity);
    self
  }

  /// Enable or disable watershed lines (enabled by default)
  pub fn set_dams(mut self, dams: bool) -> Self {
    self.dams = dams;
    self
  }

  /// Voxels above this level are never flooded
  pub fn set_max_level(mut self, max_level: f64) -> Self {
    self.max_level = Some(max_level);
    self
  }

  /// Minimal depth of the minima used as seeds (morphological and distance
  /// pipelines only)
  pub fn set_dynamic(mut self, dynamic: f64) -> Self {
    self.dynamic = dynamic;
    self
  }

  /// Flood the morphological gradient of the image instead of the image itself
  /// (morphological pipeline only)
  pub fn set_gradient(mut self, gradient: bool) -> Self {
    self.gradient = gradient;
    self
  }

  /// Set the chamfer mask of the distance pipeline. Defaults to Borgefors
  /// weights of matching dimension.
  pub fn set_chamfer_mask(mut self, mask: impl Into<ChamferMask>) -> Self {
    self.chamfer = Some(mask.into());
    self
  }

  /// Divide distances by the orthogonal weight (enabled by default)
  pub fn set_normalize(mut self, normalize: bool) -> Self {
    self.normalize = normalize;
    self
  }

  pub fn set_distance_kind(mut self, kind: DistanceKind) -> Self {
    self.distance_kind = kind;
    self
  }

  /// Build a `Box<dyn Segmenter + Send + Sync>` from the current builder
  /// configuration. Fails with `InvalidParameter` if the dynamic is negative or
  /// not finite, or if the maximum level is NaN.
  pub fn build(self) -> WsResult<Box<dyn Segmenter + Send + Sync>> {
    if !(self.dynamic.is_finite() && self.dynamic >= 0.0) {
      return Err(WatershedError::InvalidParameter(format!(
        "dynamic must be a finite, non-negative number, not {}",
        self.dynamic
      )));
    }
    if self.max_level.is_some_and(f64::is_nan) {
      return Err(WatershedError::InvalidParameter("maximum level is NaN".to_string()));
    }

    let settings = Settings {
      connectivity: self.connectivity,
      dams: self.dams,
      max_level: self.max_level,
      dynamic: self.dynamic,
    };
    Ok(match self.kind {
      PipelineKind::MarkerControlled => Box::new(MarkerControlledWatershed { settings }),
      PipelineKind::Morphological => {
        Box::new(MorphologicalWatershed { settings, gradient: self.gradient })
      }
      PipelineKind::DistanceTransform => Box::new(DistanceTransformWatershed {
        settings,
        chamfer: self.chamfer,
        normalize: self.normalize,
        distance_kind: self.distance_kind,
      }),
    })
  }
}

/// A configured segmentation pipeline. This trait is dyn-safe.
pub trait Segmenter {
  /// Runs the pipeline on `input`. Returns `Outcome::Cancelled` as soon as the
  /// cancel token of `control` is observed; no partial labels are returned.
  fn segment(&self, input: &SegmentationInput, control: &Control)
    -> WsResult<Outcome<Segmentation>>;

  /// Human readable pipeline name
  fn name(&self) -> &'static str;
}

////////////////////////////////////////////////////////////////////////////////
//                                PIPELINES                                   //
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq)]
struct Settings {
  connectivity: Option<Connectivity>,
  dams: bool,
  max_level: Option<f64>,
  dynamic: f64,
}

impl Settings {
  fn connectivity(&self, shape: Shape) -> Connectivity {
    self.connectivity.unwrap_or_else(|| Connectivity::default_for(shape))
  }

  fn flood_options(&self, shape: Shape) -> FloodOptions {
    FloodOptions {
      connectivity: self.connectivity(shape),
      dams: self.dams,
      max_level: self.max_level,
    }
  }
}

/// Floods `image` from `markers` and packs the result
fn finish_flood<T: Sample>(
  image: &Grid<T>,
  markers: &Grid<u32>,
  mask: Option<&Grid<u8>>,
  options: &FloodOptions,
  mut warnings: Vec<Warning>,
  control: &Control,
) -> WsResult<Outcome<Segmentation>> {
  let flooded = complete_or_return!(flood(image, markers, mask, options, control)?);
  for warning in flooded.warnings {
    if !warnings.contains(&warning) {
      warnings.push(warning);
    }
  }
  let label_count = distinct_labels(&flooded.labels).len();
  let report = control.report();
  log::debug!("segmentation produced {label_count} basins");
  #[cfg(feature = "debug")]
  println!("{report}");
  Ok(Outcome::Complete(Segmentation { labels: flooded.labels, label_count, warnings, report }))
}

/// Extended minima -> labels -> imposition -> flooding
fn flood_from_minima<T: Sample>(
  relief: &Grid<T>,
  mask: Option<&Grid<u8>>,
  settings: &Settings,
  warnings: Vec<Warning>,
  control: &Control,
) -> WsResult<Outcome<Segmentation>> {
  let shape = relief.shape();
  let conn = settings.connectivity(shape);
  let minima = complete_or_return!(extended_minima(relief, settings.dynamic, conn, control)?);
  let seeds = complete_or_return!(label_components(&minima, conn, control)?);
  log::debug!("{} extended minima with dynamic {}", seeds.count, settings.dynamic);
  let imposed = complete_or_return!(impose_minima(relief, &minima, conn, control)?);
  finish_flood(&imposed, &seeds.grid, mask, &settings.flood_options(shape), warnings, control)
}

/// Floods the input image from the markers supplied with the input.
#[derive(Debug, Clone)]
pub struct MarkerControlledWatershed {
  settings: Settings,
}

impl MarkerControlledWatershed {
  fn segment_typed<T: Sample>(
    &self,
    image: &Grid<T>,
    input: &SegmentationInput,
    control: &Control,
  ) -> WsResult<Outcome<Segmentation>> {
    let shape = image.shape();
    let conn = self.settings.connectivity(shape);
    let markers = input.markers.as_ref().ok_or_else(|| {
      WatershedError::InvalidParameter("marker-controlled watershed needs markers".to_string())
    })?;
    let labels = match markers {
      Markers::Labels(labels) => {
        image.ensure_same_shape(labels)?;
        labels.clone()
      }
      Markers::Mask(mask) => {
        image.ensure_same_shape(mask)?;
        complete_or_return!(label_components(mask, conn, control)?).grid
      }
      Markers::Points(points) => rasterise_markers(shape, points)?.grid,
    };
    let options = self.settings.flood_options(shape);
    finish_flood(image, &labels, input.mask.as_ref(), &options, Vec::new(), control)
  }
}

impl Segmenter for MarkerControlledWatershed {
  fn segment(
    &self,
    input: &SegmentationInput,
    control: &Control,
  ) -> WsResult<Outcome<Segmentation>> {
    with_sample_grid!(&input.image, grid => self.segment_typed(grid, input, control))
  }

  fn name(&self) -> &'static str {
    "marker-controlled watershed"
  }
}

/// Floods the image (or its morphological gradient) from its own extended
/// minima. Markers supplied with the input are ignored.
#[derive(Debug, Clone)]
pub struct MorphologicalWatershed {
  settings: Settings,
  gradient: bool,
}

impl MorphologicalWatershed {
  fn segment_typed<T: Sample>(
    &self,
    image: &Grid<T>,
    input: &SegmentationInput,
    control: &Control,
  ) -> WsResult<Outcome<Segmentation>> {
    if let Some(mask) = &input.mask {
      image.ensure_same_shape(mask)?;
    }
    if input.markers.is_some() {
      log::debug!("morphological watershed ignores the supplied markers");
    }
    if self.gradient {
      let conn = self.settings.connectivity(image.shape());
      let relief = complete_or_return!(morphological_gradient(image, conn, control)?);
      flood_from_minima(&relief, input.mask.as_ref(), &self.settings, Vec::new(), control)
    } else {
      flood_from_minima(image, input.mask.as_ref(), &self.settings, Vec::new(), control)
    }
  }
}

impl Segmenter for MorphologicalWatershed {
  fn segment(
    &self,
    input: &SegmentationInput,
    control: &Control,
  ) -> WsResult<Outcome<Segmentation>> {
    with_sample_grid!(&input.image, grid => self.segment_typed(grid, input, control))
  }

  fn name(&self) -> &'static str {
    "morphological watershed"
  }
}

/// Splits touching particles of a binary image: floods the inverted inside
/// distance map from its extended maxima, restricted to the foreground (and to
/// the input mask, if one is supplied).
#[derive(Debug, Clone)]
pub struct DistanceTransformWatershed {
  settings: Settings,
  chamfer: Option<ChamferMask>,
  normalize: bool,
  distance_kind: DistanceKind,
}

impl DistanceTransformWatershed {
  fn chamfer(&self, shape: Shape) -> ChamferMask {
    match &self.chamfer {
      Some(mask) => mask.clone(),
      None if shape.is_planar() => ChamferWeights::Borgefors.mask(),
      None => ChamferWeights::Borgefors3D.mask(),
    }
  }

  fn segment_typed<T: Sample, W: DistanceValue>(
    &self,
    image: &Grid<T>,
    mask: Option<&Grid<u8>>,
    control: &Control,
  ) -> WsResult<Outcome<Segmentation>> {
    let shape = image.shape();
    if let Some(mask) = mask {
      image.ensure_same_shape(mask)?;
    }
    let chamfer = self.chamfer(shape);
    let distances = complete_or_return!(distance_map::<T, W>(
      image,
      &chamfer,
      Sources::Background,
      self.normalize,
      control
    )?);

    //Particle centres become the deepest points of the relief
    let top = distances.max_finite().unwrap_or_else(W::zero);
    let relief = distances.grid.map(|&d| {
      if d == W::UNREACHABLE {
        W::zero()
      } else {
        top.saturating_offset(-d.key())
      }
    });
    //Only the particles inside the supplied mask are flooded
    let mut foreground = image.foreground();
    if let Some(mask) = mask {
      for (f, &m) in foreground.as_slice_mut().iter_mut().zip(mask.as_slice()) {
        if m == 0 {
          *f = 0;
        }
      }
    }
    flood_from_minima(&relief, Some(&foreground), &self.settings, distances.warnings, control)
  }
}

impl Segmenter for DistanceTransformWatershed {
  fn segment(
    &self,
    input: &SegmentationInput,
    control: &Control,
  ) -> WsResult<Outcome<Segmentation>> {
    if input.markers.is_some() {
      log::debug!("distance transform watershed ignores the supplied markers");
    }
    let mask = input.mask.as_ref();
    match self.distance_kind {
      DistanceKind::U16 => {
        with_sample_grid!(&input.image, grid => self.segment_typed::<_, u16>(grid, mask, control))
      }
      DistanceKind::I32 => {
        with_sample_grid!(&input.image, grid => self.segment_typed::<_, i32>(grid, mask, control))
      }
      DistanceKind::F32 => {
        with_sample_grid!(&input.image, grid => self.segment_typed::<_, f32>(grid, mask, control))
      }
    }
  }

  fn name(&self) -> &'static str {
    "distance transform watershed"
  }
}
