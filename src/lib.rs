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

#![doc(
  html_logo_url = "https://raw.githubusercontent.com/smups/rustronomy/main/logos/Rustronomy_ferris.png?raw=true"
)]
//! Rustronomy-segmentation is a pure-rust implementation of marker-controlled
//! watershed segmentation (see Beucher & Meyer, 1993[^1]) for 2D images and 3D
//! volumes.
//!
//! # Features
//! The crate is built from three engines that can be used on their own or
//! chained into a complete pipeline:
//! 1. *chamfer distance transforms* of binary and label grids, including a
//! geodesic variant that measures distances inside a mask (see [`distance`]).
//! 2. *regional and extended extrema*, morphological reconstruction and the
//! imposition of markers as the only minima of a grid (see [`extrema`]).
//! 3. *marker-controlled flooding* with optional watershed lines (see
//! [`flooding`]).
//!
//! Connected-component labelling of marker masks and a parallel morphological
//! gradient are included to prepare inputs for the flooding stage. Additional
//! functionality can be accessed via cargo feature gates. A list of all
//! additional features [can be found below](#cargo-feature-gates).
//!
//! # Quickstart
//! To use the latest release of rustronomy-segmentation in a cargo project, add
//! the rustronomy-segmentation crate as a dependency to your `Cargo.toml` file:
//! ```toml
//! [dependencies]
//! rustronomy-segmentation = "0.1.0"
//! ```
//! If you want to use the latest (unstable) development version of
//! rustronomy-segmentation, you can do so by using the `git` field (which
//! fetches the latest version from the repo) rather than the `version` field
//! (which downloads the latest released version from crates.io).
//! ```text
//! {git = "https://github.com/smups/rustronomy-segmentation"}
//! ```
//!
//! ## Short example: segmenting a random field
//! `rustronomy-segmentation` uses the "builder pattern" to configure a pipeline
//! before executing it. Create a `SegmentationBuilder`, set the options you
//! need and call `build()` to obtain a (`Sync`&`Send`) segmenter object, which
//! can then be used to segment any number of images.
//! ```rust
//! use ndarray as nd;
//! use ndarray_rand::{rand_distr::Uniform, RandomExt};
//! use rustronomy_segmentation::prelude::*;
//!
//! //Create a random uniform field
//! let rf = nd::Array2::<u8>::random((128, 128), Uniform::new(0, 254));
//! //Set-up the pipeline: flood from all minima that are at least 20 deep
//! let watershed = SegmentationBuilder::new_morphological().set_dynamic(20.0).build().unwrap();
//! //Execute the pipeline
//! let input = SegmentationInput::new(Grid::from_array2(rf));
//! let output = watershed.segment(&input, &Control::new()).unwrap();
//! if let Outcome::Complete(segmentation) = output {
//!   println!("found {} basins", segmentation.label_count);
//! }
//! ```
//! Long running pipelines can be moved to the rayon pool with [`task::spawn`],
//! which returns a handle that streams progress events and can be cancelled.
//!
//! [^1]: S. Beucher and F. Meyer. **The morphological approach to segmentation: the watershed transformation.** *In Mathematical Morphology in Image Processing*, 1993.
//!
//! # Cargo feature gates
//! *By default, all features behind cargo feature gates are **disabled***
//! - `jemalloc`: this feature enables the [jemalloc allocator](https://jemalloc.net).
//! From the jemalloc website: *"jemalloc is a general purpose `malloc`(3)
//! implementation that emphasizes fragmentation avoidance and scalable concurrency
//! support."*. Jemalloc is enabled though usage of the `jemalloc` crate, which
//! increases compile times considerably. To compile `rustronomy-segmentation`
//! with the `jemalloc` feature, jemalloc must be installed on the host system.
//! - `progress`: this feature adds the `ProgressBarMonitor`, which draws a
//! progress bar for the running stage. Enabling this feature adds the `indicatif`
//! crate as a dependency, which should not considerably slow down compile times.
//! - `debug`: this feature prints a performance summary after every pipeline
//! run. Enabling this feature does not add additional dependencies.
//!
//! # Logging
//! All engines log through the [`log`](https://docs.rs/log) facade: stage
//! timings and counts at `debug` level, data-quality warnings at `warn` level.
//! Install any `log` compatible logger to see them.

//Set Jemalloc as the global allocator for this crate
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

pub mod chamfer;
pub mod connectivity;
pub mod control;
pub mod distance;
pub mod error;
pub mod extrema;
pub mod flooding;
pub mod gradient;
pub mod grid;
pub mod labelling;
pub mod pipeline;
pub mod queue;
pub mod reconstruction;
pub mod task;

//Utility prelude for batch import
pub mod prelude {
  pub use crate::chamfer::{ChamferMask, ChamferOffset, ChamferWeights};
  pub use crate::connectivity::Connectivity;
  #[cfg(feature = "progress")]
  pub use crate::control::ProgressBarMonitor;
  pub use crate::control::{CancelToken, ChannelMonitor, Control, Event, Monitor, PerfReport, Stage};
  pub use crate::distance::{
    distance_map, geodesic_distance_map, label_distance_map, DistanceMap, DistanceValue, Sources,
  };
  pub use crate::error::{Outcome, Warning, WatershedError, WsResult};
  pub use crate::extrema::{
    extended_maxima, extended_minima, impose_maxima, impose_minima, regional_maxima,
    regional_minima,
  };
  pub use crate::flooding::{flood, FloodOptions, Flooded, DAM};
  pub use crate::gradient::morphological_gradient;
  pub use crate::grid::{Calibration, Grid, Sample, SampleGrid, SampleType, Shape, FOREGROUND};
  pub use crate::labelling::{
    distinct_labels, label_components, rasterise_markers, relabel_sequential, Labelled,
  };
  pub use crate::pipeline::{
    DistanceKind, Markers, Segmentation, SegmentationBuilder, SegmentationInput, Segmenter,
  };
  pub use crate::reconstruction::{reconstruct_by_dilation, reconstruct_by_erosion};
  pub use crate::task::{spawn, SegmentationTask};
}
