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

//! Errors, warnings and outcomes shared by all engines.
//!
//! Hard failures are reported through [`WatershedError`]. They are always caller
//! errors (mismatched shapes, malformed chamfer masks, bad parameters) or an
//! allocation that cannot be satisfied. Expected results of legitimate input,
//! like a cancelled run or a distance map with unreachable voxels, are *not*
//! errors: they are returned as [`Outcome::Cancelled`] or as a [`Warning`]
//! attached to the result.

use crate::grid::Shape;
use thiserror::Error;

/// Errors that abort an engine invocation before any output is produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WatershedError {
  /// Two grids handed to a joint operation differ in width, height or depth.
  #[error("shape mismatch: expected {expected}, found {found}")]
  ShapeMismatch { expected: Shape, found: Shape },

  /// A chamfer mask failed validation.
  #[error("invalid chamfer mask: {0}")]
  InvalidMask(String),

  /// The grid cannot be allocated. `available` is the addressable limit in
  /// bytes if the request was rejected up front, or `None` if the allocator
  /// itself refused.
  #[error("cannot allocate {requested} bytes (limit: {})", fmt_limit(.available))]
  ResourceExhaustion { requested: usize, available: Option<usize> },

  /// A parameter is outside of its valid range.
  #[error("invalid parameter: {0}")]
  InvalidParameter(String),

  /// A background task panicked or vanished without publishing a result.
  #[error("segmentation task failed: {0}")]
  TaskFailed(String),
}

fn fmt_limit(limit: &Option<usize>) -> String {
  match limit {
    Some(bytes) => format!("{bytes} bytes"),
    None => "allocator refused".to_string(),
  }
}

/// Result type used throughout this crate
pub type WsResult<T> = Result<T, WatershedError>;

/// Result of an engine run that honours cooperative cancellation.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum Outcome<T> {
  /// The stage ran to completion
  Complete(T),
  /// The cancel token was raised before the stage completed. No partial
  /// result is published.
  Cancelled,
}

impl<T> Outcome<T> {
  /// Returns the completed value, or `None` if the run was cancelled
  pub fn complete(self) -> Option<T> {
    match self {
      Outcome::Complete(value) => Some(value),
      Outcome::Cancelled => None,
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Outcome::Cancelled)
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
    match self {
      Outcome::Complete(value) => Outcome::Complete(f(value)),
      Outcome::Cancelled => Outcome::Cancelled,
    }
  }
}

/// Unwraps an `Outcome`, returning `Ok(Outcome::Cancelled)` from the enclosing
/// function if the stage was cancelled.
macro_rules! complete_or_return {
  ($outcome:expr) => {
    match $outcome {
      $crate::error::Outcome::Complete(value) => value,
      $crate::error::Outcome::Cancelled => return Ok($crate::error::Outcome::Cancelled),
    }
  };
}
pub(crate) use complete_or_return;

/// Data-quality warnings. These never abort a run; they are attached to the
/// result and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Warning {
  /// The distance transform had no source voxels: every other voxel holds the
  /// "infinity" sentinel of the output type.
  NoSources,
  /// `count` voxels that should have been reached were not, because they are
  /// disconnected from every source or marker. Distances there hold the
  /// sentinel; labels there stay 0.
  Unreachable { count: usize },
  /// A finite distance exceeded the range of the integer output type and was
  /// clamped just below the sentinel.
  Saturated,
  /// The calibration is not isotropic; distances were scaled with the x spacing.
  AnisotropicSpacing,
}

impl std::fmt::Display for Warning {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Warning::NoSources => write!(f, "no source voxels, all distances are infinite"),
      Warning::Unreachable { count } => {
        write!(f, "{count} voxels are not connected to any source")
      }
      Warning::Saturated => write!(f, "distances saturated the integer output type"),
      Warning::AnisotropicSpacing => {
        write!(f, "anisotropic spacing, distances scaled with the x spacing only")
      }
    }
  }
}

/// Emits a warning through the `log` facade and pushes it onto `warnings`
pub(crate) fn raise(warnings: &mut Vec<Warning>, warning: Warning) {
  log::warn!("{warning}");
  if !warnings.contains(&warning) {
    warnings.push(warning);
  }
}
