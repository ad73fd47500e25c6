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

//! Cooperative cancellation, progress reporting and stage timing.
//!
//! Every engine takes a [`Control`]. Engines poll its [`CancelToken`] at each
//! queue pop / fill step (flooding, extrema, reconstruction) or once per row
//! (raster sweeps), and report progress to an optional [`Monitor`] at coarse
//! checkpoints. Stage durations are measured with the monotonic
//! `std::time::Instant` clock and collected in a [`PerfReport`].

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

/// Progress is reported once every `PROGRESS_INTERVAL` queue pops / fill steps
pub const PROGRESS_INTERVAL: usize = 4096;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::Relaxed);
  }

  #[inline(always)]
  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Relaxed)
  }
}

/// Pipeline stages, as reported to monitors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
  Gradient,
  DistanceForward,
  DistanceBackward,
  GeodesicSweep,
  RegionalExtrema,
  Reconstruction,
  Labelling,
  Flooding,
}

impl std::fmt::Display for Stage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      Stage::Gradient => "gradient",
      Stage::DistanceForward => "distance (forward pass)",
      Stage::DistanceBackward => "distance (backward pass)",
      Stage::GeodesicSweep => "geodesic distance",
      Stage::RegionalExtrema => "regional extrema",
      Stage::Reconstruction => "reconstruction",
      Stage::Labelling => "labelling",
      Stage::Flooding => "flooding",
    })
  }
}

/// Checkpoint notifications
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
  /// `done` out of `total` units of `stage` are processed
  Progress { stage: Stage, done: usize, total: usize },
  /// `stage` completed after `elapsed`
  StageFinished { stage: Stage, elapsed: Duration },
}

/// Receiver of checkpoint notifications. Implemented for closures.
pub trait Monitor {
  fn notify(&self, event: &Event);
}

impl<F: Fn(&Event)> Monitor for F {
  fn notify(&self, event: &Event) {
    self(event)
  }
}

/// Forwards every event over a channel. Events sent after the receiver hung up
/// are dropped.
#[derive(Debug, Clone)]
pub struct ChannelMonitor(pub mpsc::Sender<Event>);

impl Monitor for ChannelMonitor {
  fn notify(&self, event: &Event) {
    let _ = self.0.send(event.clone());
  }
}

#[cfg(feature = "progress")]
/// Draws an `indicatif` progress bar for the running stage
pub struct ProgressBarMonitor {
  bar: indicatif::ProgressBar,
}

#[cfg(feature = "progress")]
impl ProgressBarMonitor {
  pub fn new() -> Self {
    const TEMPLATE: &str = "{spinner}[{elapsed}] {msg} {pos}/{len}{bar:60}";
    let bar = indicatif::ProgressBar::new(0);
    if let Ok(style) = indicatif::ProgressStyle::with_template(TEMPLATE) {
      bar.set_style(style);
    }
    ProgressBarMonitor { bar }
  }
}

#[cfg(feature = "progress")]
impl Default for ProgressBarMonitor {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(feature = "progress")]
impl Monitor for ProgressBarMonitor {
  fn notify(&self, event: &Event) {
    match event {
      Event::Progress { stage, done, total } => {
        self.bar.set_message(stage.to_string());
        self.bar.set_length(*total as u64);
        self.bar.set_position(*done as u64);
      }
      Event::StageFinished { stage, elapsed } => {
        self.bar.println(format!("{stage} finished in {:.1}ms", elapsed.as_secs_f64() * 1e3));
      }
    }
  }
}

////////////////////////////////////////////////////////////////////////////////
//                            PERFORMANCE REPORT                              //
////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, PartialEq)]
pub struct StageTiming {
  pub stage: Stage,
  pub elapsed: Duration,
  /// queue pops, fill steps or rows processed, if the stage counts them
  pub steps: usize,
}

/// Per-stage wall-clock timings of one invocation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PerfReport {
  pub stages: Vec<StageTiming>,
}

impl PerfReport {
  pub fn total(&self) -> Duration {
    self.stages.iter().map(|s| s.elapsed).sum()
  }

  /// Total time spent in `stage`
  pub fn time_in(&self, stage: Stage) -> Duration {
    self.stages.iter().filter(|s| s.stage == stage).map(|s| s.elapsed).sum()
  }

  pub fn steps_in(&self, stage: Stage) -> usize {
    self.stages.iter().filter(|s| s.stage == stage).map(|s| s.steps).sum()
  }
}

impl std::fmt::Display for PerfReport {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    writeln!(f, ">---------[Performance Summary]---------")?;
    for timing in &self.stages {
      writeln!(
        f,
        ">  {}: {:.1}ms ({} steps)",
        timing.stage,
        timing.elapsed.as_secs_f64() * 1e3,
        timing.steps
      )?;
    }
    writeln!(f, ">--------------------------------+ total")?;
    writeln!(f, ">  {:.1}ms", self.total().as_secs_f64() * 1e3)
  }
}

////////////////////////////////////////////////////////////////////////////////
//                                 CONTROL                                    //
////////////////////////////////////////////////////////////////////////////////

/// Per-invocation cancellation, monitoring and timing state.
///
/// A `Control` is owned by the thread running the invocation. Share the
/// [`CancelToken`] (not the `Control`) with other threads.
#[derive(Default)]
pub struct Control {
  cancel: CancelToken,
  monitor: Option<Box<dyn Monitor + Send>>,
  report: RefCell<PerfReport>,
  pending_steps: RefCell<usize>,
}

impl Control {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
    self.cancel = token;
    self
  }

  pub fn with_monitor(mut self, monitor: impl Monitor + Send + 'static) -> Self {
    self.monitor = Some(Box::new(monitor));
    self
  }

  pub fn cancel_token(&self) -> &CancelToken {
    &self.cancel
  }

  #[inline(always)]
  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  pub fn progress(&self, stage: Stage, done: usize, total: usize) {
    if let Some(monitor) = &self.monitor {
      monitor.notify(&Event::Progress { stage, done, total });
    }
  }

  /// Runs `f` as `stage`, recording its duration and notifying the monitor
  pub fn stage<R>(&self, stage: Stage, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    let steps = self.pending_steps.replace(0);
    log::debug!("{stage} took {:.1}ms", elapsed.as_secs_f64() * 1e3);
    self.report.borrow_mut().stages.push(StageTiming { stage, elapsed, steps });
    if let Some(monitor) = &self.monitor {
      monitor.notify(&Event::StageFinished { stage, elapsed });
    }
    result
  }

  /// Timings recorded so far
  pub fn report(&self) -> PerfReport {
    self.report.borrow().clone()
  }

  pub(crate) fn ticker(&self, stage: Stage, total: usize) -> Ticker<'_> {
    Ticker { control: self, stage, total, done: 0 }
  }
}

impl std::fmt::Debug for Control {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Control")
      .field("cancel", &self.cancel)
      .field("monitor", &self.monitor.is_some())
      .field("report", &self.report)
      .finish()
  }
}

/// Step counter for queue- and fill-driven stages
pub(crate) struct Ticker<'a> {
  control: &'a Control,
  stage: Stage,
  total: usize,
  done: usize,
}

impl Ticker<'_> {
  /// Counts one step. Returns `true` if the invocation was cancelled.
  #[inline(always)]
  pub fn tick(&mut self) -> bool {
    self.done += 1;
    if self.done % PROGRESS_INTERVAL == 0 {
      self.control.progress(self.stage, self.done, self.total.max(self.done));
    }
    self.control.is_cancelled()
  }

  /// Reports final progress and hands the step count to the enclosing stage
  pub fn finish(self) {
    self.control.progress(self.stage, self.done, self.total.max(self.done));
    *self.control.pending_steps.borrow_mut() += self.done;
  }
}
