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

//! Background execution of a pipeline.
//!
//! [`spawn`] moves the input onto the rayon global pool and returns at once.
//! The caller keeps a [`SegmentationTask`] handle through which it can follow
//! progress events, cancel the run, and collect the result.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use crate::control::{CancelToken, ChannelMonitor, Control, Event};
use crate::error::{Outcome, WatershedError, WsResult};
use crate::pipeline::{Segmentation, SegmentationInput, Segmenter};

type TaskResult = WsResult<Outcome<Segmentation>>;

/// Handle to a pipeline invocation running on the rayon pool
#[derive(Debug)]
pub struct SegmentationTask {
  cancel: CancelToken,
  events: mpsc::Receiver<Event>,
  result: mpsc::Receiver<TaskResult>,
}

impl SegmentationTask {
  /// Asks the worker to stop at its next checkpoint. The task then completes
  /// with `Outcome::Cancelled`.
  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  /// Progress and stage events, in the order the worker emitted them
  pub fn events(&self) -> &mpsc::Receiver<Event> {
    &self.events
  }

  /// Waits at most `timeout` for the result. Returns the task itself if the
  /// worker has not finished yet.
  pub fn wait_timeout(self, timeout: Duration) -> Result<TaskResult, Self> {
    match self.result.recv_timeout(timeout) {
      Ok(result) => Ok(result),
      Err(mpsc::RecvTimeoutError::Timeout) => Err(self),
      Err(mpsc::RecvTimeoutError::Disconnected) => Ok(Err(worker_lost())),
    }
  }

  /// Blocks until the worker has finished. A worker that panicked yields
  /// `WatershedError::TaskFailed`.
  pub fn wait(self) -> TaskResult {
    self.result.recv().unwrap_or_else(|_| Err(worker_lost()))
  }
}

fn worker_lost() -> WatershedError {
  WatershedError::TaskFailed("the worker exited without a result".to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}

/// Runs `segmenter` on `input` on the rayon global pool.
///
/// The input is owned by the worker for the duration of the run. Events are
/// buffered in an unbounded channel, so a caller that never reads them does not
/// stall the worker.
pub fn spawn(
  segmenter: impl Into<Arc<dyn Segmenter + Send + Sync>>,
  input: SegmentationInput,
) -> SegmentationTask {
  let segmenter = segmenter.into();
  let cancel = CancelToken::new();
  let (event_tx, events) = mpsc::channel();
  let (result_tx, result) = mpsc::channel();

  let token = cancel.clone();
  rayon::spawn(move || {
    let control = Control::new().with_cancel_token(token).with_monitor(ChannelMonitor(event_tx));
    log::debug!("running {} on a {} grid", segmenter.name(), input.image.shape());
    //rayon aborts the process on a panic that escapes the closure
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| segmenter.segment(&input, &control)))
      .unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        log::error!("{} panicked: {message}", segmenter.name());
        Err(WatershedError::TaskFailed(message))
      });
    //The caller may have dropped the handle
    let _ = result_tx.send(outcome);
  });

  SegmentationTask { cancel, events, result }
}
