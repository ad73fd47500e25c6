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

//! Priority queue shared by the flooding and reconstruction engines.
//!
//! Entries pop in increasing priority. Entries with equal priority pop in
//! insertion order: every push draws a fresh sequence number from a counter
//! owned by the queue, so the pop order never depends on how the heap happens
//! to arrange equal keys.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{WatershedError, WsResult};

/// A queued voxel
#[derive(Debug, Clone, Copy)]
pub struct QueueEntry {
  /// Grid value (flooding) or reconstructed value (reconstruction)
  pub priority: f64,
  /// Insertion sequence, only used to break ties
  pub seq: u64,
  /// Flat raster index of the voxel
  pub index: usize,
  /// Label carried by the entry, 0 if the engine does not label
  pub label: u32,
}

impl PartialEq for QueueEntry {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for QueueEntry {
  //BinaryHeap is a max-heap, so "greater" means "pops first": lower priority,
  //then lower sequence number.
  fn cmp(&self, other: &Self) -> Ordering {
    other.priority.total_cmp(&self.priority).then_with(|| other.seq.cmp(&self.seq))
  }
}

/// Min-priority queue with FIFO tie breaking
#[derive(Debug, Default)]
pub struct FloodQueue {
  heap: BinaryHeap<QueueEntry>,
  next_seq: u64,
}

impl FloodQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reserves room for `capacity` entries up front. Fails with
  /// `ResourceExhaustion` instead of aborting if the reservation is refused.
  pub fn with_capacity(capacity: usize) -> WsResult<Self> {
    let mut heap = BinaryHeap::new();
    heap.try_reserve(capacity).map_err(|_| WatershedError::ResourceExhaustion {
      requested: capacity.saturating_mul(std::mem::size_of::<QueueEntry>()),
      available: None,
    })?;
    Ok(FloodQueue { heap, next_seq: 0 })
  }

  pub fn push(&mut self, priority: f64, index: usize, label: u32) {
    let seq = self.next_seq;
    self.next_seq += 1;
    self.heap.push(QueueEntry { priority, seq, index, label });
  }

  pub fn pop(&mut self) -> Option<QueueEntry> {
    self.heap.pop()
  }

  pub fn len(&self) -> usize {
    self.heap.len()
  }

  pub fn is_empty(&self) -> bool {
    self.heap.is_empty()
  }

  /// Total number of pushes so far
  pub fn pushed(&self) -> u64 {
    self.next_seq
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn lowest_priority_first_then_fifo() {
    let mut queue = FloodQueue::new();
    queue.push(2.0, 0, 1);
    queue.push(1.0, 1, 1);
    queue.push(2.0, 2, 2);
    queue.push(1.0, 3, 2);
    queue.push(f64::NAN, 4, 3);
    queue.push(-0.5, 5, 3);
    let order: Vec<usize> = std::iter::from_fn(|| queue.pop()).map(|e| e.index).collect();
    assert_eq!(order, vec![5, 1, 3, 0, 2, 4]);
    assert_eq!(queue.pushed(), 6);
  }

  #[test]
  fn impossible_reservation_is_an_error() {
    assert!(matches!(
      FloodQueue::with_capacity(usize::MAX),
      Err(WatershedError::ResourceExhaustion { available: None, .. })
    ));
    let queue = FloodQueue::with_capacity(64).unwrap();
    assert!(queue.is_empty());
  }
}
