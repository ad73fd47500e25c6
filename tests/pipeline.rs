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

use std::time::Duration;

use ndarray as nd;
use rustronomy_segmentation::prelude::*;

/// Two overlapping disks of radius 8, 14 pixels apart
fn two_disks() -> Grid<u8> {
  let img = nd::Array2::from_shape_fn((21, 41), |(y, x)| {
    let inside = |cx: f64| (x as f64 - cx).powi(2) + (y as f64 - 10.0).powi(2) <= 64.0;
    if inside(13.0) || inside(27.0) {
      FOREGROUND
    } else {
      0
    }
  });
  Grid::from_array2(img)
}

/// Two V-shaped valleys with their bottoms at x = 5 and x = 15
fn two_valleys() -> Grid<f32> {
  let img = nd::Array2::from_shape_fn((11, 21), |(_, x)| {
    let x = x as f32;
    (x - 5.0).abs().min((x - 15.0).abs())
  });
  Grid::from_array2(img)
}

fn complete(outcome: WsResult<Outcome<Segmentation>>) -> Segmentation {
  outcome.unwrap().complete().unwrap()
}

#[test]
fn distance_transform_splits_touching_disks() {
  let image = two_disks();
  for kind in [DistanceKind::F32, DistanceKind::U16, DistanceKind::I32] {
    let watershed = SegmentationBuilder::new_distance_transform()
      .set_dynamic(2.0)
      .set_distance_kind(kind)
      .build()
      .unwrap();
    let segmentation =
      complete(watershed.segment(&SegmentationInput::new(image.clone()), &Control::new()));
    assert_eq!(segmentation.label_count, 2, "{kind:?}");
    assert_eq!(segmentation.labels.get(13, 10, 0), Some(1));
    assert_eq!(segmentation.labels.get(27, 10, 0), Some(2));
    //Background stays 0
    assert_eq!(segmentation.labels.get(0, 0, 0), Some(0));
    assert!(segmentation.warnings.is_empty());
  }
}

#[test]
fn distance_transform_respects_the_input_mask() {
  let image = two_disks();
  let mask = Grid::from_array2(nd::Array2::from_shape_fn((21, 41), |(_, x)| {
    if x < 20 {
      FOREGROUND
    } else {
      0
    }
  }));
  let watershed = SegmentationBuilder::new_distance_transform().set_dynamic(2.0).build().unwrap();
  let input = SegmentationInput::new(image).with_mask(mask);
  let segmentation = complete(watershed.segment(&input, &Control::new()));
  assert_eq!(segmentation.label_count, 1);
  assert_eq!(segmentation.labels.get(13, 10, 0), Some(1));
  assert_eq!(segmentation.labels.get(19, 10, 0), Some(1));
  assert_eq!(segmentation.labels.get(27, 10, 0), Some(0));
  assert!(segmentation.warnings.is_empty());

  let small = Grid::<u8>::zeros(Shape::new_2d(4, 4)).unwrap();
  let input = SegmentationInput::new(two_disks()).with_mask(small);
  assert!(matches!(
    watershed.segment(&input, &Control::new()),
    Err(WatershedError::ShapeMismatch { .. })
  ));
}

#[test]
fn morphological_segmentation_finds_both_valleys() {
  let watershed = SegmentationBuilder::new_morphological().set_dynamic(1.0).build().unwrap();
  let input = SegmentationInput::new(two_valleys());
  let segmentation = complete(watershed.segment(&input, &Control::new()));
  assert_eq!(segmentation.label_count, 2);
  for y in 0..11 {
    assert_eq!(segmentation.labels.get(5, y, 0), Some(1));
    assert_eq!(segmentation.labels.get(15, y, 0), Some(2));
    assert_eq!(segmentation.labels.get(10, y, 0), Some(0));
  }
  assert!(segmentation.report.time_in(Stage::Flooding) <= segmentation.report.total());
}

#[test]
fn gradient_segmentation_separates_flat_regions() {
  //A bright square on a dark background: the gradient is zero inside both
  let mut img = nd::Array2::<u8>::zeros((16, 16));
  img.slice_mut(nd::s![4..12, 4..12]).fill(200);
  let watershed = SegmentationBuilder::new_morphological()
    .set_gradient(true)
    .set_connectivity(Connectivity::C8)
    .set_dynamic(10.0)
    .build()
    .unwrap();
  let segmentation =
    complete(watershed.segment(&SegmentationInput::new(Grid::from_array2(img)), &Control::new()));
  assert_eq!(segmentation.label_count, 2);
  let outside = segmentation.labels.get(0, 0, 0).unwrap();
  let inside = segmentation.labels.get(8, 8, 0).unwrap();
  assert!(outside != 0 && inside != 0 && outside != inside);
}

#[test]
fn marker_controlled_from_points() {
  let image = Grid::<u16>::zeros(Shape::new_2d(10, 10)).unwrap();
  let input =
    SegmentationInput::new(image).with_markers(Markers::Points(vec![[0, 0, 0], [9, 9, 0]]));
  let watershed = SegmentationBuilder::new_marker_controlled().build().unwrap();
  let segmentation = complete(watershed.segment(&input, &Control::new()));
  assert_eq!(segmentation.label_count, 2);
  assert_eq!(segmentation.labels.get(4, 5, 0), Some(DAM));
  assert_eq!(segmentation.labels.get(0, 1, 0), Some(1));
  assert_eq!(segmentation.labels.get(9, 8, 0), Some(2));
}

#[test]
fn marker_controlled_from_marker_mask() {
  let image = two_valleys();
  let mut markers = Grid::<u8>::zeros(image.shape()).unwrap();
  for y in 0..11 {
    *markers.get_mut(5, y, 0).unwrap() = FOREGROUND;
    *markers.get_mut(15, y, 0).unwrap() = FOREGROUND;
  }
  let input = SegmentationInput::new(image).with_markers(Markers::Mask(markers));
  let watershed = SegmentationBuilder::new_marker_controlled().set_dams(false).build().unwrap();
  let segmentation = complete(watershed.segment(&input, &Control::new()));
  assert_eq!(segmentation.label_count, 2);
  assert!(segmentation.labels.as_slice().iter().all(|&l| l == 1 || l == 2));
}

#[test]
fn marker_controlled_needs_markers() {
  let watershed = SegmentationBuilder::new_marker_controlled().build().unwrap();
  let input = SegmentationInput::new(two_valleys());
  assert!(matches!(
    watershed.segment(&input, &Control::new()),
    Err(WatershedError::InvalidParameter(_))
  ));

  let markers = Grid::<u32>::zeros(Shape::new_2d(3, 3)).unwrap();
  let input = SegmentationInput::new(two_valleys()).with_markers(Markers::Labels(markers));
  assert!(matches!(
    watershed.segment(&input, &Control::new()),
    Err(WatershedError::ShapeMismatch { .. })
  ));
}

#[test]
fn builder_validates_options() {
  assert!(SegmentationBuilder::new_morphological().set_dynamic(-1.0).build().is_err());
  assert!(SegmentationBuilder::new_morphological().set_dynamic(f64::NAN).build().is_err());
  assert!(SegmentationBuilder::new_marker_controlled().set_max_level(f64::NAN).build().is_err());
  let watershed = SegmentationBuilder::new_distance_transform()
    .set_chamfer_mask(ChamferWeights::ChessKnight)
    .set_normalize(false)
    .build()
    .unwrap();
  assert_eq!(watershed.name(), "distance transform watershed");
}

#[test]
fn cancelled_pipeline_publishes_nothing() {
  let watershed = SegmentationBuilder::new_distance_transform().build().unwrap();
  let token = CancelToken::new();
  token.cancel();
  let control = Control::new().with_cancel_token(token);
  let outcome = watershed.segment(&SegmentationInput::new(two_disks()), &control).unwrap();
  assert!(outcome.is_cancelled());
}

#[test]
fn task_runs_in_the_background() {
  let watershed = SegmentationBuilder::new_distance_transform().set_dynamic(2.0).build().unwrap();
  let task = spawn(watershed, SegmentationInput::new(two_disks()));
  let segmentation = task.wait().unwrap().complete().unwrap();
  assert_eq!(segmentation.label_count, 2);
  assert!(segmentation.report.steps_in(Stage::Flooding) > 0);
}

#[test]
fn task_streams_stage_events() {
  let watershed = SegmentationBuilder::new_morphological().set_dynamic(1.0).build().unwrap();
  let task = spawn(watershed, SegmentationInput::new(two_valleys()));
  let token = task.cancel_token();
  //The channel closes once the worker is done
  let receiver_events: Vec<Event> = task.events().iter().collect();
  assert!(!token.is_cancelled());
  let segmentation = task.wait().unwrap().complete().unwrap();
  assert_eq!(segmentation.label_count, 2);

  let finished: Vec<Stage> = receiver_events
    .iter()
    .filter_map(|e| match e {
      Event::StageFinished { stage, .. } => Some(*stage),
      _ => None,
    })
    .collect();
  assert_eq!(
    finished,
    vec![
      Stage::Reconstruction,
      Stage::RegionalExtrema,
      Stage::Labelling,
      Stage::Reconstruction,
      Stage::Flooding
    ]
  );
}

/// Spins until its run is cancelled
struct UntilCancelled;

impl Segmenter for UntilCancelled {
  fn segment(&self, _: &SegmentationInput, control: &Control) -> WsResult<Outcome<Segmentation>> {
    while !control.is_cancelled() {
      std::thread::sleep(Duration::from_millis(1));
    }
    Ok(Outcome::Cancelled)
  }

  fn name(&self) -> &'static str {
    "until cancelled"
  }
}

/// Panics on every run
struct Failing;

impl Segmenter for Failing {
  fn segment(&self, _: &SegmentationInput, _: &Control) -> WsResult<Outcome<Segmentation>> {
    panic!("segmenter failed on purpose")
  }

  fn name(&self) -> &'static str {
    "failing"
  }
}

#[test]
fn task_can_be_cancelled_while_waiting() {
  let segmenter: Box<dyn Segmenter + Send + Sync> = Box::new(UntilCancelled);
  let task = spawn(segmenter, SegmentationInput::new(two_valleys()));

  //Still running: the handle comes back
  let task = match task.wait_timeout(Duration::from_millis(20)) {
    Ok(_) => panic!("task finished before it was cancelled"),
    Err(task) => task,
  };
  task.cancel();
  let result = match task.wait_timeout(Duration::from_secs(60)) {
    Ok(result) => result,
    Err(_) => panic!("cancelled task did not finish"),
  };
  assert_eq!(result, Ok(Outcome::Cancelled));
}

#[test]
fn panicking_task_reports_failure() {
  let segmenter: Box<dyn Segmenter + Send + Sync> = Box::new(Failing);
  let task = spawn(segmenter, SegmentationInput::new(two_valleys()));
  match task.wait() {
    Err(WatershedError::TaskFailed(message)) => assert!(message.contains("on purpose")),
    other => panic!("expected a task failure, got {other:?}"),
  }
}
