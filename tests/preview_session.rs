mod common;

use std::sync::Arc;
use std::thread;

use image::Rgba;
use paintfe_preview::effects::BrightnessContrast;
use paintfe_preview::{
    LiveEffect, PreviewError, PreviewEvent, PreviewHost, RectI, RenderStatus, SelectionMask,
};

use common::*;

const GRAY: Rgba<u8> = Rgba([100, 100, 100, 255]);
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

#[test]
fn single_worker_reports_every_ninth_then_completes() {
    let mut doc = document(300, 300, GRAY);
    let mut mgr = manager(1, 128);
    let control = mgr.start(Arc::new(LiveEffect::new(Fill(RED))), &doc).unwrap();

    let events = wait_render_finished(&mut mgr, &mut doc);
    assert!(matches!(
        events.first(),
        Some(PreviewEvent::Started { bounds, .. }) if *bounds == RectI::new(0, 0, 300, 300)
    ));
    let expected: Vec<f64> = (1..=9).map(|i| i as f64 / 9.0).collect();
    assert_eq!(progress_fractions(&events), expected);
    assert_eq!(mgr.progress(), 1.0);

    control.request_apply();
    let events = mgr.wait_until_ended(&mut doc, WAIT).unwrap();
    // Workers were idle, so finalization was immediate.
    assert!(!events.iter().any(|e| matches!(e, PreviewEvent::Finalizing { .. })));
    assert_eq!(
        events.last(),
        Some(&PreviewEvent::Ended {
            status: RenderStatus::Completed,
            errors: Vec::new()
        })
    );
    assert_eq!(doc.canvas.layers[0].pixels.get_pixel(299, 299), &RED);
    assert_eq!(doc.history.undo_description().as_deref(), Some("Fill"));
    assert!(!mgr.is_active());
}

#[test]
fn failing_tile_is_reported_and_siblings_still_render() {
    let mut doc = document(300, 300, GRAY);
    let mut mgr = manager(2, 128);
    let effect = FailingTile {
        fail_index: 4,
        tile: 128,
        columns: 3,
        color: RED,
    };
    let control = mgr.start(Arc::new(LiveEffect::new(effect)), &doc).unwrap();

    let events = wait_render_finished(&mut mgr, &mut doc);
    assert_eq!(progress_fractions(&events).len(), 9);
    let finished_errors = events
        .iter()
        .find_map(|e| match e {
            PreviewEvent::RenderFinished { errors, .. } => Some(errors.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(finished_errors.len(), 1);
    assert_eq!(finished_errors[0].tile_index, 4);
    assert_eq!(finished_errors[0].bounds, RectI::new(128, 128, 128, 128));

    control.request_apply();
    let events = mgr.wait_until_ended(&mut doc, WAIT).unwrap();
    match events.last() {
        Some(PreviewEvent::Ended { status, errors }) => {
            assert_eq!(*status, RenderStatus::Error);
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].tile_index, 4);
            assert!(errors[0].message.contains("cannot render tile 4"));
        }
        other => panic!("expected Ended, got {:?}", other),
    }

    // Partial results are still merged; the failed tile keeps the original.
    let layer = &doc.canvas.layers[0].pixels;
    assert_eq!(layer.get_pixel(0, 0), &RED);
    assert_eq!(layer.get_pixel(299, 299), &RED);
    assert_eq!(layer.get_pixel(150, 150), &GRAY);
    assert_eq!(doc.history.undo_count(), 1);
}

#[test]
fn cancelling_after_tile_failures_ends_cancelled_without_errors() {
    let mut doc = document(300, 300, GRAY);
    let mut mgr = manager(2, 128);
    let effect = FailingTile {
        fail_index: 4,
        tile: 128,
        columns: 3,
        color: RED,
    };
    let control = mgr.start(Arc::new(LiveEffect::new(effect)), &doc).unwrap();

    let events = wait_render_finished(&mut mgr, &mut doc);
    assert!(events.iter().any(|e| matches!(
        e,
        PreviewEvent::RenderFinished { errors, .. } if errors.len() == 1
    )));

    // Apply in the same batch loses to cancel.
    control.request_apply();
    control.request_cancel();
    let events = mgr.wait_until_ended(&mut doc, WAIT).unwrap();
    assert_eq!(
        events.last(),
        Some(&PreviewEvent::Ended {
            status: RenderStatus::Cancelled,
            errors: Vec::new()
        })
    );
    assert!(!mgr.is_active());
    assert_eq!(doc.canvas.layers[0].pixels.get_pixel(0, 0), &GRAY);
    assert_eq!(doc.history.undo_count(), 0);
}

#[test]
fn rapid_parameter_changes_coalesce_into_one_restart() {
    let mut doc = document(64, 64, GRAY);
    let mut mgr = manager(1, 32);
    let source = CountingSource::new(RED);
    let control = mgr.start(source.clone(), &doc).unwrap();

    for _ in 0..5 {
        control.notify_parameters_changed();
    }
    mgr.poll(&mut doc);
    source.gate.open();

    let events = wait_render_finished(&mut mgr, &mut doc);
    let finished: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            PreviewEvent::RenderFinished { generation, .. } => Some(*generation),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec![2]);
    assert_eq!(source.captures(), 2);
    assert_eq!(mgr.progress(), 1.0);

    control.request_cancel();
    mgr.wait_until_ended(&mut doc, WAIT).unwrap();
}

#[test]
fn concurrent_cancel_and_apply_always_cancels() {
    for _ in 0..10 {
        let mut doc = document(64, 64, GRAY);
        let mut mgr = manager(2, 16);
        let source = CountingSource::new(RED);
        let control = mgr.start(source.clone(), &doc).unwrap();

        let apply = {
            let control = control.clone();
            thread::spawn(move || control.request_apply())
        };
        let cancel = {
            let control = control.clone();
            thread::spawn(move || control.request_cancel())
        };
        apply.join().unwrap();
        cancel.join().unwrap();
        source.gate.open();

        let events = mgr.wait_until_ended(&mut doc, WAIT).unwrap();
        assert!(matches!(
            events.last(),
            Some(PreviewEvent::Ended { status: RenderStatus::Cancelled, errors }) if errors.is_empty()
        ));
        assert_eq!(doc.history.undo_count(), 0);
        assert_eq!(doc.canvas.layers[0].pixels.get_pixel(0, 0), &GRAY);
    }
}

#[test]
fn second_start_fails_and_leaves_first_session_running() {
    let mut doc = document(64, 64, GRAY);
    let mut mgr = manager(2, 32);
    let source = CountingSource::new(RED);
    let control = mgr.start(source.clone(), &doc).unwrap();
    let first = mgr.session_id();

    let second = mgr.start(Arc::new(LiveEffect::new(Fill(RED))), &doc);
    assert!(matches!(second, Err(PreviewError::AlreadyActive)));
    assert_eq!(mgr.session_id(), first);

    source.gate.open();
    let events = wait_render_finished(&mut mgr, &mut doc);
    assert_eq!(progress_fractions(&events).len(), 4);
    assert!(events.iter().any(|e| matches!(e, PreviewEvent::RenderFinished { generation: 1, .. })));
    assert_eq!(source.captures(), 1);

    control.request_cancel();
    mgr.wait_until_ended(&mut doc, WAIT).unwrap();
}

#[test]
fn apply_while_rendering_reports_finalizing() {
    let mut doc = document(64, 64, GRAY);
    let mut mgr = manager(1, 32);
    let source = CountingSource::new(RED);
    let control = mgr.start(source.clone(), &doc).unwrap();

    control.request_apply();
    let events = mgr.poll(&mut doc);
    assert!(events.iter().any(|e| matches!(e, PreviewEvent::Finalizing { .. })));

    source.gate.open();
    let events = mgr.wait_until_ended(&mut doc, WAIT).unwrap();
    assert!(matches!(
        events.last(),
        Some(PreviewEvent::Ended { status: RenderStatus::Completed, .. })
    ));
    assert_eq!(doc.canvas.layers[0].pixels.get_pixel(63, 63), &RED);
}

#[test]
fn selection_limits_render_and_merge() {
    let mut doc = document(100, 100, GRAY);
    doc.set_selection(Some(SelectionMask::from_rect(100, 100, RectI::new(10, 10, 20, 20))));
    let mut mgr = manager(2, 8);
    let control = mgr.start(Arc::new(LiveEffect::new(Fill(RED))), &doc).unwrap();
    assert_eq!(mgr.render_bounds(), Some(RectI::new(10, 10, 20, 20)));

    control.request_apply();
    mgr.wait_until_ended(&mut doc, WAIT).unwrap();

    let layer = doc.layer_pixels(0).unwrap();
    assert_eq!(layer.get_pixel(15, 15), &RED);
    assert_eq!(layer.get_pixel(29, 29), &RED);
    assert_eq!(layer.get_pixel(5, 5), &GRAY);
    assert_eq!(layer.get_pixel(30, 30), &GRAY);

    assert_eq!(doc.undo().as_deref(), Some("Fill"));
    assert_eq!(doc.layer_pixels(0).unwrap().get_pixel(15, 15), &GRAY);
    doc.redo();
    assert_eq!(doc.layer_pixels(0).unwrap().get_pixel(15, 15), &RED);
}

#[test]
fn edited_parameters_reach_the_next_generation() {
    let mut doc = document(40, 40, GRAY);
    let mut mgr = manager(2, 16);
    let live = LiveEffect::new(BrightnessContrast::default());
    let control = mgr.start(Arc::new(live.clone()), &doc).unwrap();
    wait_render_finished(&mut mgr, &mut doc);
    assert_eq!(mgr.preview_pixels().unwrap().get_pixel(0, 0), &GRAY);

    live.update(|e| e.brightness = 40.0);
    control.notify_parameters_changed();
    let events = wait_render_finished(&mut mgr, &mut doc);
    assert!(events.iter().any(|e| matches!(e, PreviewEvent::RenderFinished { generation: 2, .. })));
    assert_eq!(
        mgr.preview_pixels().unwrap().get_pixel(39, 39),
        &Rgba([140, 140, 140, 255])
    );

    control.request_apply();
    mgr.wait_until_ended(&mut doc, WAIT).unwrap();
    assert_eq!(doc.layer_pixels(0).unwrap().get_pixel(20, 20), &Rgba([140, 140, 140, 255]));
    assert_eq!(
        doc.history.undo_description().as_deref(),
        Some("Brightness/Contrast")
    );
}
