// Surface lifecycle integration tests for the Axiom surface core
//
// Drives a client session through map, unmap and destroy, checking what the
// client observes: frame callbacks, buffer releases and protocol errors.

mod common;

use axiom_surface::buffer::BufferHandle;
use axiom_surface::geometry::{Displacement, Rectangle};
use axiom_surface::protocol::{ClientEvent, ProtocolViolation, Request};
use common::{done_tokens, released, Harness};
use wayland_server::protocol::wl_shm;
use wayland_server::WEnum;

#[test]
fn test_frame_callback_waits_for_consumption() {
    let mut h = Harness::new();
    let surface = h.toplevel();

    let buffer = h.shm_buffer(64, 64);
    let backing = buffer.id();
    h.attach(surface, Some(buffer));
    h.frame(surface, 1);
    h.commit(surface);

    // Nothing was drawn yet
    h.executor.run_pending();
    assert!(h.drain_events().is_empty());
    assert!(h.current(surface).is_mapped());

    h.compose();
    let events = h.drain_events();
    assert_eq!(done_tokens(&events), vec![1]);
    assert_eq!(released(&events), vec![backing]);
}

#[test]
fn test_callbacks_fire_in_commit_order() {
    let mut h = Harness::new();
    let surface = h.toplevel();

    let buffer = h.shm_buffer(32, 32);
    h.attach(surface, Some(buffer));
    h.frame(surface, 1);
    h.commit(surface);

    // Commits without a new buffer wait on the frame still in flight
    h.frame(surface, 2);
    h.commit(surface);
    h.frame(surface, 3);
    h.commit(surface);

    h.executor.run_pending();
    assert!(done_tokens(&h.drain_events()).is_empty());

    h.compose();
    assert_eq!(done_tokens(&h.drain_events()), vec![1, 2, 3]);
}

#[test]
fn test_queued_frames_complete_one_per_composition() {
    let mut h = Harness::new();
    let surface = h.toplevel();

    for token in 1..=2 {
        let buffer = h.shm_buffer(16, 16);
        h.attach(surface, Some(buffer));
        h.frame(surface, token);
        h.commit(surface);
    }

    h.compose();
    assert_eq!(done_tokens(&h.drain_events()), vec![1]);
    h.compose();
    assert_eq!(done_tokens(&h.drain_events()), vec![2]);

    // Idle and mapped: the callback completes through the executor
    h.frame(surface, 3);
    h.commit(surface);
    assert!(h.drain_events().is_empty());
    h.executor.run_pending();
    assert_eq!(done_tokens(&h.drain_events()), vec![3]);
}

#[test]
fn test_unmap_fires_pending_callbacks_immediately() {
    let mut h = Harness::new();
    let surface = h.toplevel();

    let buffer = h.shm_buffer(64, 64);
    let backing = buffer.id();
    h.attach(surface, Some(buffer));
    h.frame(surface, 1);
    h.commit(surface);

    h.attach(surface, None);
    h.frame(surface, 2);
    h.commit(surface);

    assert_eq!(done_tokens(&h.drain_events()), vec![1, 2]);
    assert!(!h.current(surface).is_mapped());

    // The queued frame was drained, so its memory goes back to the client
    h.executor.run_pending();
    let events = h.drain_events();
    assert_eq!(released(&events), vec![backing]);
    assert!(done_tokens(&events).is_empty());

    let scene_surface = &h.scene.group(0).unwrap().surfaces()[0];
    assert!(scene_surface.streams().is_empty());
    assert!(h.compose()[0].elements.is_empty());
}

#[test]
fn test_commit_without_buffer_keeps_other_fields() {
    let mut h = Harness::new();
    let surface = h.toplevel();

    let buffer = h.shm_buffer(64, 64);
    h.attach(surface, Some(buffer));
    h.session
        .dispatch(Request::SetBufferScale { surface, scale: 2 })
        .unwrap();
    h.session
        .dispatch(Request::SetInputRegion {
            surface,
            region: Some(vec![Rectangle::from_xywh(0, 0, 10, 10)]),
        })
        .unwrap();
    h.commit(surface);
    let before = h.current(surface);

    h.session
        .dispatch(Request::Offset { surface, dx: 5, dy: 5 })
        .unwrap();
    h.commit(surface);

    let mut expected = before;
    expected.offset = Displacement::new(5, 5);
    assert_eq!(h.current(surface), expected);
    assert_eq!(h.current(surface).size().map(|s| (s.width, s.height)), Some((32, 32)));
}

#[test]
fn test_repeated_commit_is_idempotent() {
    let mut h = Harness::new();
    let surface = h.toplevel();
    h.attach_and_commit(surface, 20, 20);

    h.session
        .dispatch(Request::Offset { surface, dx: 3, dy: 4 })
        .unwrap();
    h.commit(surface);
    let first = h.current(surface);

    h.session
        .dispatch(Request::Offset { surface, dx: 3, dy: 4 })
        .unwrap();
    h.commit(surface);
    assert_eq!(h.current(surface), first);

    h.commit(surface);
    assert_eq!(h.current(surface), first);
}

#[test]
fn test_failed_import_leaves_current_state_untouched() {
    let mut h = Harness::new();
    let surface = h.toplevel();
    h.attach_and_commit(surface, 8, 8);
    let before = h.current(surface);

    // Stride given in pixels instead of bytes
    let bad = h
        .pool
        .create_buffer(0, 4, 1, 8, WEnum::Value(wl_shm::Format::Argb8888));
    let table = h.table();
    {
        let mut table = table.lock();
        let pending = table.get_mut(surface).unwrap();
        pending.attach(Some(BufferHandle::Shm(bad)), 0, 0);
        pending.set_pending_offset(7, 7);

        let err = table.commit(surface).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::InvalidStride {
                stride: 8,
                width: 4,
                bytes_per_pixel: 4,
            }
        );
    }

    assert_eq!(h.current(surface), before);
}

#[test]
fn test_protocol_error_disconnects_client() {
    let mut h = Harness::new();
    let surface = h.toplevel();
    h.attach_and_commit(surface, 8, 8);

    let bad = h
        .pool
        .create_buffer(0, 4, 1, 8, WEnum::Value(wl_shm::Format::Argb8888));
    h.attach(surface, Some(BufferHandle::Shm(bad)));
    let err = h
        .session
        .dispatch(Request::Commit { surface })
        .unwrap_err();
    assert_eq!(err.code(), "invalid_stride");

    let events = h.drain_events();
    assert!(events.iter().any(|event| matches!(
        event,
        ClientEvent::ProtocolError { code: "invalid_stride", .. }
    )));

    assert!(!h.session.is_connected());
    assert!(h.session.table().lock().is_empty());
    assert_eq!(h.scene.surface_count(), 0);

    // Later requests are dropped silently
    assert!(h.session.dispatch(Request::Commit { surface }).is_ok());
}

#[test]
fn test_invalid_scale_is_rejected() {
    let mut h = Harness::new();
    let surface = h.toplevel();

    let err = h
        .session
        .dispatch(Request::SetBufferScale { surface, scale: 0 })
        .unwrap_err();
    assert_eq!(err, ProtocolViolation::InvalidScale(0));
    assert!(!h.session.is_connected());
}

#[test]
fn test_role_can_only_be_assigned_once() {
    let h = Harness::new();
    let table = h.table();
    let mut table = table.lock();

    let surface = table.create().unwrap();
    let other = table.create().unwrap();
    table.make_toplevel(surface, 0).unwrap();

    match table.make_subsurface(surface, other) {
        Err(ProtocolViolation::RoleAlreadySet {
            existing, requested, ..
        }) => {
            assert_eq!(existing, "toplevel");
            assert_eq!(requested, "subsurface");
        }
        other => panic!("expected RoleAlreadySet, got {:?}", other),
    }
    assert!(matches!(
        table.make_toplevel(surface, 0),
        Err(ProtocolViolation::RoleAlreadySet { .. })
    ));

    // After the role is cleared a new one can be assigned
    table.clear_role(surface).unwrap();
    table.make_subsurface(surface, other).unwrap();
    assert_eq!(table.parent_of(surface), Some(other));
}

#[test]
fn test_subsurface_cycles_are_rejected() {
    let h = Harness::new();
    let table = h.table();
    let mut table = table.lock();

    let root = table.create().unwrap();
    let child = table.create().unwrap();
    table.make_subsurface(child, root).unwrap();

    assert!(matches!(
        table.make_subsurface(root, root),
        Err(ProtocolViolation::BadSurface { .. })
    ));
    assert!(matches!(
        table.make_subsurface(root, child),
        Err(ProtocolViolation::BadSurface { .. })
    ));
}

#[test]
fn test_destroy_drops_callbacks_and_releases_queued_buffer() {
    let mut h = Harness::new();
    let surface = h.toplevel();

    let buffer = h.shm_buffer(32, 32);
    let backing = buffer.id();
    h.attach(surface, Some(buffer));
    h.frame(surface, 1);
    h.commit(surface);

    h.session.dispatch(Request::Destroy { surface }).unwrap();
    assert_eq!(h.scene.surface_count(), 0);

    // Late completion finds the surface gone
    h.executor.run_pending();
    let events = h.drain_events();
    assert!(done_tokens(&events).is_empty());
    assert_eq!(released(&events), vec![backing]);

    let table = h.table();
    assert!(matches!(
        table.lock().get(surface),
        Err(ProtocolViolation::InvalidObject(_))
    ));

    // The slot is reused under a new generation
    let reused = h.session.create_surface().unwrap();
    assert_eq!(reused.index(), surface.index());
    assert_ne!(reused, surface);
    assert!(table.lock().get(surface).is_err());
}

#[test]
fn test_destroyed_buffer_handle_cannot_be_attached() {
    let mut h = Harness::new();
    let surface = h.toplevel();

    let buffer = h.shm_buffer(8, 8);
    buffer.liveness().destroy();
    h.attach(surface, Some(buffer));
    let err = h
        .session
        .dispatch(Request::Commit { surface })
        .unwrap_err();
    assert_eq!(err.code(), "invalid_object");
}

#[test]
fn test_disconnect_tears_down_every_surface() {
    let mut h = Harness::new();
    let parent = h.toplevel();
    let child = h.subsurface(parent);
    h.attach_and_commit(child, 10, 10);
    h.attach_and_commit(parent, 50, 50);
    assert_eq!(h.table().lock().len(), 2);
    h.compose();
    assert_eq!(h.renderer.front_buffer_count(), 2);

    h.session.disconnect();
    assert!(h.table().lock().is_empty());
    assert_eq!(h.scene.surface_count(), 0);

    h.compose();
    assert_eq!(h.renderer.front_buffer_count(), 0);
}

#[test]
fn test_buffer_geometry_outside_pool_is_rejected() {
    let mut h = Harness::new();
    let surface = h.toplevel();
    h.attach_and_commit(surface, 8, 8);
    let before = h.current(surface);

    let table = h.table();
    for bad in [
        h.shm_buffer(2560, 2560),
        h.shm_buffer(-4, -4),
        BufferHandle::Shm(
            h.pool
                .create_buffer(-16, 4, 4, 16, WEnum::Value(wl_shm::Format::Argb8888)),
        ),
    ] {
        let mut table = table.lock();
        table.get_mut(surface).unwrap().attach(Some(bad), 0, 0);
        let err = table.commit(surface).unwrap_err();
        assert!(matches!(err, ProtocolViolation::InvalidGeometry(_)));
        assert_eq!(err.code(), "invalid_stride");
    }

    assert_eq!(h.current(surface), before);
}

#[test]
fn test_oversized_buffer_disconnects_client() {
    let mut h = Harness::new();
    let surface = h.toplevel();

    let oversized = h.shm_buffer(2560, 2560);
    h.attach(surface, Some(oversized));
    let err = h
        .session
        .dispatch(Request::Commit { surface })
        .unwrap_err();
    assert_eq!(err.code(), "invalid_stride");
    assert!(!h.session.is_connected());
    assert!(h.compose()[0].elements.is_empty());
}

#[test]
fn test_orphaned_child_fires_cached_callbacks() {
    let mut h = Harness::new();
    let parent = h.toplevel();
    let child = h.subsurface(parent);
    h.attach_and_commit(parent, 100, 100);

    // Synchronized: held in the cache until the parent commits
    let buffer = h.shm_buffer(40, 40);
    h.attach(child, Some(buffer));
    h.frame(child, 9);
    h.commit(child);
    h.executor.run_pending();
    assert!(done_tokens(&h.drain_events()).is_empty());

    h.session
        .dispatch(Request::Destroy { surface: parent })
        .unwrap();
    assert_eq!(done_tokens(&h.drain_events()), vec![9]);
}

#[test]
fn test_clearing_role_fires_waiting_callbacks() {
    let mut h = Harness::new();
    let parent = h.toplevel();
    let child = h.subsurface(parent);
    h.attach_and_commit(parent, 100, 100);
    h.session
        .dispatch(Request::SetDesync { surface: child })
        .unwrap();

    let buffer = h.shm_buffer(40, 40);
    h.attach(child, Some(buffer));
    h.frame(child, 5);
    h.commit(child);
    h.executor.run_pending();
    assert!(done_tokens(&h.drain_events()).is_empty());

    h.session
        .dispatch(Request::ClearRole { surface: child })
        .unwrap();
    assert_eq!(done_tokens(&h.drain_events()), vec![5]);

    // The drained buffer still goes back to the client
    h.executor.run_pending();
    assert_eq!(released(&h.drain_events()).len(), 1);
}

#[test]
fn test_toplevel_on_unknown_output_lands_on_first() {
    let h = Harness::new();
    let table = h.table();
    let mut table = table.lock();

    let surface = table.create().unwrap();
    let scene_surface = table.make_toplevel(surface, 7).unwrap();
    assert_eq!(scene_surface.output(), 0);
    assert_eq!(h.scene.group(0).unwrap().len(), 1);
}
