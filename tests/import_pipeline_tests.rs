// Buffer import pipeline integration tests
//
// Shared-memory and native buffers committed through a session, composed by
// the renderer, and released back to the client.

mod common;

use axiom_surface::buffer::native::{NativeBufferHandle, NativePlane, MODIFIER_LINEAR};
use axiom_surface::buffer::{BufferHandle, Texture};
use axiom_surface::format::fourcc;
use axiom_surface::geometry::Size;
use axiom_surface::stream::StreamConfig;
use common::{done_tokens, released, Harness};

#[test]
fn test_shm_contents_are_converted_to_rgba() {
    let mut h = Harness::new();
    let surface = h.toplevel();

    // Little-endian ARGB8888: blue, green, red, alpha
    assert!(h.pool.write(0, &[0x10, 0x20, 0x30, 0xff].repeat(4)));
    h.attach_and_commit(surface, 2, 2);

    let frames = h.compose();
    let element = &frames[0].elements[0];
    assert!(element.fresh);
    match &element.texture {
        Texture::Pixels { size, rgba } => {
            assert_eq!(*size, Size::new(2, 2));
            assert_eq!(rgba.as_slice(), [0x30, 0x20, 0x10, 0xff].repeat(4).as_slice());
        }
        other => panic!("expected pixels, got {:?}", other),
    }
}

#[test]
fn test_front_buffer_is_redrawn_without_new_commit() {
    let mut h = Harness::new();
    let surface = h.toplevel();
    h.attach_and_commit(surface, 8, 8);

    let first = h.compose();
    let second = h.compose();
    assert!(first[0].elements[0].fresh);
    assert!(!second[0].elements[0].fresh);
    assert_eq!(first[0].elements[0].buffer, second[0].elements[0].buffer);
}

#[test]
fn test_native_buffer_released_when_replaced() {
    let mut h = Harness::new();
    let surface = h.toplevel();

    let first = h.native_buffer(32, 32);
    h.attach(surface, Some(BufferHandle::Native(first.clone())));
    h.frame(surface, 1);
    h.commit(surface);
    h.compose();

    // Consumed, but still on screen
    let events = h.drain_events();
    assert_eq!(done_tokens(&events), vec![1]);
    assert!(released(&events).is_empty());

    let second = h.native_buffer(32, 32);
    h.attach(surface, Some(BufferHandle::Native(second.clone())));
    h.commit(surface);
    h.compose();
    assert_eq!(released(&h.drain_events()), vec![first.id()]);
}

#[test]
fn test_gpu_image_is_reused_for_same_backing() {
    let mut h = Harness::new();
    let surface = h.toplevel();
    let native = h.native_buffer(16, 16);

    for _ in 0..3 {
        h.attach(surface, Some(BufferHandle::Native(native.clone())));
        h.commit(surface);
        let frames = h.compose();
        assert!(matches!(frames[0].elements[0].texture, Texture::Image(_)));
    }

    assert_eq!(h.gpu.images_created(), 1);
}

#[test]
fn test_destroyed_native_buffer_gets_no_release() {
    let mut h = Harness::new();
    let surface = h.toplevel();
    let native = h.native_buffer(16, 16);

    h.attach(surface, Some(BufferHandle::Native(native.clone())));
    h.commit(surface);
    h.compose();
    h.drain_events();

    native.destroy();
    h.attach(surface, None);
    h.commit(surface);

    // The unmapped stream leaves the scene and its front buffer is dropped
    h.compose();
    assert_eq!(h.renderer.front_buffer_count(), 0);
    assert!(released(&h.drain_events()).is_empty());
}

#[test]
fn test_unsupported_native_layout_falls_back_to_copy() {
    let mut h = Harness::new();
    let surface = h.toplevel();

    let pool = axiom_surface::buffer::shm::ShmPool::new_anonymous(4 * 4 * 2).unwrap();
    let native = NativeBufferHandle::new(
        Size::new(4, 4),
        fourcc::RGB565,
        MODIFIER_LINEAR,
        vec![NativePlane {
            offset: 0,
            stride: 8,
            memory: Some(pool),
        }],
    );
    h.attach(surface, Some(BufferHandle::Native(native)));
    h.commit(surface);

    let frames = h.compose();
    assert!(matches!(frames[0].elements[0].texture, Texture::Pixels { .. }));
    assert_eq!(h.gpu.images_created(), 0);
}

#[test]
fn test_unimportable_native_buffer_is_a_protocol_error() {
    let mut h = Harness::new();
    let surface = h.toplevel();

    // Unknown layout without a CPU mapping has no import path at all
    let native = NativeBufferHandle::new(Size::new(4, 4), fourcc::RGB565, MODIFIER_LINEAR, vec![]);
    h.attach(surface, Some(BufferHandle::Native(native)));
    let err = h
        .session
        .dispatch(axiom_surface::protocol::Request::Commit { surface })
        .unwrap_err();
    assert_eq!(err.code(), "import_failed");
    assert!(!h.session.is_connected());
}

#[test]
fn test_mailbox_stream_completes_dropped_frames() {
    let mut h = Harness::with_stream(StreamConfig {
        buffer_count: 1,
        allow_framedropping: true,
    });
    let surface = h.toplevel();

    for token in 1..=3 {
        let buffer = h.shm_buffer(8, 8);
        h.attach(surface, Some(buffer));
        h.frame(surface, token);
        h.commit(surface);
    }

    // Superseded frames never reach the screen, but their callbacks still fire
    h.executor.run_pending();
    assert_eq!(done_tokens(&h.drain_events()), vec![1, 2]);

    h.compose();
    assert_eq!(done_tokens(&h.drain_events()), vec![3]);
}
