//! Connection negotiation and allocator agreement across real filters.

mod common;

use std::sync::Arc;

use common::*;
use strmbase::allocator::{Allocator, BufferFlags};
use strmbase::config::RendererConfig;
use strmbase::error::Error;
use strmbase::filter::FilterState;
use strmbase::format::MediaType;
use strmbase::renderer::Renderer;
use strmbase::transform::Transform;

fn renderer(accepted: &[strmbase::format::FourCc]) -> Renderer<RecordingRenderer> {
    Renderer::new("sink", RecordingRenderer::accepting(accepted), RendererConfig::default())
}

#[test]
fn test_first_common_type_of_source_list_wins() {
    init_tracing();
    let (source, _) = source("source", &[A, B]);
    let sink = renderer(&[B, C]);

    let out = source.pin(0).unwrap();
    let agreed = out.connect(sink.sink_pin(), None).unwrap();
    assert_eq!(agreed, video(B));
    assert_eq!(out.connection_media_type().unwrap(), video(B));
    assert_eq!(sink.sink_pin().connection_media_type().unwrap(), video(B));
    assert!(Arc::ptr_eq(&out.connected_to().unwrap(), sink.sink_pin()));
    assert!(Arc::ptr_eq(&sink.sink_pin().connected_to().unwrap(), out));
}

#[test]
fn test_falls_back_to_sink_preferences() {
    // The source enumerates nothing but takes what the sink offers, in the
    // sink's order.
    let (source, _) = source_with("source", &[], &[A, C], None);
    let sink = renderer(&[C, A]);
    let agreed = source.pin(0).unwrap().connect(sink.sink_pin(), None).unwrap();
    assert_eq!(agreed, video(C));
}

#[test]
fn test_reconnect_reproduces_type() {
    let (source, _) = source("source", &[A, B]);
    let sink = renderer(&[B, C]);
    let out = source.pin(0).unwrap();

    let first = out.connect(sink.sink_pin(), None).unwrap();
    assert!(out.disconnect().unwrap());
    assert!(!out.is_connected());
    assert!(!sink.sink_pin().is_connected());
    assert!(!out.disconnect().unwrap());

    let second = out.connect(sink.sink_pin(), None).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_no_common_type_leaves_pins_unconnected() {
    let (source, _) = source("source", &[A]);
    let sink = renderer(&[C]);
    let out = source.pin(0).unwrap();

    let err = out.connect(sink.sink_pin(), None).unwrap_err();
    assert!(matches!(err, Error::NoAcceptableFormats { .. }));
    assert!(!out.is_connected());
    assert!(!sink.sink_pin().is_connected());
    assert!(out.connection_media_type().is_err());
}

#[test]
fn test_proposed_type() {
    let (source, _) = source("source", &[A, B]);
    let sink = renderer(&[A, B]);
    let out = source.pin(0).unwrap();

    let agreed = out.connect(sink.sink_pin(), Some(&video(B))).unwrap();
    assert_eq!(agreed, video(B));
    out.disconnect().unwrap();

    let err = out.connect(sink.sink_pin(), Some(&video(C))).unwrap_err();
    assert!(matches!(err, Error::NoAcceptableFormats { .. }));

    // A partial proposal filters the candidates instead.
    let any_video = MediaType::any().with_major(strmbase::format::MajorType::Video);
    let agreed = out.connect(sink.sink_pin(), Some(&any_video)).unwrap();
    assert_eq!(agreed, video(A));
}

#[test]
fn test_connect_requires_stopped_source() {
    let (source, _) = source("source", &[A]);
    let sink = renderer(&[A]);
    source.pause().unwrap();
    let err = source.pin(0).unwrap().connect(sink.sink_pin(), None).unwrap_err();
    assert_eq!(err, Error::NotStopped);
}

#[test]
fn test_sink_must_be_stopped_and_free() {
    let (first, _) = source("first", &[A]);
    let (second, _) = source("second", &[A]);
    let sink = renderer(&[A]);

    first.pin(0).unwrap().connect(sink.sink_pin(), None).unwrap();
    let err = second.pin(0).unwrap().connect(sink.sink_pin(), None).unwrap_err();
    assert_eq!(err, Error::AlreadyConnected);
    assert!(!second.pin(0).unwrap().is_connected());

    first.pin(0).unwrap().disconnect().unwrap();
    sink.pause().unwrap();
    let err = second.pin(0).unwrap().connect(sink.sink_pin(), None).unwrap_err();
    assert_eq!(err, Error::NotStopped);
}

#[test]
fn test_wrong_direction() {
    let sink = renderer(&[A]);
    let other = renderer(&[A]);
    let err = sink.sink_pin().connect(other.sink_pin(), None).unwrap_err();
    assert_eq!(err, Error::WrongDirection);
}

#[test]
fn test_disconnect_requires_stopped() {
    let (source, _) = source("source", &[A]);
    let sink = renderer(&[A]);
    let out = source.pin(0).unwrap();
    out.connect(sink.sink_pin(), None).unwrap();

    sink.pause().unwrap();
    assert_eq!(out.disconnect().unwrap_err(), Error::NotStopped);
    sink.stop().unwrap();
    assert!(sink.sink_pin().disconnect().unwrap());
    assert!(!out.is_connected());
}

#[test]
fn test_allocator_follows_source_state() {
    let (source, _) = source("source", &[A]);
    let sink = renderer(&[A]);
    let out = source.pin(0).unwrap();
    out.connect(sink.sink_pin(), None).unwrap();

    let props = out.allocator_properties().unwrap();
    assert!(props.buffers >= 1);
    assert!(props.size > 0);
    let allocator = sink.sink_pin().notified_allocator().unwrap();
    assert!(!sink.sink_pin().is_read_only());

    assert_eq!(
        out.get_delivery_buffer(None, None, BufferFlags::NO_WAIT).unwrap_err(),
        Error::NotCommitted
    );

    source.pause().unwrap();
    assert_eq!(source.state(), FilterState::Paused);
    let sample = out.get_delivery_buffer(None, None, BufferFlags::NO_WAIT).unwrap();
    assert!(sample.is_pooled());
    drop(sample);

    source.stop().unwrap();
    assert_eq!(
        allocator.get_buffer(None, None, BufferFlags::NO_WAIT).unwrap_err(),
        Error::NotCommitted
    );
}

#[test]
fn test_chain_through_transform() {
    let (source, _) = source("source", &[A, B]);
    let transform = Transform::new("copy", Passthrough::new(B));
    let sink = renderer(&[B]);

    let agreed = source.pin(0).unwrap().connect(transform.input_pin(), None).unwrap();
    assert_eq!(agreed, video(B));
    // Output types follow the connected input.
    let agreed = transform.output_pin().connect(sink.sink_pin(), None).unwrap();
    assert_eq!(agreed, video(B));

    let ids: Vec<_> = transform.filter().enum_pins().map(|p| p.id().to_string()).collect();
    assert_eq!(ids, ["In", "Out"]);
    assert!(transform.find_pin("Out").is_some_and(|p| p.is_connected()));
}

#[test]
fn test_transform_output_types_resync_on_input_changes() {
    let (source, _) = source("source", &[B]);
    let transform = Transform::new("copy", Passthrough::new(B));
    let mut types = transform.output_pin().enum_media_types();
    assert!(types.next_n(1).unwrap().is_empty());

    let out = source.pin(0).unwrap();
    out.connect(transform.input_pin(), None).unwrap();
    assert_eq!(types.next_n(1).unwrap_err(), Error::EnumOutOfSync);
    types.reset();
    assert_eq!(types.next_n(2).unwrap(), [video(B)]);

    assert!(out.disconnect().unwrap());
    assert_eq!(types.next_n(1).unwrap_err(), Error::EnumOutOfSync);
    types.reset();
    assert!(types.next().is_none());
}

#[test]
fn test_transform_output_needs_input() {
    let transform = Transform::new("copy", Passthrough::new(B));
    let sink = renderer(&[B]);
    let err = transform.output_pin().connect(sink.sink_pin(), None).unwrap_err();
    assert!(matches!(err, Error::NoAcceptableFormats { .. }));
}
