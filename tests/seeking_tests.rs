//! Seeking requests travelling upstream from a renderer to a source.

mod common;

use std::sync::Arc;

use common::*;
use strmbase::clock::RefTime;
use strmbase::config::RendererConfig;
use strmbase::error::Error;
use strmbase::filter::{Delivery, Filter};
use strmbase::renderer::Renderer;
use strmbase::seeking::{MediaSeeking, SeekPosition, SeekingCapabilities, SourceSeeking, TimeFormat};
use strmbase::transform::Transform;

fn secs(s: i64) -> i64 {
    RefTime::from_secs(s).units()
}

struct Chain {
    source: Arc<Filter>,
    seeking: Arc<SourceSeeking>,
    transform: Transform<Passthrough>,
    sink: Renderer<RecordingRenderer>,
}

impl Chain {
    /// source (10 s) -> passthrough -> renderer
    fn new() -> Self {
        let seeking = Arc::new(SourceSeeking::new(
            RefTime::from_secs(10),
            SeekingCapabilities::ALL_POSITIONING,
        ));
        let (source, _) = source_with_seeking("source", &[B], Arc::clone(&seeking));
        let transform = Transform::new("copy", Passthrough::new(B));
        let sink = Renderer::new("sink", RecordingRenderer::accepting(&[B]), RendererConfig::default());

        source.pin(0).unwrap().connect(transform.input_pin(), None).unwrap();
        transform.output_pin().connect(sink.sink_pin(), None).unwrap();
        Self {
            source,
            seeking,
            transform,
            sink,
        }
    }

    /// Run downstream first; no clock, so samples are presented at once.
    fn run(&self) {
        self.sink.run(RefTime::ZERO).unwrap();
        self.transform.run(RefTime::ZERO).unwrap();
        self.source.run(RefTime::ZERO).unwrap();
    }

    fn renderer_seeking(&self) -> Arc<dyn MediaSeeking> {
        self.sink.seeking().unwrap()
    }
}

#[test]
fn test_requests_reach_the_source() {
    init_tracing();
    let chain = Chain::new();
    let seeking = chain.renderer_seeking();

    assert_eq!(seeking.duration().unwrap(), secs(10));
    assert_eq!(seeking.time_format().unwrap(), TimeFormat::MediaTime);
    assert!(seeking.capabilities().unwrap().contains(SeekingCapabilities::CAN_SEEK_ABSOLUTE));

    seeking
        .set_positions(SeekPosition::absolute(secs(2)), SeekPosition::absolute(secs(6)))
        .unwrap();
    assert_eq!(
        chain.seeking.segment(),
        (RefTime::from_secs(2), RefTime::from_secs(6), 1.0)
    );
    assert_eq!(seeking.positions().unwrap(), (secs(2), secs(6)));

    seeking.set_rate(2.0).unwrap();
    assert_eq!(chain.seeking.segment().2, 2.0);
    assert_eq!(seeking.rate().unwrap(), 2.0);
    assert!(matches!(seeking.set_rate(0.0), Err(Error::InvalidArgument(_))));
}

#[test]
fn test_seeking_is_exposed_on_output_pins_only() {
    let chain = Chain::new();
    assert!(chain.transform.seeking().is_some());
    assert!(chain.transform.output_pin().seeking().is_some());
    assert!(chain.transform.input_pin().seeking().is_none());
    assert!(chain.sink.sink_pin().seeking().is_none());
}

#[test]
fn test_renderer_reports_last_presented_time() {
    let chain = Chain::new();
    chain.run();
    let seeking = chain.renderer_seeking();
    let out = chain.source.pin(0).unwrap();

    // Before anything is presented the source answers.
    assert_eq!(seeking.current_position().unwrap(), 0);

    let delivery = out.deliver(timed_sample(2000, 2040)).unwrap();
    assert_eq!(delivery, Delivery::Delivered);
    assert_eq!(seeking.current_position().unwrap(), secs(2));

    out.deliver_begin_flush().unwrap();
    out.deliver_end_flush().unwrap();
    assert_eq!(seeking.current_position().unwrap(), 0);
}

#[test]
fn test_end_of_stream_reports_stop_position() {
    let chain = Chain::new();
    chain.run();
    let seeking = chain.renderer_seeking();
    seeking
        .set_positions(SeekPosition::none(), SeekPosition::absolute(secs(8)))
        .unwrap();

    let out = chain.source.pin(0).unwrap();
    out.deliver(timed_sample(1000, 1040)).unwrap();
    assert_eq!(out.deliver_end_of_stream().unwrap(), Delivery::Delivered);
    assert_eq!(seeking.current_position().unwrap(), secs(8));

    chain.sink.stop().unwrap();
    assert_eq!(seeking.current_position().unwrap(), 0);
}

#[test]
fn test_unconnected_renderer() {
    let sink = Renderer::new("sink", RecordingRenderer::accepting(&[B]), RendererConfig::default());
    let seeking = sink.seeking().unwrap();

    seeking
        .set_positions(SeekPosition::absolute(secs(1)), SeekPosition::none())
        .unwrap();
    assert_eq!(seeking.duration().unwrap_err(), Error::NotConnected);
    assert_eq!(seeking.current_position().unwrap_err(), Error::NotConnected);
}

#[test]
fn test_upstream_without_seeking() {
    let (source, _) = source("source", &[B]);
    let sink = Renderer::new("sink", RecordingRenderer::accepting(&[B]), RendererConfig::default());
    source.pin(0).unwrap().connect(sink.sink_pin(), None).unwrap();

    let seeking = sink.seeking().unwrap();
    assert!(matches!(seeking.duration(), Err(Error::NotImplemented(_))));
    assert!(matches!(
        seeking.set_positions(SeekPosition::absolute(0), SeekPosition::none()),
        Err(Error::NotImplemented(_))
    ));
    assert!(matches!(seeking.current_position(), Err(Error::NotImplemented(_))));

    // The last presented time still answers position queries.
    sink.run(RefTime::ZERO).unwrap();
    let delivery = source.pin(0).unwrap().deliver(timed_sample(1000, 1040)).unwrap();
    assert_eq!(delivery, Delivery::Delivered);
    assert_eq!(seeking.current_position().unwrap(), secs(1));
}
