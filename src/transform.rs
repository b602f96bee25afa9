//! Transform: a filter with one sink pin and one source pin.
//!
//! Each sample received on "In" is converted into a fresh buffer from the
//! output allocator and delivered on "Out". End of stream, flushes and new
//! segments are passed downstream after the hooks see them; quality messages
//! arriving on "Out" go upstream unless the hooks handle them. Seeking on
//! the filter or its output pin is passed through to the input's peer.

use std::ops::Deref;
use std::sync::{Arc, Weak};

use tracing::trace;

use crate::allocator::{AllocatorProperties, BufferFlags};
use crate::error::{Error, Result};
use crate::filter::{Delivery, Filter, FilterCore, FilterGuard, FilterOps, buffer_size_for};
use crate::format::MediaType;
use crate::pin::{Pin, PinDirection, PinTemplate};
use crate::quality::Quality;
use crate::sample::{Sample, Segment};
use crate::seeking::{MediaSeeking, SeekingPassThrough};

const INPUT: usize = 0;
const OUTPUT: usize = 1;

/// What `transform` did with a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformOutcome {
    /// Deliver the output sample downstream.
    Deliver,
    /// Consume the input without producing output.
    Skip,
}

/// What a concrete transform supplies.
///
/// `check_input_type`, `check_output_type` and `transform` are required.
pub trait TransformHooks: Send + Sync + 'static {
    /// Type tag for filters built from these hooks.
    const CLASS_ID: &'static str = "transform";

    fn check_input_type(&self, media_type: &MediaType) -> Result<()>;

    /// Whether `output` can be produced from `input` (`None` while the
    /// input is unconnected).
    fn check_output_type(&self, input: Option<&MediaType>, output: &MediaType) -> Result<()>;

    /// Preferred output types for the current input, in order.
    fn output_type(&self, input: Option<&MediaType>, index: usize) -> Option<MediaType> {
        let _ = (input, index);
        None
    }

    /// Preferred input types, in order.
    fn input_type(&self, index: usize) -> Option<MediaType> {
        let _ = index;
        None
    }

    /// Output allocator properties for `output`, given the downstream
    /// requirements.
    fn decide_buffer_size(
        &self,
        output: &MediaType,
        requirements: &AllocatorProperties,
    ) -> Result<AllocatorProperties> {
        Ok(buffer_size_for(Some(output), requirements))
    }

    /// Fill `output` from `input`. Timing and flags are already copied.
    fn transform(&self, input: &Sample, output: &mut Sample) -> Result<TransformOutcome>;

    /// A pin was connected with `media_type`.
    fn set_media_type(&self, direction: PinDirection, media_type: &MediaType) -> Result<()> {
        let _ = (direction, media_type);
        Ok(())
    }

    fn break_connect(&self, direction: PinDirection) -> Result<()> {
        let _ = direction;
        Ok(())
    }

    /// Stopped to Paused.
    fn start_streaming(&self) -> Result<()> {
        Ok(())
    }

    /// Back to Stopped.
    fn stop_streaming(&self) -> Result<()> {
        Ok(())
    }

    fn end_of_stream(&self) -> Result<()> {
        Ok(())
    }

    fn begin_flush(&self) -> Result<()> {
        Ok(())
    }

    fn end_flush(&self) -> Result<()> {
        Ok(())
    }

    fn new_segment(&self, segment: &Segment) -> Result<()> {
        let _ = segment;
        Ok(())
    }

    /// Handle a quality message from downstream. `None` passes it upstream.
    fn notify_quality(&self, quality: &Quality) -> Option<Result<()>> {
        let _ = quality;
        None
    }
}

struct TransformOps<H> {
    hooks: Arc<H>,
    filter: Weak<Filter>,
    passthru: Arc<SeekingPassThrough>,
}

impl<H: TransformHooks> TransformOps<H> {
    fn input_media_type(&self) -> Option<MediaType> {
        self.filter
            .upgrade()?
            .pin(INPUT)?
            .connection_media_type()
            .ok()
    }

    fn output<'a>(&self, filter: &'a Filter) -> Option<&'a Arc<Pin>> {
        filter.pin(OUTPUT).filter(|p| p.is_connected())
    }

    /// The output's media type list follows the input connection.
    fn input_changed(&self, pin: &Pin) {
        if pin.direction() != PinDirection::Input {
            return;
        }
        if let Some(filter) = self.filter.upgrade() {
            filter.increment_pin_version();
        }
    }
}

impl<H: TransformHooks> FilterOps for TransformOps<H> {
    fn check_media_type(&self, pin: &Pin, media_type: &MediaType) -> Result<()> {
        match pin.direction() {
            PinDirection::Input => self.hooks.check_input_type(media_type),
            PinDirection::Output => {
                let input = self.input_media_type();
                self.hooks.check_output_type(input.as_ref(), media_type)
            }
        }
    }

    fn media_type(&self, pin: &Pin, index: usize) -> Option<MediaType> {
        match pin.direction() {
            PinDirection::Input => self.hooks.input_type(index),
            PinDirection::Output => {
                let input = self.input_media_type();
                self.hooks.output_type(input.as_ref(), index)
            }
        }
    }

    fn complete_connect(&self, pin: &Pin, media_type: &MediaType) -> Result<()> {
        self.hooks.set_media_type(pin.direction(), media_type)?;
        self.input_changed(pin);
        Ok(())
    }

    fn break_connect(&self, pin: &Pin) -> Result<()> {
        self.input_changed(pin);
        self.hooks.break_connect(pin.direction())
    }

    fn decide_buffer_size(
        &self,
        pin: &Pin,
        requirements: &AllocatorProperties,
    ) -> Result<AllocatorProperties> {
        let output = pin.connection_media_type()?;
        self.hooks.decide_buffer_size(&output, requirements)
    }

    fn init_streaming(&self, _filter: &Filter, _core: &FilterCore) -> Result<()> {
        self.hooks.start_streaming()
    }

    fn cleanup_streaming(&self, _filter: &Filter, _core: &FilterCore) -> Result<()> {
        self.hooks.stop_streaming()
    }

    fn receive(
        &self,
        filter: &Filter,
        _pin: &Pin,
        guard: FilterGuard<'_>,
        sample: Sample,
    ) -> Result<Delivery> {
        let output = self.output(filter).ok_or(Error::NotConnected)?;

        let (start, stop) = sample.time().unzip();
        let mut out = output.get_delivery_buffer(start, stop, BufferFlags::NONE)?;
        out.copy_properties_from(&sample);

        match self.hooks.transform(&sample, &mut out)? {
            TransformOutcome::Deliver => {
                let delivery = output.deliver(out);
                drop(guard);
                delivery
            }
            TransformOutcome::Skip => {
                trace!(filter = %filter.name(), "transform skipped sample");
                Ok(Delivery::Delivered)
            }
        }
    }

    fn receive_can_block(&self, _pin: &Pin) -> bool {
        match self.filter.upgrade() {
            Some(filter) => self
                .output(&filter)
                .and_then(|p| p.connected_to().ok())
                .is_none_or(|peer| peer.receive_can_block()),
            None => true,
        }
    }

    fn end_of_stream(&self, filter: &Filter, _pin: &Pin) -> Result<Delivery> {
        self.hooks.end_of_stream()?;
        match self.output(filter) {
            Some(output) => output.deliver_end_of_stream(),
            None => Ok(Delivery::Delivered),
        }
    }

    fn begin_flush(&self, filter: &Filter, _pin: &Pin) -> Result<()> {
        self.hooks.begin_flush()?;
        match self.output(filter) {
            Some(output) => output.deliver_begin_flush(),
            None => Ok(()),
        }
    }

    fn end_flush(&self, filter: &Filter, _pin: &Pin) -> Result<()> {
        self.hooks.end_flush()?;
        match self.output(filter) {
            Some(output) => output.deliver_end_flush(),
            None => Ok(()),
        }
    }

    fn new_segment(&self, filter: &Filter, _pin: &Pin, segment: &Segment) -> Result<()> {
        self.hooks.new_segment(segment)?;
        match self.output(filter) {
            Some(output) => output.deliver_new_segment(*segment),
            None => Ok(()),
        }
    }

    fn notify_quality(&self, _filter: &Filter, _pin: &Pin, quality: &Quality) -> Option<Result<()>> {
        self.hooks.notify_quality(quality)
    }

    fn seeking(&self, pin: Option<&Pin>) -> Option<Arc<dyn MediaSeeking>> {
        match pin.map(Pin::direction) {
            None | Some(PinDirection::Output) => {
                Some(Arc::clone(&self.passthru) as Arc<dyn MediaSeeking>)
            }
            Some(PinDirection::Input) => None,
        }
    }
}

/// A transform filter. Derefs to its [`Filter`].
pub struct Transform<H> {
    filter: Arc<Filter>,
    hooks: Arc<H>,
}

impl<H> Clone for Transform<H> {
    fn clone(&self) -> Self {
        Self {
            filter: Arc::clone(&self.filter),
            hooks: Arc::clone(&self.hooks),
        }
    }
}

impl<H: TransformHooks> Transform<H> {
    /// Create a transform with pins "In" and "Out".
    pub fn new(name: impl Into<String>, hooks: H) -> Self {
        let hooks = Arc::new(hooks);
        let ops_hooks = Arc::clone(&hooks);
        let filter = Filter::new_cyclic(
            name,
            H::CLASS_ID,
            [PinTemplate::input("In"), PinTemplate::output("Out")],
            move |weak| -> Box<dyn FilterOps> {
                Box::new(TransformOps {
                    hooks: ops_hooks,
                    filter: weak.clone(),
                    passthru: Arc::new(SeekingPassThrough::new(weak.clone(), INPUT, false)),
                })
            },
        );
        Self { filter, hooks }
    }

    pub fn filter(&self) -> &Arc<Filter> {
        &self.filter
    }

    pub fn input_pin(&self) -> &Arc<Pin> {
        &self.filter.pins()[INPUT]
    }

    pub fn output_pin(&self) -> &Arc<Pin> {
        &self.filter.pins()[OUTPUT]
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }
}

impl<H> Deref for Transform<H> {
    type Target = Filter;

    fn deref(&self) -> &Filter {
        &self.filter
    }
}

impl<H> std::fmt::Debug for Transform<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transform").field("filter", &self.filter).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FourCc, MajorType};

    const YUY2: FourCc = FourCc::new(b"YUY2");
    const RGB3: FourCc = FourCc::new(b"RGB3");

    struct Converter;

    impl TransformHooks for Converter {
        const CLASS_ID: &'static str = "yuy2-to-rgb";

        fn check_input_type(&self, mt: &MediaType) -> Result<()> {
            if mt.subtype == Some(YUY2) {
                Ok(())
            } else {
                Err(Error::TypeNotAccepted)
            }
        }

        fn check_output_type(&self, input: Option<&MediaType>, output: &MediaType) -> Result<()> {
            match input {
                Some(_) if output.subtype == Some(RGB3) => Ok(()),
                _ => Err(Error::TypeNotAccepted),
            }
        }

        fn output_type(&self, input: Option<&MediaType>, index: usize) -> Option<MediaType> {
            input?;
            (index == 0).then(|| MediaType::new(MajorType::Video, RGB3))
        }

        fn input_type(&self, index: usize) -> Option<MediaType> {
            (index == 0).then(|| MediaType::new(MajorType::Video, YUY2))
        }

        fn transform(&self, input: &Sample, output: &mut Sample) -> Result<TransformOutcome> {
            output.fill(input.data())?;
            Ok(TransformOutcome::Deliver)
        }
    }

    #[test]
    fn test_transform_shape() {
        let transform = Transform::new("convert", Converter);
        assert_eq!(transform.class_id(), "yuy2-to-rgb");
        assert_eq!(transform.input_pin().name(), "In");
        assert_eq!(transform.input_pin().direction(), PinDirection::Input);
        assert_eq!(transform.output_pin().name(), "Out");
        assert_eq!(transform.output_pin().direction(), PinDirection::Output);
    }

    #[test]
    fn test_output_types_follow_input() {
        let transform = Transform::new("convert", Converter);
        assert_eq!(transform.output_pin().enum_media_types().count(), 0);
        assert!(!transform
            .output_pin()
            .query_accept(&MediaType::new(MajorType::Video, RGB3)));

        let input_types: Vec<_> = transform.input_pin().enum_media_types().collect();
        assert_eq!(input_types, [MediaType::new(MajorType::Video, YUY2)]);
        assert!(transform
            .input_pin()
            .query_accept(&MediaType::new(MajorType::Video, YUY2)));
    }

    #[test]
    fn test_seeking_exposed_on_output_only() {
        let transform = Transform::new("convert", Converter);
        assert!(transform.seeking().is_some());
        assert!(transform.output_pin().seeking().is_some());
        assert!(transform.input_pin().seeking().is_none());
        assert_eq!(
            transform.seeking().unwrap().duration().unwrap_err(),
            Error::NotConnected
        );
    }

    #[test]
    fn test_flush_without_downstream() {
        let transform = Transform::new("convert", Converter);
        let ops = transform.ops();
        ops.begin_flush(&transform, transform.input_pin()).unwrap();
        ops.end_flush(&transform, transform.input_pin()).unwrap();
        assert_eq!(
            ops.end_of_stream(&transform, transform.input_pin()).unwrap(),
            Delivery::Delivered
        );
    }
}
