//! Restartable enumerators over pins and media types.
//!
//! Both enumerators remember the owning filter's pin version at creation.
//! If the filter bumps the version, explicit calls fail with
//! `EnumOutOfSync` and iteration ends; `reset` resynchronizes.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::format::MediaType;

use super::Pin;

/// Enumerates a pin's preferred media types in preference order.
#[derive(Clone)]
pub struct MediaTypeEnum {
    pin: Arc<Pin>,
    position: usize,
    version: u32,
}

impl MediaTypeEnum {
    pub(crate) fn new(pin: Arc<Pin>) -> Self {
        let version = pin.filter().map_or(0, |f| f.pin_version());
        Self {
            pin,
            position: 0,
            version,
        }
    }

    fn synced_filter(&self) -> Result<Arc<Filter>> {
        let filter = self.pin.owner()?;
        if filter.pin_version() != self.version {
            return Err(Error::EnumOutOfSync);
        }
        Ok(filter)
    }

    /// Fetch up to `count` media types.
    pub fn next_n(&mut self, count: usize) -> Result<Vec<MediaType>> {
        let filter = self.synced_filter()?;
        let mut types = Vec::with_capacity(count);
        while types.len() < count {
            match filter.ops().media_type(&self.pin, self.position) {
                Some(mt) => {
                    types.push(mt);
                    self.position += 1;
                }
                None => break,
            }
        }
        Ok(types)
    }

    /// Skip `count` media types. Fails with `InvalidArgument` when fewer remain.
    pub fn skip_n(&mut self, count: usize) -> Result<()> {
        let filter = self.synced_filter()?;
        let target = self.position + count;
        if target > 0 && filter.ops().media_type(&self.pin, target - 1).is_none() {
            return Err(Error::InvalidArgument(format!(
                "cannot skip past the last media type (asked for {})",
                count
            )));
        }
        self.position = target;
        Ok(())
    }

    /// Restart from the first type and resynchronize with the filter.
    pub fn reset(&mut self) {
        self.position = 0;
        self.version = self.pin.filter().map_or(0, |f| f.pin_version());
    }
}

impl Iterator for MediaTypeEnum {
    type Item = MediaType;

    fn next(&mut self) -> Option<MediaType> {
        let filter = self.synced_filter().ok()?;
        let mt = filter.ops().media_type(&self.pin, self.position)?;
        self.position += 1;
        Some(mt)
    }
}

/// Enumerates a filter's pins.
#[derive(Clone)]
pub struct PinEnum {
    filter: Arc<Filter>,
    pins: Vec<Arc<Pin>>,
    position: usize,
    version: u32,
}

impl PinEnum {
    pub(crate) fn new(filter: Arc<Filter>) -> Self {
        let pins = filter.pins().to_vec();
        let version = filter.pin_version();
        Self {
            filter,
            pins,
            position: 0,
            version,
        }
    }

    fn check_version(&self) -> Result<()> {
        if self.filter.pin_version() == self.version {
            Ok(())
        } else {
            Err(Error::EnumOutOfSync)
        }
    }

    /// Fetch up to `count` pins.
    pub fn next_n(&mut self, count: usize) -> Result<Vec<Arc<Pin>>> {
        self.check_version()?;
        let end = (self.position + count).min(self.pins.len());
        let pins = self.pins[self.position..end].to_vec();
        self.position = end;
        Ok(pins)
    }

    /// Skip `count` pins. Fails with `InvalidArgument` when fewer remain.
    pub fn skip_n(&mut self, count: usize) -> Result<()> {
        self.check_version()?;
        if self.position + count > self.pins.len() {
            return Err(Error::InvalidArgument(format!(
                "cannot skip {} pins, {} remain",
                count,
                self.pins.len() - self.position
            )));
        }
        self.position += count;
        Ok(())
    }

    /// Restart from the first pin with a fresh snapshot of the pin list.
    pub fn reset(&mut self) {
        self.pins = self.filter.pins().to_vec();
        self.version = self.filter.pin_version();
        self.position = 0;
    }
}

impl Iterator for PinEnum {
    type Item = Arc<Pin>;

    fn next(&mut self) -> Option<Arc<Pin>> {
        self.check_version().ok()?;
        let pin = self.pins.get(self.position)?.clone();
        self.position += 1;
        Some(pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOps;
    use crate::format::{FourCc, MajorType};
    use crate::pin::{PinDirection, PinTemplate};

    struct ThreeTypes;

    impl FilterOps for ThreeTypes {
        fn check_media_type(&self, _pin: &Pin, _mt: &MediaType) -> Result<()> {
            Ok(())
        }

        fn media_type(&self, _pin: &Pin, index: usize) -> Option<MediaType> {
            let subs = [b"AAAA", b"BBBB", b"CCCC"];
            subs.get(index)
                .map(|s| MediaType::new(MajorType::Video, FourCc::new(s)))
        }
    }

    fn filter() -> Arc<Filter> {
        Filter::new(
            "enum",
            "test",
            [
                PinTemplate::input("In"),
                PinTemplate::output("Out"),
                PinTemplate::output("Preview"),
            ],
            ThreeTypes,
        )
    }

    #[test]
    fn test_pin_enum_order() {
        let filter = filter();
        let names: Vec<_> = filter.enum_pins().map(|p| p.name().to_string()).collect();
        assert_eq!(names, ["In", "Out", "Preview"]);
        assert_eq!(
            filter.enum_pins().next().unwrap().direction(),
            PinDirection::Input
        );
    }

    #[test]
    fn test_pin_enum_next_skip_reset() {
        let filter = filter();
        let mut pins = filter.enum_pins();
        assert_eq!(pins.next_n(2).unwrap().len(), 2);
        assert_eq!(pins.next_n(5).unwrap().len(), 1);
        assert!(pins.next_n(1).unwrap().is_empty());
        assert!(pins.skip_n(1).is_err());

        pins.reset();
        pins.skip_n(2).unwrap();
        assert_eq!(pins.next().unwrap().name(), "Preview");
    }

    #[test]
    fn test_pin_enum_out_of_sync() {
        let filter = filter();
        let mut pins = filter.enum_pins();
        filter.increment_pin_version();
        assert_eq!(pins.next_n(1).unwrap_err(), Error::EnumOutOfSync);
        assert!(pins.next().is_none());

        pins.reset();
        assert_eq!(pins.next_n(3).unwrap().len(), 3);
    }

    #[test]
    fn test_media_type_enum() {
        let filter = filter();
        let pin = filter.pin(1).unwrap();
        let mut types = pin.enum_media_types();
        let first = types.next_n(2).unwrap();
        assert_eq!(first[0].subtype, Some(FourCc::new(b"AAAA")));
        assert_eq!(first[1].subtype, Some(FourCc::new(b"BBBB")));

        let mut clone = types.clone();
        assert_eq!(clone.next().unwrap().subtype, Some(FourCc::new(b"CCCC")));
        assert!(clone.next().is_none());

        types.reset();
        assert!(types.skip_n(4).is_err());
        types.skip_n(3).unwrap();
        assert!(types.next().is_none());
    }

    #[test]
    fn test_media_type_enum_out_of_sync() {
        let filter = filter();
        let mut types = filter.pin(0).unwrap().enum_media_types();
        filter.increment_pin_version();
        assert_eq!(types.next_n(1).unwrap_err(), Error::EnumOutOfSync);

        types.reset();
        assert_eq!(types.count(), 3);
    }
}
