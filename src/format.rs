//! Media type descriptions exchanged during pin negotiation.
//!
//! A [`MediaType`] names a major type, a subtype and a format block. Any of
//! the major type, subtype or format type may be left unset, which makes the
//! media type *partial*: it then acts as a pattern that a complete type
//! [`matches`](MediaType::matches) when every set field agrees.
//!
//! ```rust
//! use strmbase::format::{FourCc, MajorType, MediaType};
//!
//! let rgb = MediaType::new(MajorType::Video, FourCc::new(b"RGB3"));
//! let any_video = MediaType::any().with_major(MajorType::Video);
//!
//! assert!(any_video.is_partial());
//! assert!(rgb.matches(&any_video));
//! ```

use bytes::Bytes;

// ============================================================================
// FourCc
// ============================================================================

/// A four-character code identifying a subtype or custom format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    /// Create from four ASCII bytes.
    #[inline]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// The code as a little-endian integer.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl std::fmt::Display for FourCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FourCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

// ============================================================================
// Major and format types
// ============================================================================

/// Broad category of a media stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MajorType {
    Video,
    Audio,
    Text,
    Midi,
    /// Unparsed byte stream.
    Stream,
    Other(FourCc),
}

/// Layout of a media type's format block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormatType {
    /// No format block.
    None,
    VideoInfo,
    VideoInfo2,
    WaveFormatEx,
    Mpeg1Video,
    Mpeg2Video,
    Other(FourCc),
}

// ============================================================================
// MediaType
// ============================================================================

/// A media type proposed or agreed on a connection.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct MediaType {
    /// Major type; `None` is a wildcard.
    pub major: Option<MajorType>,
    /// Subtype; `None` is a wildcard.
    pub subtype: Option<FourCc>,
    /// Format block layout; `None` is a wildcard.
    pub format_type: Option<FormatType>,
    /// All samples have `sample_size` bytes.
    pub fixed_size_samples: bool,
    /// Samples depend on earlier samples.
    pub temporal_compression: bool,
    /// Size of each sample when `fixed_size_samples` is set, else 0.
    pub sample_size: u32,
    /// Opaque format block.
    pub format: Bytes,
}

impl MediaType {
    /// Create a complete media type with no format block.
    pub fn new(major: MajorType, subtype: FourCc) -> Self {
        Self {
            major: Some(major),
            subtype: Some(subtype),
            format_type: Some(FormatType::None),
            ..Self::default()
        }
    }

    /// A fully wildcarded media type.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_major(mut self, major: MajorType) -> Self {
        self.major = Some(major);
        self
    }

    pub fn with_subtype(mut self, subtype: FourCc) -> Self {
        self.subtype = Some(subtype);
        self
    }

    /// Set the format block and its layout.
    pub fn with_format(mut self, format_type: FormatType, format: impl Into<Bytes>) -> Self {
        self.format_type = Some(format_type);
        self.format = format.into();
        self
    }

    /// Mark samples as fixed size.
    pub fn with_sample_size(mut self, size: u32) -> Self {
        self.fixed_size_samples = true;
        self.sample_size = size;
        self
    }

    pub fn with_temporal_compression(mut self, compressed: bool) -> Self {
        self.temporal_compression = compressed;
        self
    }

    /// True when the major type or subtype is a wildcard.
    #[inline]
    pub fn is_partial(&self) -> bool {
        self.major.is_none() || self.subtype.is_none()
    }

    /// Check whether this type satisfies `pattern`.
    ///
    /// Every field set in `pattern` must be equal here; unset pattern fields
    /// match anything. A format block is only compared when the pattern
    /// carries one.
    pub fn matches(&self, pattern: &MediaType) -> bool {
        fn field<T: PartialEq>(value: &Option<T>, pattern: &Option<T>) -> bool {
            pattern.as_ref().is_none_or(|p| value.as_ref() == Some(p))
        }

        field(&self.major, &pattern.major)
            && field(&self.subtype, &pattern.subtype)
            && field(&self.format_type, &pattern.format_type)
            && (pattern.format.is_empty() || self.format == pattern.format)
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.major {
            Some(MajorType::Other(code)) => write!(f, "{}", code)?,
            Some(major) => write!(f, "{}", format!("{:?}", major).to_lowercase())?,
            None => write!(f, "*")?,
        }
        match self.subtype {
            Some(sub) => write!(f, "/{}", sub),
            None => write!(f, "/*"),
        }
    }
}
