//! Error types for JBIG2 decoding.

/// The main error type for JBIG2 decoding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Errors related to reading raw data.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Errors related to the file or page structure.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// Errors related to segment framing and references.
    #[error(transparent)]
    Segment(#[from] SegmentError),
    /// Errors related to Huffman tables and codes.
    #[error(transparent)]
    Huffman(#[from] HuffmanError),
    /// Errors related to region parameters.
    #[error(transparent)]
    Region(#[from] RegionError),
    /// Errors related to template configuration.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// Errors related to symbol handling.
    #[error(transparent)]
    Symbol(#[from] SymbolError),
    /// A feature of the format that this decoder does not implement.
    #[error(transparent)]
    Unsupported(#[from] Unsupported),
    /// Arithmetic overflow while computing coordinates or sizes.
    #[error("arithmetic overflow")]
    Overflow,
}

/// Errors related to reading raw data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A bit or byte was read past the end of the available data.
    #[error("unexpected end of input")]
    UnexpectedEof,
}

/// Errors related to the file or page structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// Invalid file header signature.
    #[error("invalid JBIG2 file header")]
    InvalidHeader,
    /// Reserved bits are not zero.
    #[error("reserved bits must be zero")]
    ReservedBits,
    /// A region segment appeared before any page information segment.
    #[error("missing page information segment")]
    MissingPageInfo,
    /// The page would exceed the configured pixel limit.
    #[error("page exceeds the configured pixel limit")]
    PageTooLarge,
}

/// Errors related to segment framing and references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    /// Unknown or reserved segment type.
    #[error("unknown or reserved segment type {0}")]
    UnknownType(u8),
    /// The short-form referred-to segment count was 5 or 6.
    #[error("invalid referred-to segment count")]
    InvalidReferredCount,
    /// A segment refers to a segment number that is not smaller than its own.
    #[error("segment {segment} refers to segment {referred}, which is not smaller")]
    ForwardReference {
        /// The referring segment.
        segment: u32,
        /// The referred-to segment number.
        referred: u32,
    },
    /// A referred-to segment has not been decoded.
    #[error("segment {0} was referred to but has not been decoded")]
    UnresolvedReference(u32),
    /// A referred-to segment has the wrong kind for its use.
    #[error("referred-to segment {0} has an unexpected kind")]
    UnexpectedReference(u32),
    /// Missing end marker for an unknown-length region.
    #[error("missing end marker for unknown-length region")]
    MissingEndMarker,
    /// A halftone region referred to no pattern dictionary.
    #[error("missing required pattern dictionary")]
    MissingPatternDictionary,
    /// A segment with unknown data length that is not an immediate generic region.
    #[error("unknown data length is only valid for immediate generic regions")]
    InvalidUnknownLength,
}

/// Errors related to Huffman tables and codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HuffmanError {
    /// No table entry matched the code read from the stream.
    #[error("invalid Huffman code")]
    InvalidCode,
    /// A reserved table selector value was used.
    #[error("invalid Huffman table selection")]
    InvalidSelection,
    /// A custom table was selected but not enough table segments were referred to.
    #[error("not enough referred Huffman tables")]
    MissingTables,
    /// An out-of-band value was decoded where none is allowed.
    #[error("unexpected out-of-band value")]
    UnexpectedOob,
    /// A custom table segment is malformed.
    #[error("invalid custom Huffman table")]
    InvalidTable,
}

/// Errors related to region parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    /// Invalid combination operator value.
    #[error("invalid combination operator")]
    InvalidCombinationOperator,
    /// Region with an invalid dimension.
    #[error("invalid dimension value")]
    InvalidDimension,
    /// Gray-scale value exceeds the pattern count.
    #[error("gray-scale value exceeds pattern count")]
    GrayScaleOutOfRange,
    /// The reference bitmap of a refinement region is missing.
    #[error("missing reference bitmap")]
    MissingReference,
    /// An unknown-length region did not declare a valid row count.
    #[error("invalid row count for unknown-length region")]
    InvalidRowCount,
    /// The Group 4 decoder rejected MMR-coded data.
    #[error("invalid MMR-coded data")]
    InvalidMmrData,
}

/// Errors related to template configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// An invalid template value was used.
    #[error("invalid template value")]
    Invalid,
    /// Invalid adaptive template pixel location.
    #[error("invalid adaptive template pixel location")]
    InvalidAtPixel,
}

/// Errors related to symbol handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// No symbols available for a text region.
    #[error("no symbols available")]
    NoSymbols,
    /// More symbols or symbol instances were decoded than declared.
    #[error("more symbols decoded than declared")]
    TooManySymbols,
    /// The exported symbol count differs from the declared count.
    #[error("symbol dictionary exports {actual} symbols but declares {declared}")]
    InconsistentCount {
        /// Count from the dictionary header.
        declared: u32,
        /// Count produced by the export flags.
        actual: u32,
    },
    /// Symbol ID out of valid range.
    #[error("symbol ID out of range")]
    OutOfRange,
    /// Unexpected out-of-band value.
    #[error("unexpected out-of-band value")]
    UnexpectedOob,
    /// An invalid symbol was encountered.
    #[error("invalid symbol encountered")]
    Invalid,
}

/// Features that are recognized but not implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Unsupported {
    /// The colour extension flag of a region segment.
    #[error("unsupported feature: colour extension")]
    ColourExtension,
    /// Generic regions using the extended 12-pixel template.
    #[error("unsupported feature: extended generic template")]
    ExtendedTemplate,
    /// MMR-coded bitmaps wider or taller than the Group 4 decoder allows.
    #[error("unsupported feature: MMR bitmap larger than 65535 pixels")]
    MmrDimensions,
}

/// The broad class an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A read went past the end of the data.
    StreamExhausted,
    /// A segment header or file header is malformed.
    MalformedHeader,
    /// A segment refers to a segment that is not available.
    UnresolvedReference,
    /// A symbol dictionary's declared and actual symbol counts differ.
    InconsistentSymbolCount,
    /// The data uses a feature that is not implemented.
    UnsupportedFeature,
    /// The segment data is otherwise invalid.
    InvalidData,
}

impl DecodeError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(ParseError::UnexpectedEof) => ErrorKind::StreamExhausted,
            Self::Format(FormatError::InvalidHeader | FormatError::ReservedBits) => {
                ErrorKind::MalformedHeader
            }
            Self::Segment(
                SegmentError::UnknownType(_)
                | SegmentError::InvalidReferredCount
                | SegmentError::InvalidUnknownLength
                | SegmentError::MissingEndMarker,
            ) => ErrorKind::MalformedHeader,
            Self::Segment(
                SegmentError::ForwardReference { .. } | SegmentError::UnresolvedReference(_),
            ) => ErrorKind::UnresolvedReference,
            Self::Symbol(SymbolError::InconsistentCount { .. }) => {
                ErrorKind::InconsistentSymbolCount
            }
            Self::Unsupported(_) => ErrorKind::UnsupportedFeature,
            _ => ErrorKind::InvalidData,
        }
    }

    /// Whether a region segment failing with this error may be skipped while
    /// the rest of the page is still assembled.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidData | ErrorKind::InconsistentSymbolCount
        )
    }
}

/// Result type for JBIG2 decoding operations.
pub type Result<T> = core::result::Result<T, DecodeError>;

macro_rules! bail {
    ($err:expr) => {
        return Err($err.into())
    };
}

pub(crate) use bail;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let eof: DecodeError = ParseError::UnexpectedEof.into();
        assert_eq!(eof.kind(), ErrorKind::StreamExhausted);
        assert!(!eof.is_recoverable());

        let forward: DecodeError = SegmentError::ForwardReference {
            segment: 3,
            referred: 7,
        }
        .into();
        assert_eq!(forward.kind(), ErrorKind::UnresolvedReference);
        assert!(!forward.is_recoverable());

        let unsupported: DecodeError = Unsupported::ExtendedTemplate.into();
        assert_eq!(unsupported.kind(), ErrorKind::UnsupportedFeature);

        let symbol: DecodeError = SymbolError::OutOfRange.into();
        assert_eq!(symbol.kind(), ErrorKind::InvalidData);
        assert!(symbol.is_recoverable());
    }

    #[test]
    fn display() {
        let error: DecodeError = SegmentError::UnresolvedReference(12).into();
        assert_eq!(
            error.to_string(),
            "segment 12 was referred to but has not been decoded"
        );
    }
}
