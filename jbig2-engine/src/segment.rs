//! Segment header framing (7.2) and segment kinds (7.3).

use smallvec::SmallVec;

use crate::error::{Result, SegmentError, bail};
use crate::reader::Reader;

/// The kind of a segment, taken from the low six bits of its header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SegmentType {
    /// 0
    SymbolDictionary,
    /// 4
    IntermediateTextRegion,
    /// 6
    ImmediateTextRegion,
    /// 7
    ImmediateLosslessTextRegion,
    /// 16
    PatternDictionary,
    /// 20
    IntermediateHalftoneRegion,
    /// 22
    ImmediateHalftoneRegion,
    /// 23
    ImmediateLosslessHalftoneRegion,
    /// 36
    IntermediateGenericRegion,
    /// 38
    ImmediateGenericRegion,
    /// 39
    ImmediateLosslessGenericRegion,
    /// 40
    IntermediateRefinementRegion,
    /// 42
    ImmediateRefinementRegion,
    /// 43
    ImmediateLosslessRefinementRegion,
    /// 48
    PageInformation,
    /// 49
    EndOfPage,
    /// 50
    EndOfStripe,
    /// 51
    EndOfFile,
    /// 52
    Profiles,
    /// 53
    Tables,
    /// 54
    ColourPalette,
    /// 62
    Extension,
}

impl SegmentType {
    pub(crate) fn from_value(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::SymbolDictionary,
            4 => Self::IntermediateTextRegion,
            6 => Self::ImmediateTextRegion,
            7 => Self::ImmediateLosslessTextRegion,
            16 => Self::PatternDictionary,
            20 => Self::IntermediateHalftoneRegion,
            22 => Self::ImmediateHalftoneRegion,
            23 => Self::ImmediateLosslessHalftoneRegion,
            36 => Self::IntermediateGenericRegion,
            38 => Self::ImmediateGenericRegion,
            39 => Self::ImmediateLosslessGenericRegion,
            40 => Self::IntermediateRefinementRegion,
            42 => Self::ImmediateRefinementRegion,
            43 => Self::ImmediateLosslessRefinementRegion,
            48 => Self::PageInformation,
            49 => Self::EndOfPage,
            50 => Self::EndOfStripe,
            51 => Self::EndOfFile,
            52 => Self::Profiles,
            53 => Self::Tables,
            54 => Self::ColourPalette,
            62 => Self::Extension,
            other => bail!(SegmentError::UnknownType(other)),
        })
    }

    /// Whether the segment's region is drawn onto the page right away.
    pub(crate) fn is_immediate(self) -> bool {
        matches!(
            self,
            Self::ImmediateTextRegion
                | Self::ImmediateLosslessTextRegion
                | Self::ImmediateHalftoneRegion
                | Self::ImmediateLosslessHalftoneRegion
                | Self::ImmediateGenericRegion
                | Self::ImmediateLosslessGenericRegion
                | Self::ImmediateRefinementRegion
                | Self::ImmediateLosslessRefinementRegion
        )
    }
}

/// A parsed segment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SegmentHeader {
    /// The segment number.
    pub(crate) number: u32,
    /// The segment kind.
    pub(crate) segment_type: SegmentType,
    /// Whether the page association is stored in four bytes.
    pub(crate) page_association_long: bool,
    /// The "deferred non-retain" flag.
    pub(crate) deferred_non_retain: bool,
    /// The retention bits: bit 0 for this segment, bit `i + 1` for the `i`-th
    /// referred-to segment.
    pub(crate) retention_flags: SmallVec<[u8; 1]>,
    /// Referred-to segment numbers, all smaller than `number`.
    pub(crate) referred_segments: SmallVec<[u32; 4]>,
    /// The page this segment belongs to, 0 for global segments.
    pub(crate) page_association: u32,
    /// Length of the data part, `None` when it was declared unknown.
    pub(crate) data_length: Option<u32>,
}

/// A segment header together with its data.
#[derive(Debug, Clone)]
pub(crate) struct Segment<'a> {
    pub(crate) header: SegmentHeader,
    pub(crate) data: &'a [u8],
}

/// Parse a segment header.
pub(crate) fn parse_segment_header(reader: &mut Reader<'_>) -> Result<SegmentHeader> {
    let number = reader.read_u32()?;

    let flags = reader.read_byte()?;
    let segment_type = SegmentType::from_value(flags & 0x3F)?;
    let page_association_long = flags & 0x40 != 0;
    let deferred_non_retain = flags & 0x80 != 0;

    let count_and_retention = reader.read_byte()?;
    let short_count = count_and_retention >> 5;

    let mut retention_flags = SmallVec::new();
    let referred_count = match short_count {
        0..=4 => {
            retention_flags.push(count_and_retention & 0x1F);
            u32::from(short_count)
        }
        7 => {
            let rest = reader.read_bytes(3)?;
            let count = u32::from_be_bytes([count_and_retention & 0x1F, rest[0], rest[1], rest[2]]);
            let retention_len = (count as usize + 1).div_ceil(8);
            retention_flags.extend_from_slice(reader.read_bytes(retention_len)?);
            count
        }
        _ => bail!(SegmentError::InvalidReferredCount),
    };

    let mut referred_segments = SmallVec::with_capacity(referred_count.min(64) as usize);
    for _ in 0..referred_count {
        let referred = if number <= 256 {
            u32::from(reader.read_byte()?)
        } else if number <= 65536 {
            u32::from(reader.read_u16()?)
        } else {
            reader.read_u32()?
        };

        if referred >= number {
            bail!(SegmentError::ForwardReference {
                segment: number,
                referred,
            });
        }

        referred_segments.push(referred);
    }

    let page_association = if page_association_long {
        reader.read_u32()?
    } else {
        u32::from(reader.read_byte()?)
    };

    // Some writers end the stream right after the header of the final
    // end-of-file segment.
    let data_length = if segment_type == SegmentType::EndOfFile && reader.at_end() {
        Some(0)
    } else {
        match reader.read_u32()? {
            0xFFFF_FFFF => {
                if !matches!(
                    segment_type,
                    SegmentType::ImmediateGenericRegion
                        | SegmentType::ImmediateLosslessGenericRegion
                ) {
                    bail!(SegmentError::InvalidUnknownLength);
                }
                None
            }
            length => Some(length),
        }
    };

    Ok(SegmentHeader {
        number,
        segment_type,
        page_association_long,
        deferred_non_retain,
        retention_flags,
        referred_segments,
        page_association,
        data_length,
    })
}

/// Read the data part that follows `header`.
pub(crate) fn read_segment_data<'a>(
    reader: &mut Reader<'a>,
    header: SegmentHeader,
) -> Result<Segment<'a>> {
    let length = match header.data_length {
        Some(length) => length as usize,
        None => unknown_region_length(reader.tail())?,
    };

    Ok(Segment {
        data: reader.read_bytes(length)?,
        header,
    })
}

/// Parse a header and its data, as laid out in embedded streams and in the
/// sequential file organisation.
pub(crate) fn parse_segment<'a>(reader: &mut Reader<'a>) -> Result<Segment<'a>> {
    let header = parse_segment_header(reader)?;
    read_segment_data(reader, header)
}

/// Parse segments until the data ends or an end-of-file segment is found.
pub(crate) fn parse_segments<'a>(reader: &mut Reader<'a>) -> Result<Vec<Segment<'a>>> {
    let mut segments = Vec::new();

    while !reader.at_end() {
        let segment = parse_segment(reader)?;
        let is_eof = segment.header.segment_type == SegmentType::EndOfFile;
        segments.push(segment);

        if is_eof {
            break;
        }
    }

    Ok(segments)
}

/// Find the length of an immediate generic region whose header declared an
/// unknown length (7.2.7).
///
/// The data consists of the region info (17 bytes), the flags byte, the coded
/// bitmap ending in `00 00` (MMR) or `FF AC` (arithmetic), and a four-byte row
/// count.
fn unknown_region_length(data: &[u8]) -> Result<usize> {
    const HEADER_LEN: usize = 18;

    let Some(&flags) = data.get(HEADER_LEN - 1) else {
        bail!(SegmentError::MissingEndMarker);
    };

    let marker: [u8; 2] = if flags & 0x01 != 0 {
        [0x00, 0x00]
    } else {
        [0xFF, 0xAC]
    };

    data.get(HEADER_LEN..)
        .and_then(|coded| coded.windows(2).position(|w| w == marker))
        .map(|offset| HEADER_LEN + offset + 2 + 4)
        .filter(|&length| length <= data.len())
        .ok_or_else(|| SegmentError::MissingEndMarker.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, ErrorKind};

    #[test]
    fn symbol_dictionary_header() {
        let data = [0x00, 0x00, 0x00, 0x09, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x1B];
        let header = parse_segment_header(&mut Reader::new(&data)).unwrap();

        assert_eq!(header.number, 9);
        assert_eq!(header.segment_type, SegmentType::SymbolDictionary);
        assert!(!header.page_association_long);
        assert!(header.referred_segments.is_empty());
        assert_eq!(header.page_association, 2);
        assert_eq!(header.data_length, Some(27));
    }

    #[test]
    fn short_form_references() {
        // 7.2.8, example 1.
        let data = [
            0x00, 0x00, 0x00, 0x20, 0x86, 0x6B, 0x02, 0x1E, 0x05, 0x04, 0x00, 0x00, 0x00, 0x10,
        ];
        let header = parse_segment_header(&mut Reader::new(&data)).unwrap();

        assert_eq!(header.number, 32);
        assert_eq!(header.segment_type, SegmentType::ImmediateTextRegion);
        assert!(header.deferred_non_retain);
        assert_eq!(header.referred_segments.as_slice(), &[2, 30, 5]);
        assert_eq!(header.retention_flags.as_slice(), &[0x0B]);
        assert_eq!(header.page_association, 4);
        assert_eq!(header.data_length, Some(16));
    }

    #[test]
    fn long_form_references() {
        // 7.2.8, example 2.
        let data = [
            0x00, 0x00, 0x02, 0x34, 0x40, 0xE0, 0x00, 0x00, 0x09, 0x02, 0xFD, 0x01, 0x00, 0x00,
            0x02, 0x00, 0x1E, 0x00, 0x05, 0x02, 0x00, 0x02, 0x01, 0x02, 0x02, 0x02, 0x03, 0x02,
            0x04, 0x00, 0x00, 0x04, 0x01, 0x00, 0x00, 0x00, 0x20,
        ];
        let header = parse_segment_header(&mut Reader::new(&data)).unwrap();

        assert_eq!(header.number, 564);
        assert_eq!(header.segment_type, SegmentType::SymbolDictionary);
        assert!(header.page_association_long);
        assert_eq!(
            header.referred_segments.as_slice(),
            &[256, 2, 30, 5, 512, 513, 514, 515, 516]
        );
        assert_eq!(header.retention_flags.as_slice(), &[0x02, 0xFD]);
        assert_eq!(header.page_association, 1025);
        assert_eq!(header.data_length, Some(32));
    }

    #[test]
    fn forward_reference_is_rejected() {
        // Segment 3, immediate text region, referring to segment 7.
        let data = [0x00, 0x00, 0x00, 0x03, 0x06, 0x20, 0x07, 0x01, 0x00, 0x00, 0x00, 0x00];
        let error = parse_segment_header(&mut Reader::new(&data)).unwrap_err();

        assert_eq!(
            error,
            DecodeError::Segment(SegmentError::ForwardReference {
                segment: 3,
                referred: 7,
            })
        );
        assert_eq!(error.kind(), ErrorKind::UnresolvedReference);
    }

    #[test]
    fn illegal_reference_counts() {
        for count in [5_u8, 6] {
            let data = [0, 0, 0, 9, 0x00, count << 5, 0, 0, 0, 0, 0];
            assert_eq!(
                parse_segment_header(&mut Reader::new(&data)).unwrap_err(),
                DecodeError::Segment(SegmentError::InvalidReferredCount)
            );
        }
    }

    #[test]
    fn reserved_types_are_rejected() {
        let data = [0, 0, 0, 1, 0x01, 0, 1, 0, 0, 0, 0];
        assert_eq!(
            parse_segment_header(&mut Reader::new(&data)).unwrap_err(),
            DecodeError::Segment(SegmentError::UnknownType(1))
        );
    }

    #[test]
    fn unknown_length_only_for_immediate_generic_regions() {
        let data = [0, 0, 0, 1, 0x24, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(
            parse_segment_header(&mut Reader::new(&data)).unwrap_err(),
            DecodeError::Segment(SegmentError::InvalidUnknownLength)
        );
    }

    #[test]
    fn unknown_length_is_found_by_scanning() {
        let mut data = vec![0, 0, 0, 1, 0x26, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF];
        let header_len = data.len();
        // Region info, flags (arithmetic), coded data, marker, row count.
        data.extend_from_slice(&[0; 17]);
        data.push(0x00);
        data.extend_from_slice(&[0x12, 0x34, 0xFF, 0x00, 0x56, 0xFF, 0xAC]);
        data.extend_from_slice(&[0, 0, 0, 3]);
        data.extend_from_slice(&[0, 0, 0, 2, 0x33, 0, 1, 0, 0, 0, 0]);

        let mut reader = Reader::new(&data);
        let segments = parse_segments(&mut reader).unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].header.data_length, None);
        assert_eq!(segments[0].data.len(), 18 + 7 + 4);
        assert_eq!(segments[0].data, &data[header_len..header_len + 29]);
        assert_eq!(segments[1].header.segment_type, SegmentType::EndOfFile);
    }

    #[test]
    fn final_end_of_file_may_omit_its_length() {
        let data = [0, 0, 0, 4, 0x33, 0x00, 0x00];
        let segments = parse_segments(&mut Reader::new(&data)).unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].header.data_length, Some(0));
    }
}
