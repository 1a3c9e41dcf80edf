//! The standalone file format (Annex D).

use crate::error::{FormatError, Result, bail};
use crate::reader::Reader;
use crate::segment::{
    Segment, SegmentType, parse_segment_header, parse_segments, read_segment_data,
};

/// The eight-byte ID string every standalone file starts with.
const FILE_ID: [u8; 8] = [0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A];

/// How headers and data parts are laid out in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Organization {
    /// Each header is directly followed by its data.
    Sequential,
    /// All headers come first, then all data parts in the same order.
    RandomAccess,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileHeader {
    pub(crate) organization: Organization,
    /// `None` if the page count was unknown when the file was written.
    pub(crate) page_count: Option<u32>,
    pub(crate) uses_extended_templates: bool,
    pub(crate) has_coloured_regions: bool,
}

/// Parse a standalone file into its header and segments, ordered by number.
pub(crate) fn parse_file(data: &[u8]) -> Result<(FileHeader, Vec<Segment<'_>>)> {
    let mut reader = Reader::new(data);
    let header = parse_file_header(&mut reader)?;

    let mut segments = match header.organization {
        Organization::Sequential => parse_segments(&mut reader)?,
        Organization::RandomAccess => parse_random_access(&mut reader)?,
    };
    segments.sort_by_key(|segment| segment.header.number);

    ldebug!(
        "standalone file with {} segments ({:?})",
        segments.len(),
        header.organization
    );

    Ok((header, segments))
}

fn parse_file_header(reader: &mut Reader<'_>) -> Result<FileHeader> {
    if reader.read_bytes(8).ok() != Some(FILE_ID.as_slice()) {
        bail!(FormatError::InvalidHeader);
    }

    let flags = reader.read_byte()?;
    if flags & 0xF0 != 0 {
        bail!(FormatError::ReservedBits);
    }

    let organization = if flags & 0x01 != 0 {
        Organization::Sequential
    } else {
        Organization::RandomAccess
    };

    let page_count = if flags & 0x02 != 0 {
        None
    } else {
        Some(reader.read_u32()?)
    };

    Ok(FileHeader {
        organization,
        page_count,
        uses_extended_templates: flags & 0x04 != 0,
        has_coloured_regions: flags & 0x08 != 0,
    })
}

fn parse_random_access<'a>(reader: &mut Reader<'a>) -> Result<Vec<Segment<'a>>> {
    let mut headers = Vec::new();

    while !reader.at_end() {
        let header = parse_segment_header(reader)?;
        let is_eof = header.segment_type == SegmentType::EndOfFile;
        headers.push(header);

        if is_eof {
            break;
        }
    }

    headers
        .into_iter()
        .map(|header| read_segment_data(reader, header))
        .collect()
}
