//! Halftone region decoding (6.6) and halftone region segments (7.4.5).

use super::generic::Template;
use super::pattern::PatternDictionary;
use super::{RegionBitmap, RegionSegmentInfo};
use crate::arithmetic_decoder::ArithmeticDecoder;
use crate::bitmap::{Bitmap, CombinationOperator};
use crate::error::{RegionError, Result, SegmentError, bail};
use crate::gray_scale::{GrayScaleParams, decode_gray_scale};
use crate::reader::Reader;

/// Upper bound for the number of grid cells of one region.
const MAX_GRID_CELLS: u64 = 1 << 24;

/// The data header of a halftone region segment (7.4.5.1).
#[derive(Debug, Clone)]
pub(crate) struct HalftoneRegionHeader {
    pub(crate) info: RegionSegmentInfo,
    pub(crate) mmr: bool,
    pub(crate) template: Template,
    pub(crate) enable_skip: bool,
    /// HCOMBOP, used to draw each pattern into the region.
    pub(crate) operator: CombinationOperator,
    pub(crate) default_pixel: bool,
    pub(crate) grid: Grid,
}

/// The halftone grid: its size, origin and vector, all in 1/256 pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Grid {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) x: i32,
    pub(crate) y: i32,
    pub(crate) vector_x: u16,
    pub(crate) vector_y: u16,
}

impl Grid {
    /// The top-left pixel of the cell in grid row `m`, column `n` (6.6.5.2).
    fn cell(&self, m: u32, n: u32) -> (i64, i64) {
        let (m, n) = (i64::from(m), i64::from(n));
        let (rx, ry) = (i64::from(self.vector_x), i64::from(self.vector_y));

        let x = i64::from(self.x) + m * ry + n * rx;
        let y = i64::from(self.y) + m * rx - n * ry;

        (x >> 8, y >> 8)
    }
}

impl HalftoneRegionHeader {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let info = RegionSegmentInfo::parse(reader)?;
        let flags = reader.read_byte()?;

        let grid = Grid {
            width: reader.read_u32()?,
            height: reader.read_u32()?,
            x: reader.read_i32()?,
            y: reader.read_i32()?,
            vector_x: reader.read_u16()?,
            vector_y: reader.read_u16()?,
        };

        Ok(Self {
            info,
            mmr: flags & 0x01 != 0,
            template: Template::from_value(flags >> 1),
            enable_skip: flags & 0x08 != 0,
            operator: CombinationOperator::from_value((flags >> 4) & 0x07)?,
            default_pixel: flags & 0x80 != 0,
            grid,
        })
    }
}

/// The number of bits needed for a gray-scale value below `count`, at least one.
fn bits_per_value(count: usize) -> u32 {
    // A single pattern still takes one bitplane, all zero.
    (count as u64)
        .saturating_sub(1)
        .checked_ilog2()
        .map_or(1, |bits| bits + 1)
}

/// Mark the grid cells whose pattern would lie entirely outside the region
/// (6.6.5.1).
fn skip_bitmap(header: &HalftoneRegionHeader, patterns: &PatternDictionary) -> Result<Bitmap> {
    let grid = header.grid;
    let mut skip = Bitmap::new(grid.width, grid.height)?;

    let (pattern_width, pattern_height) = (i64::from(patterns.width), i64::from(patterns.height));
    let (width, height) = (i64::from(header.info.width), i64::from(header.info.height));

    for m in 0..grid.height {
        for n in 0..grid.width {
            let (x, y) = grid.cell(m, n);
            let outside =
                x + pattern_width <= 0 || x >= width || y + pattern_height <= 0 || y >= height;

            if outside {
                skip.set_pixel(n, m, true);
            }
        }
    }

    Ok(skip)
}

/// Decode the halftone region proper, given its parsed header.
fn decode_halftone<'a>(
    header: &HalftoneRegionHeader,
    data: &'a [u8],
    decoder: &mut ArithmeticDecoder<'a>,
    patterns: &PatternDictionary,
) -> Result<Bitmap> {
    let grid = header.grid;
    if u64::from(grid.width) * u64::from(grid.height) > MAX_GRID_CELLS {
        bail!(RegionError::InvalidDimension);
    }

    let mut region = Bitmap::new_filled(
        header.info.width,
        header.info.height,
        header.default_pixel,
    )?;

    let skip = if header.enable_skip {
        Some(skip_bitmap(header, patterns)?)
    } else {
        None
    };

    let values = decode_gray_scale(
        decoder,
        data,
        &GrayScaleParams {
            mmr: header.mmr,
            bits_per_pixel: bits_per_value(patterns.patterns.len()),
            width: grid.width,
            height: grid.height,
            template: header.template,
            skip: skip.as_ref(),
        },
    )?;

    let mut values = values.into_iter();
    for m in 0..grid.height {
        for n in 0..grid.width {
            let gray = values.next().unwrap_or(0) as usize;
            let pattern = patterns
                .patterns
                .get(gray)
                .ok_or(RegionError::GrayScaleOutOfRange)?;

            let (x, y) = grid.cell(m, n);
            region.combine(pattern, x, y, header.operator);
        }
    }

    Ok(region)
}

/// Decode the data part of a halftone region segment with the patterns of
/// the referred pattern dictionary.
pub(crate) fn decode_region<'a>(
    reader: &mut Reader<'a>,
    decoder: &mut ArithmeticDecoder<'a>,
    patterns: &PatternDictionary,
) -> Result<RegionBitmap> {
    let header = HalftoneRegionHeader::parse(reader)?;

    if patterns.patterns.is_empty() {
        bail!(SegmentError::MissingPatternDictionary);
    }

    ltrace!(
        "halftone region {}x{} at ({}, {}), grid {}x{}, {} patterns",
        header.info.width,
        header.info.height,
        header.info.x,
        header.info.y,
        header.grid.width,
        header.grid.height,
        patterns.patterns.len()
    );

    let bitmap = decode_halftone(&header, reader.tail(), decoder, patterns)?;
    Ok(RegionBitmap::new(bitmap, &header.info))
}
