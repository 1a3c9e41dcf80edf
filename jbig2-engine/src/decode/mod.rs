//! Region decoders and the region segment information field (7.4.1).

pub(crate) mod generic;
pub(crate) mod generic_refinement;
pub(crate) mod halftone;
pub(crate) mod pattern;
pub(crate) mod symbol;
pub(crate) mod text;

use smallvec::SmallVec;

use crate::bitmap::{Bitmap, CombinationOperator};
use crate::error::{FormatError, Result, TemplateError, Unsupported, bail};
use crate::reader::Reader;

/// The fields every region segment starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegionSegmentInfo {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) x: u32,
    pub(crate) y: u32,
    /// The external combination operator.
    pub(crate) operator: CombinationOperator,
}

impl RegionSegmentInfo {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let width = reader.read_u32()?;
        let height = reader.read_u32()?;
        let x = reader.read_u32()?;
        let y = reader.read_u32()?;

        let flags = reader.read_byte()?;
        let operator = CombinationOperator::from_value(flags & 0x07)?;

        if flags & 0x08 != 0 {
            bail!(Unsupported::ColourExtension);
        }

        if flags & 0xF0 != 0 {
            bail!(FormatError::ReservedBits);
        }

        Ok(Self {
            width,
            height,
            x,
            y,
            operator,
        })
    }
}

/// A decoded region, positioned on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RegionBitmap {
    pub(crate) bitmap: Bitmap,
    pub(crate) x: u32,
    pub(crate) y: u32,
    pub(crate) operator: CombinationOperator,
}

impl RegionBitmap {
    pub(crate) fn new(bitmap: Bitmap, info: &RegionSegmentInfo) -> Self {
        Self {
            bitmap,
            x: info.x,
            y: info.y,
            operator: info.operator,
        }
    }
}

/// An adaptive template pixel, relative to the pixel being decoded.
///
/// Segments code the offsets in one signed byte each, but pattern
/// dictionaries place their first pixel up to 255 columns to the left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AdaptiveTemplatePixel {
    pub(crate) x: i16,
    pub(crate) y: i16,
}

impl AdaptiveTemplatePixel {
    pub(crate) const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }

    /// Whether the pixel lies in an already decoded position: above the
    /// current row, or left of the current pixel.
    fn is_causal(self) -> bool {
        self.y < 0 || (self.y == 0 && self.x < 0)
    }
}

pub(crate) type AtPixels = SmallVec<[AdaptiveTemplatePixel; 4]>;

/// Read `count` AT pixels that must all refer to already decoded pixels.
pub(crate) fn parse_at_pixels(reader: &mut Reader<'_>, count: usize) -> Result<AtPixels> {
    let pixels = read_at_pixels(reader, count)?;

    if !pixels.iter().all(|p| p.is_causal()) {
        bail!(TemplateError::InvalidAtPixel);
    }

    Ok(pixels)
}

/// Read the two AT pixels of refinement template 0. Only the first one lies
/// in the region being decoded; the second one refers to the reference.
pub(crate) fn parse_refinement_at_pixels(reader: &mut Reader<'_>) -> Result<AtPixels> {
    let pixels = read_at_pixels(reader, 2)?;

    if !pixels[0].is_causal() {
        bail!(TemplateError::InvalidAtPixel);
    }

    Ok(pixels)
}

fn read_at_pixels(reader: &mut Reader<'_>, count: usize) -> Result<AtPixels> {
    (0..count)
        .map(|_| {
            let x = i16::from(reader.read_i8()?);
            let y = i16::from(reader.read_i8()?);
            Ok(AdaptiveTemplatePixel::new(x, y))
        })
        .collect()
}
