//! Page information segments (7.4.8) and page assembly.

use bitflags::bitflags;

use crate::bitmap::{Bitmap, CombinationOperator};
use crate::decode::RegionBitmap;
use crate::error::{DecodeError, FormatError, Result, bail};
use crate::reader::Reader;

bitflags! {
    /// The page segment flags, without the default combination operator in bits 3 and 4.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// The file holds a lossless representation of the page.
        const LOSSLESS = 1 << 0;
        /// Refinement regions may be associated with the page.
        const MIGHT_CONTAIN_REFINEMENTS = 1 << 1;
        /// Every pixel of the page starts out black.
        const DEFAULT_PIXEL = 1 << 2;
        /// Regions of the page may need auxiliary buffers.
        const REQUIRES_AUXILIARY_BUFFERS = 1 << 5;
        /// Regions may use their own combination operator.
        const OPERATOR_OVERRIDE = 1 << 6;
        /// The page may contain coloured regions.
        const MIGHT_CONTAIN_COLOUR = 1 << 7;
    }
}

/// The contents of a page information segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PageInformation {
    pub(crate) width: u32,
    /// `None` when the height is only known once the page has been striped.
    pub(crate) height: Option<u32>,
    /// Pixels per metre, `None` if unknown.
    pub(crate) x_resolution: Option<u32>,
    pub(crate) y_resolution: Option<u32>,
    pub(crate) flags: PageFlags,
    pub(crate) default_operator: CombinationOperator,
    pub(crate) striped: bool,
    pub(crate) max_stripe_size: u16,
}

impl PageInformation {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let width = reader.read_u32()?;
        let height = match reader.read_u32()? {
            0xFFFF_FFFF => None,
            height => Some(height),
        };
        let x_resolution = Some(reader.read_u32()?).filter(|r| *r != 0);
        let y_resolution = Some(reader.read_u32()?).filter(|r| *r != 0);

        let flags = reader.read_byte()?;
        let default_operator = CombinationOperator::from_value((flags >> 3) & 0x03)?;

        let striping = reader.read_u16()?;

        Ok(Self {
            width,
            height,
            x_resolution,
            y_resolution,
            flags: PageFlags::from_bits_truncate(flags),
            default_operator,
            striped: striping & 0x8000 != 0,
            max_stripe_size: striping & 0x7FFF,
        })
    }

    fn default_pixel(&self) -> bool {
        self.flags.contains(PageFlags::DEFAULT_PIXEL)
    }
}

/// A page that is being assembled.
#[derive(Debug, Clone)]
pub(crate) struct Page {
    pub(crate) number: u32,
    pub(crate) info: PageInformation,
    pub(crate) bitmap: Bitmap,
    max_pixels: u64,
}

impl Page {
    /// Create the page bitmap filled with the default pixel value.
    ///
    /// A page of unknown height starts out with no rows.
    pub(crate) fn new(number: u32, info: PageInformation, max_pixels: u64) -> Result<Self> {
        let height = info.height.unwrap_or(0);
        check_size(info.width, height, max_pixels)?;

        if info.height.is_none() && !info.striped {
            lwarn!("page {} has an unknown height but is not striped", number);
        }

        let bitmap = Bitmap::new_filled(info.width, height, info.default_pixel())?;
        ldebug!(
            "page {}: {}x{}, default operator {:?}, striped: {}, max stripe size {}",
            number,
            info.width,
            height,
            info.default_operator,
            info.striped,
            info.max_stripe_size
        );

        Ok(Self {
            number,
            info,
            bitmap,
            max_pixels,
        })
    }

    /// The operator a region is drawn with: its own only if the page allows
    /// overriding the default.
    pub(crate) fn operator_for(&self, requested: CombinationOperator) -> CombinationOperator {
        if self.info.flags.contains(PageFlags::OPERATOR_OVERRIDE) {
            requested
        } else {
            self.info.default_operator
        }
    }

    /// Draw a region onto the page, growing a page of unknown height to fit.
    pub(crate) fn composite(&mut self, region: &RegionBitmap) -> Result<()> {
        if self.info.height.is_none() {
            let bottom = region
                .y
                .checked_add(region.bitmap.height())
                .ok_or(DecodeError::Overflow)?;
            self.grow(bottom)?;
        }

        let op = self.operator_for(region.operator);
        self.bitmap.combine(
            &region.bitmap,
            i64::from(region.x),
            i64::from(region.y),
            op,
        );

        Ok(())
    }

    /// Handle an end-of-stripe segment ending at `end_row`.
    pub(crate) fn end_stripe(&mut self, end_row: u32) -> Result<()> {
        if self.info.height.is_none() {
            self.grow(end_row.checked_add(1).ok_or(DecodeError::Overflow)?)?;
        }

        Ok(())
    }

    /// Copy out part of the page, used as the reference of refinement regions
    /// that do not refer to another region.
    pub(crate) fn slice(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Bitmap> {
        self.bitmap.slice(x, y, width, height)
    }

    fn grow(&mut self, height: u32) -> Result<()> {
        if height > self.bitmap.height() {
            check_size(self.info.width, height, self.max_pixels)?;
            ltrace!("page {} grows to {} rows", self.number, height);
            self.bitmap.expand(height, self.info.default_pixel())?;
        }

        Ok(())
    }
}

fn check_size(width: u32, height: u32, max_pixels: u64) -> Result<()> {
    if u64::from(width) * u64::from(height) > max_pixels {
        bail!(FormatError::PageTooLarge);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::bitmap_from_rows;

    fn info(height: Option<u32>, flags: u8) -> PageInformation {
        let mut data = Vec::new();
        data.extend_from_slice(&8_u32.to_be_bytes());
        data.extend_from_slice(&height.unwrap_or(0xFFFF_FFFF).to_be_bytes());
        data.extend_from_slice(&[0, 0, 0x0B, 0xB8, 0, 0, 0, 0]);
        data.push(flags);
        data.extend_from_slice(&[0x80, 0x10]);
        PageInformation::parse(&mut Reader::new(&data)).unwrap()
    }

    fn region(rows: &[&str], x: u32, y: u32, operator: CombinationOperator) -> RegionBitmap {
        RegionBitmap {
            bitmap: bitmap_from_rows(rows),
            x,
            y,
            operator,
        }
    }

    #[test]
    fn parse_fields() {
        let info = info(None, 0x5C);

        assert_eq!(info.width, 8);
        assert_eq!(info.height, None);
        assert_eq!(info.x_resolution, Some(3000));
        assert_eq!(info.y_resolution, None);
        assert!(info.flags.contains(PageFlags::DEFAULT_PIXEL));
        assert!(info.flags.contains(PageFlags::OPERATOR_OVERRIDE));
        assert_eq!(info.default_operator, CombinationOperator::Xnor);
        assert!(info.striped);
        assert_eq!(info.max_stripe_size, 16);
    }

    #[test]
    fn unknown_height_grows_to_fit() {
        let mut page = Page::new(1, info(None, 0), u64::MAX).unwrap();
        assert_eq!(page.bitmap.height(), 0);

        page.composite(&region(&["##", "##"], 0, 0, CombinationOperator::Or))
            .unwrap();
        assert_eq!(page.bitmap.height(), 2);

        page.composite(&region(&["#.", ".#", "##"], 3, 5, CombinationOperator::Or))
            .unwrap();
        assert_eq!(page.bitmap.height(), 8);

        // Earlier rows survive the growth.
        assert!(page.bitmap.get_pixel(1, 1));
        assert!(page.bitmap.get_pixel(4, 6));
        assert!(!page.bitmap.get_pixel(0, 4));

        page.end_stripe(11).unwrap();
        assert_eq!(page.bitmap.height(), 12);
    }

    #[test]
    fn known_height_is_never_grown() {
        let mut page = Page::new(1, info(Some(2), 0), u64::MAX).unwrap();
        page.composite(&region(&["#", "#", "#", "#"], 0, 0, CombinationOperator::Or))
            .unwrap();
        page.end_stripe(40).unwrap();

        assert_eq!(page.bitmap.height(), 2);
    }

    #[test]
    fn region_operator_needs_override_flag() {
        // Default pixel 1, default operator AND, no override.
        let mut page = Page::new(1, info(Some(1), 0x0C), u64::MAX).unwrap();
        page.composite(&region(&["#."], 0, 0, CombinationOperator::Xor))
            .unwrap();
        assert!(page.bitmap.get_pixel(0, 0));
        assert!(!page.bitmap.get_pixel(1, 0));

        // Same with the override flag: XOR applies.
        let mut page = Page::new(1, info(Some(1), 0x4C), u64::MAX).unwrap();
        page.composite(&region(&["#."], 0, 0, CombinationOperator::Xor))
            .unwrap();
        assert!(!page.bitmap.get_pixel(0, 0));
        assert!(page.bitmap.get_pixel(1, 0));
    }

    #[test]
    fn pixel_limit() {
        assert_eq!(
            Page::new(1, info(Some(100), 0), 799).unwrap_err(),
            DecodeError::Format(FormatError::PageTooLarge)
        );

        let mut page = Page::new(1, info(None, 0), 80).unwrap();
        assert!(page.end_stripe(9).is_ok());
        assert!(page.end_stripe(10).is_err());
    }
}
