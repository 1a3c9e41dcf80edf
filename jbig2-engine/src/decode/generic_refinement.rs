//! Generic refinement region decoding (6.3) and refinement region segments (7.4.7).

use super::generic::pack;
use super::{
    AdaptiveTemplatePixel, AtPixels, RegionBitmap, RegionSegmentInfo,
    parse_refinement_at_pixels,
};
use crate::arithmetic_decoder::{ArithmeticDecoder, Context, fresh_contexts};
use crate::bitmap::Bitmap;
use crate::error::{FormatError, RegionError, Result, bail};
use crate::reader::Reader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefinementTemplate {
    /// 13 pixels, 2 of them adaptive.
    Template0,
    /// 10 pixels.
    Template1,
}

impl RefinementTemplate {
    pub(crate) fn from_value(value: u8) -> Self {
        if value & 0x01 == 0 {
            Self::Template0
        } else {
            Self::Template1
        }
    }

    pub(crate) fn context_bits(self) -> u32 {
        match self {
            Self::Template0 => 13,
            Self::Template1 => 10,
        }
    }

    pub(crate) fn sltp_context(self) -> usize {
        match self {
            Self::Template0 => 0x0010,
            Self::Template1 => 0x0008,
        }
    }
}

/// Forms refinement contexts from the bitmap being decoded and the reference.
#[derive(Debug, Clone)]
pub(crate) struct RefinementContextModel {
    template: RefinementTemplate,
    at: [(i32, i32); 2],
    dx: i32,
    dy: i32,
}

impl RefinementContextModel {
    /// `dx` and `dy` give the offset of the reference: pixel `(x, y)` of the
    /// refined bitmap corresponds to `(x - dx, y - dy)` in the reference.
    pub(crate) fn new(
        template: RefinementTemplate,
        at_pixels: &[AdaptiveTemplatePixel],
        dx: i32,
        dy: i32,
    ) -> Self {
        let mut at = [(-1, -1); 2];
        for (slot, pixel) in at.iter_mut().zip(at_pixels) {
            *slot = (i32::from(pixel.x), i32::from(pixel.y));
        }

        Self {
            template,
            at,
            dx,
            dy,
        }
    }

    #[inline(always)]
    pub(crate) fn context(&self, region: &Bitmap, reference: &Bitmap, x: u32, y: u32) -> u32 {
        let (x, y) = (x as i32, y as i32);
        let (rx, ry) = (x - self.dx, y - self.dy);
        let p = |dx: i32, dy: i32| region.pixel(x + dx, y + dy);
        let r = |dx: i32, dy: i32| reference.pixel(rx + dx, ry + dy);

        match self.template {
            RefinementTemplate::Template0 => pack(&[
                p(self.at[0].0, self.at[0].1),
                p(0, -1),
                p(1, -1),
                p(-1, 0),
                r(self.at[1].0, self.at[1].1),
                r(0, -1),
                r(1, -1),
                r(-1, 0),
                r(0, 0),
                r(1, 0),
                r(-1, 1),
                r(0, 1),
                r(1, 1),
            ]),
            RefinementTemplate::Template1 => pack(&[
                p(-1, -1),
                p(0, -1),
                p(1, -1),
                p(-1, 0),
                r(0, -1),
                r(-1, 0),
                r(0, 0),
                r(1, 0),
                r(0, 1),
                r(1, 1),
            ]),
        }
    }

    /// The value all nine reference pixels around `(x, y)` share, if any (TPGRPIX).
    pub(crate) fn typical_value(&self, reference: &Bitmap, x: u32, y: u32) -> Option<bool> {
        let (rx, ry) = (x as i32 - self.dx, y as i32 - self.dy);
        let center = reference.pixel(rx, ry);

        for dy in -1..=1 {
            for dx in -1..=1 {
                if reference.pixel(rx + dx, ry + dy) != center {
                    return None;
                }
            }
        }

        Some(center == 1)
    }
}

/// Parameters of one invocation of the refinement decoding procedure.
#[derive(Debug, Clone)]
pub(crate) struct RefinementParams<'a> {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) template: RefinementTemplate,
    pub(crate) reference: &'a Bitmap,
    pub(crate) dx: i32,
    pub(crate) dy: i32,
    pub(crate) tpgron: bool,
    pub(crate) at_pixels: &'a [AdaptiveTemplatePixel],
}

/// Decode a refined bitmap (6.3.5.6).
pub(crate) fn decode_refinement(
    decoder: &mut ArithmeticDecoder<'_>,
    contexts: &mut [Context],
    params: &RefinementParams<'_>,
) -> Result<Bitmap> {
    debug_assert_eq!(contexts.len(), 1 << params.template.context_bits());

    let model = RefinementContextModel::new(
        params.template,
        params.at_pixels,
        params.dx,
        params.dy,
    );
    let reference = params.reference;
    let mut bitmap = Bitmap::new(params.width, params.height)?;
    let mut ltp = false;

    for y in 0..params.height {
        if params.tpgron {
            ltp ^= decoder.decode(&mut contexts[params.template.sltp_context()]) == 1;
        }

        for x in 0..params.width {
            let predicted = if ltp {
                model.typical_value(reference, x, y)
            } else {
                None
            };

            let value = match predicted {
                Some(value) => value,
                None => {
                    let context = model.context(&bitmap, reference, x, y);
                    decoder.decode(&mut contexts[context as usize]) == 1
                }
            };

            if value {
                bitmap.set_pixel(x, y, true);
            }
        }
    }

    Ok(bitmap)
}

/// The data header of a refinement region segment.
#[derive(Debug, Clone)]
pub(crate) struct RefinementRegionHeader {
    pub(crate) info: RegionSegmentInfo,
    pub(crate) template: RefinementTemplate,
    pub(crate) tpgron: bool,
    pub(crate) at_pixels: AtPixels,
}

impl RefinementRegionHeader {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let info = RegionSegmentInfo::parse(reader)?;

        let flags = reader.read_byte()?;
        if flags & 0xFC != 0 {
            bail!(FormatError::ReservedBits);
        }

        let template = RefinementTemplate::from_value(flags);
        let at_pixels = match template {
            RefinementTemplate::Template0 => parse_refinement_at_pixels(reader)?,
            RefinementTemplate::Template1 => AtPixels::new(),
        };

        Ok(Self {
            info,
            template,
            tpgron: flags & 0x02 != 0,
            at_pixels,
        })
    }
}

/// Decode the data part of a refinement region segment against `reference`:
/// the bitmap of the referred region, or the page area under the region.
pub(crate) fn decode_region<'a>(
    reader: &mut Reader<'a>,
    decoder: &mut ArithmeticDecoder<'a>,
    reference: &Bitmap,
) -> Result<RegionBitmap> {
    let header = RefinementRegionHeader::parse(reader)?;

    if header.info.width > reference.width() || header.info.height > reference.height() {
        bail!(RegionError::InvalidDimension);
    }

    ltrace!(
        "refinement region {}x{} at ({}, {}), template: {:?}, tpgron: {}",
        header.info.width,
        header.info.height,
        header.info.x,
        header.info.y,
        header.template,
        header.tpgron
    );

    decoder.start(reader.tail());
    let mut contexts = fresh_contexts(header.template.context_bits());
    let bitmap = decode_refinement(
        decoder,
        &mut contexts,
        &RefinementParams {
            width: header.info.width,
            height: header.info.height,
            template: header.template,
            reference,
            dx: 0,
            dy: 0,
            tpgron: header.tpgron,
            at_pixels: &header.at_pixels,
        },
    )?;

    Ok(RegionBitmap::new(bitmap, &header.info))
}
