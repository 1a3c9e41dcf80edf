//! The gray-scale image decoding procedure (Annex C).

use crate::arithmetic_decoder::{ArithmeticDecoder, fresh_contexts};
use crate::bitmap::Bitmap;
use crate::decode::generic::{
    GenericParams, Template, decode_arithmetic, decode_mmr, nominal_at_pixels,
};
use crate::error::Result;

/// Parameters of the gray-scale image decoding procedure (Table C.1).
#[derive(Debug, Clone)]
pub(crate) struct GrayScaleParams<'a> {
    pub(crate) mmr: bool,
    /// GSBPP
    pub(crate) bits_per_pixel: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) template: Template,
    /// Cells set here are not coded in any bitplane (GSKIP).
    pub(crate) skip: Option<&'a Bitmap>,
}

/// Decode a gray-scale image of `width * height` values from Gray-coded
/// bitplanes, most significant plane first (C.5).
pub(crate) fn decode_gray_scale<'a>(
    decoder: &mut ArithmeticDecoder<'a>,
    data: &'a [u8],
    params: &GrayScaleParams<'_>,
) -> Result<Vec<u32>> {
    debug_assert!(params.bits_per_pixel > 0 && params.bits_per_pixel <= 32);

    let mut planes = Vec::with_capacity(params.bits_per_pixel as usize);

    if params.mmr {
        // Each plane starts on the byte after the previous plane's EOFB.
        let mut offset = 0;
        for _ in 0..params.bits_per_pixel {
            let (plane, length) = decode_mmr(&data[offset..], params.width, params.height)?;
            offset += length;
            planes.push(plane);
        }
    } else {
        decoder.start(data);
        let mut contexts = fresh_contexts(params.template.context_bits());
        let at_pixels = nominal_at_pixels(params.template);
        let generic = GenericParams {
            width: params.width,
            height: params.height,
            template: params.template,
            tpgdon: false,
            at_pixels: &at_pixels,
            skip: params.skip,
        };

        for _ in 0..params.bits_per_pixel {
            planes.push(decode_arithmetic(decoder, &mut contexts, &generic)?);
        }
    }

    // Undo the Gray coding: each plane is XORed with the one above it.
    for j in 1..planes.len() {
        let (above, rest) = planes.split_at_mut(j);
        let above = &above[j - 1];
        let plane = &mut rest[0];

        for y in 0..params.height {
            for (bits, upper) in plane.row_mut(y).iter_mut().zip(above.row(y)) {
                *bits ^= upper;
            }
        }
    }

    let mut values = vec![0_u32; params.width as usize * params.height as usize];
    for (index, plane) in planes.iter().enumerate() {
        let bit = params.bits_per_pixel - 1 - index as u32;

        for y in 0..params.height {
            let start = y as usize * params.width as usize;
            let row = &mut values[start..][..params.width as usize];
            for (x, value) in row.iter_mut().enumerate() {
                if plane.get_pixel(x as u32, y) {
                    *value |= 1 << bit;
                }
            }
        }
    }

    Ok(values)
}
