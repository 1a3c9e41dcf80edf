//! Packed bi-level bitmaps and the combination operators (7.4.1.5, 7.4.8.5).

use crate::error::{RegionError, Result, bail};

/// Upper bound for the packed size of a single bitmap.
const MAX_BITMAP_BYTES: usize = 1 << 28;

/// How a bitmap is combined with the pixels it is drawn onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinationOperator {
    /// Set pixels stay set, source pixels are added.
    Or,
    /// Only pixels set in both remain set.
    And,
    /// Exclusive or.
    Xor,
    /// Negated exclusive or.
    Xnor,
    /// The source replaces the destination.
    Replace,
}

impl CombinationOperator {
    pub(crate) fn from_value(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Or,
            1 => Self::And,
            2 => Self::Xor,
            3 => Self::Xnor,
            4 => Self::Replace,
            _ => bail!(RegionError::InvalidCombinationOperator),
        })
    }

    /// Apply the operator to eight pixels at once.
    #[inline(always)]
    fn apply(self, dst: u8, src: u8) -> u8 {
        match self {
            Self::Or => dst | src,
            Self::And => dst & src,
            Self::Xor => dst ^ src,
            Self::Xnor => !(dst ^ src),
            Self::Replace => src,
        }
    }
}

/// A 1-bit raster. A set bit is a black pixel.
///
/// Rows are packed most significant bit first and padded to a whole byte.
/// Padding bits are always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    stride: usize,
    data: Vec<u8>,
}

impl Bitmap {
    /// Create a white bitmap.
    pub(crate) fn new(width: u32, height: u32) -> Result<Self> {
        let stride = (width as usize).div_ceil(8);
        let len = stride
            .checked_mul(height as usize)
            .filter(|len| *len <= MAX_BITMAP_BYTES)
            .ok_or(RegionError::InvalidDimension)?;

        Ok(Self {
            width,
            height,
            stride,
            data: vec![0; len],
        })
    }

    /// Create a bitmap with every pixel set to `value`.
    pub(crate) fn new_filled(width: u32, height: u32, value: bool) -> Result<Self> {
        let mut bitmap = Self::new(width, height)?;
        bitmap.clear(value);
        Ok(bitmap)
    }

    /// Create a bitmap from packed rows of `ceil(width / 8)` bytes each.
    pub(crate) fn from_packed(width: u32, height: u32, data: &[u8]) -> Result<Self> {
        let mut bitmap = Self::new(width, height)?;
        let (len, stride) = (bitmap.data.len(), bitmap.stride);
        if data.len() < len {
            bail!(RegionError::InvalidDimension);
        }

        bitmap.data.copy_from_slice(&data[..len]);
        let mask = bitmap.last_byte_mask();
        if stride > 0 {
            for row in bitmap.data.chunks_exact_mut(stride) {
                row[stride - 1] &= mask;
            }
        }

        Ok(bitmap)
    }

    /// The width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// The height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The number of bytes per row.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The packed pixel data, `stride * height` bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The packed bytes of one row.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.stride]
    }

    pub(crate) fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        &mut self.data[start..start + self.stride]
    }

    /// Whether the pixel at `(x, y)` is black. Pixels outside the bitmap are white.
    #[inline(always)]
    pub fn get_pixel(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }

        let byte = self.data[y as usize * self.stride + (x >> 3) as usize];
        (byte >> (7 - (x & 7))) & 1 == 1
    }

    /// Like [`Bitmap::get_pixel`] but with signed coordinates, as produced by
    /// context templates reaching above or left of the bitmap.
    #[inline(always)]
    pub(crate) fn pixel(&self, x: i32, y: i32) -> u32 {
        if x < 0 || y < 0 {
            return 0;
        }

        u32::from(self.get_pixel(x as u32, y as u32))
    }

    #[inline(always)]
    pub(crate) fn set_pixel(&mut self, x: u32, y: u32, value: bool) {
        if x >= self.width || y >= self.height {
            return;
        }

        let index = y as usize * self.stride + (x >> 3) as usize;
        let mask = 0x80 >> (x & 7);
        if value {
            self.data[index] |= mask;
        } else {
            self.data[index] &= !mask;
        }
    }

    /// Overwrite row `y` with the row above it.
    pub(crate) fn copy_row_from_above(&mut self, y: u32) {
        if y == 0 || y >= self.height {
            return;
        }

        let start = y as usize * self.stride;
        self.data.copy_within(start - self.stride..start, start);
    }

    /// A row with every pixel set to `value`, with zero padding.
    fn filled_row(&self, value: bool) -> Vec<u8> {
        let mut row = vec![if value { 0xFF } else { 0 }; self.stride];
        if let Some(last) = row.last_mut() {
            *last &= self.last_byte_mask();
        }
        row
    }

    fn last_byte_mask(&self) -> u8 {
        match self.width % 8 {
            0 => 0xFF,
            rem => 0xFF << (8 - rem),
        }
    }

    /// Set every pixel to `value`.
    pub(crate) fn clear(&mut self, value: bool) {
        if self.stride == 0 {
            return;
        }

        let row = self.filled_row(value);
        for chunk in self.data.chunks_exact_mut(self.stride) {
            chunk.copy_from_slice(&row);
        }
    }

    /// Grow the bitmap to `height` rows, filling new rows with `fill`.
    ///
    /// Existing rows are kept. Does nothing if the bitmap is already as tall.
    pub(crate) fn expand(&mut self, height: u32, fill: bool) -> Result<()> {
        if height <= self.height {
            return Ok(());
        }

        let len = self
            .stride
            .checked_mul(height as usize)
            .filter(|len| *len <= MAX_BITMAP_BYTES)
            .ok_or(RegionError::InvalidDimension)?;

        let row = self.filled_row(fill);
        self.data.reserve(len - self.data.len());
        for _ in self.height..height {
            self.data.extend_from_slice(&row);
        }
        self.height = height;

        Ok(())
    }

    /// Copy out a `width` x `height` rectangle starting at `(x, y)`.
    ///
    /// Parts of the rectangle outside this bitmap are white.
    pub(crate) fn slice(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Self> {
        let mut out = Self::new(width, height)?;
        out.combine(
            self,
            -i64::from(x),
            -i64::from(y),
            CombinationOperator::Replace,
        );
        Ok(out)
    }

    /// Draw `src` onto this bitmap with its top-left corner at `(x, y)`.
    ///
    /// Pixels of `src` falling outside this bitmap are ignored.
    pub(crate) fn combine(&mut self, src: &Self, x: i64, y: i64, op: CombinationOperator) {
        let x0 = x.max(0);
        let x1 = (x + i64::from(src.width)).min(i64::from(self.width));
        let y0 = y.max(0);
        let y1 = (y + i64::from(src.height)).min(i64::from(self.height));

        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let count = (x1 - x0) as usize;
        let aligned = x >= 0 && x % 8 == 0;

        for dst_y in y0..y1 {
            let src_y = (dst_y - y) as u32;
            let dst_y = dst_y as u32;

            if aligned {
                let start = (x / 8) as usize;
                let src_row = src.row(src_y);
                let dst_row = &mut self.row_mut(dst_y)[start..];
                let full = count / 8;

                for (dst, src) in dst_row[..full].iter_mut().zip(&src_row[..full]) {
                    *dst = op.apply(*dst, *src);
                }

                let rem = count % 8;
                if rem != 0 {
                    let mask = 0xFF_u8 << (8 - rem);
                    let dst = &mut dst_row[full];
                    *dst = (*dst & !mask) | (op.apply(*dst, src_row[full]) & mask);
                }
            } else {
                for dst_x in x0..x1 {
                    let src_x = (dst_x - x) as u32;
                    let dst_x = dst_x as u32;
                    let s = src.get_pixel(src_x, src_y);
                    let d = self.get_pixel(dst_x, dst_y);
                    let value = op.apply(u8::from(d), u8::from(s)) & 1 == 1;
                    self.set_pixel(dst_x, dst_y, value);
                }
            }
        }
    }
}
