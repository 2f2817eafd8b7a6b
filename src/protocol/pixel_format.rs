use bytes::{BufMut, BytesMut};

use crate::VncError;

///  Pixel Format Data Structure according to [RFC6143](https://www.rfc-editor.org/rfc/rfc6143.html#section-7.4)
///
/// ```text
/// +--------------+--------------+-----------------+
/// | No. of bytes | Type [Value] | Description     |
/// +--------------+--------------+-----------------+
/// | 1            | U8           | bits-per-pixel  |
/// | 1            | U8           | depth           |
/// | 1            | U8           | big-endian-flag |
/// | 1            | U8           | true-color-flag |
/// | 2            | U16          | red-max         |
/// | 2            | U16          | green-max       |
/// | 2            | U16          | blue-max        |
/// | 1            | U8           | red-shift       |
/// | 1            | U8           | green-shift     |
/// | 1            | U8           | blue-shift      |
/// | 3            |              | padding         |
/// +--------------+--------------+-----------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// the number of bits used for each pixel value on the wire
    ///
    /// 8, 16, 32(usually) only
    ///
    pub bits_per_pixel: u8,
    /// Although the depth should
    ///
    /// be consistent with the bits-per-pixel and the various -max values,
    ///
    /// the server does not use it when producing pixel data.
    ///
    pub depth: u8,
    /// true if multi-byte pixels are interpreted as big endian
    ///
    pub big_endian_flag: u8,
    /// true then the last six items specify how to extract the red, green and blue intensities from the pixel value
    ///
    pub true_color_flag: u8,
    /// the next three always in big-endian order
    /// no matter how the `big_endian_flag` is set
    ///
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    /// the number of shifts needed to get the red value in a pixel to the least significant bit
    ///
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
    _padding_1: u8,
    _padding_2: u8,
    _padding_3: u8,
}

impl From<PixelFormat> for Vec<u8> {
    fn from(pf: PixelFormat) -> Vec<u8> {
        vec![
            pf.bits_per_pixel,
            pf.depth,
            pf.big_endian_flag,
            pf.true_color_flag,
            (pf.red_max >> 8) as u8,
            pf.red_max as u8,
            (pf.green_max >> 8) as u8,
            pf.green_max as u8,
            (pf.blue_max >> 8) as u8,
            pf.blue_max as u8,
            pf.red_shift,
            pf.green_shift,
            pf.blue_shift,
            pf._padding_1,
            pf._padding_2,
            pf._padding_3,
        ]
    }
}

impl TryFrom<[u8; 16]> for PixelFormat {
    type Error = VncError;

    fn try_from(pf: [u8; 16]) -> Result<Self, Self::Error> {
        let bits_per_pixel = pf[0];
        if bits_per_pixel != 8 && bits_per_pixel != 16 && bits_per_pixel != 32 {
            return Err(VncError::Protocol(format!(
                "unsupported bits-per-pixel {bits_per_pixel}"
            )));
        }
        let depth = pf[1];
        let big_endian_flag = pf[2];
        let true_color_flag = pf[3];
        let red_max = u16::from_be_bytes([pf[4], pf[5]]);
        let green_max = u16::from_be_bytes([pf[6], pf[7]]);
        let blue_max = u16::from_be_bytes([pf[8], pf[9]]);
        let red_shift = pf[10];
        let green_shift = pf[11];
        let blue_shift = pf[12];
        Ok(PixelFormat {
            bits_per_pixel,
            depth,
            big_endian_flag,
            true_color_flag,
            red_max,
            green_max,
            blue_max,
            red_shift,
            green_shift,
            blue_shift,
            _padding_1: pf[13],
            _padding_2: pf[14],
            _padding_3: pf[15],
        })
    }
}

impl Default for PixelFormat {
    // the native surface layout: (a << 24 | r << 16 | g << 8 | b) in le words,
    // which is [b, g, r, a] on the wire
    fn default() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian_flag: 0,
            true_color_flag: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
            _padding_1: 0,
            _padding_2: 0,
            _padding_3: 0,
        }
    }
}

impl PixelFormat {
    /// The format the surface memory is already in. Announced in ServerInit
    /// and assumed until the client sends SetPixelFormat.
    pub fn rfb_native() -> PixelFormat {
        PixelFormat::default()
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&Vec::from(*self));
    }

    /// Whether this format can be produced by the server: true-colour only,
    /// sane shifts, and colour channels that do not overlap.
    pub(crate) fn validate(&self) -> Result<(), VncError> {
        if self.true_color_flag == 0 {
            return Err(VncError::Protocol(
                "paletted pixel formats are not supported".to_string(),
            ));
        }
        let channels = [
            (self.red_max, self.red_shift),
            (self.green_max, self.green_shift),
            (self.blue_max, self.blue_shift),
        ];
        let mut combined: u64 = 0;
        for (max, shift) in channels {
            if shift >= 32 {
                return Err(VncError::Protocol(format!(
                    "colour shift {shift} out of range"
                )));
            }
            let mask = u64::from(max) << shift;
            if combined & mask != 0 {
                return Err(VncError::Protocol(
                    "colour channels overlap in the requested pixel format".to_string(),
                ));
            }
            combined |= mask;
        }
        if self.bits_per_pixel < 64 && combined >> self.bits_per_pixel != 0 {
            return Err(VncError::Protocol(format!(
                "colour channels do not fit in {} bits per pixel",
                self.bits_per_pixel
            )));
        }
        Ok(())
    }
}

/// Converts rows of native ARGB32 pixels into a negotiated wire format.
///
/// One conversion per pixel: take the 8-bit R, G and B, rescale each to the
/// channel maximum, pack by the channel shifts and serialize in the byte
/// order the client asked for. The native format is recognised and passed
/// straight through.
#[derive(Debug)]
pub(crate) struct PixelConverter {
    format: PixelFormat,
    passthrough: bool,
}

impl PixelConverter {
    pub(crate) fn new(format: PixelFormat) -> Result<Self, VncError> {
        format.validate()?;
        let passthrough = format.bits_per_pixel == 32
            && format.big_endian_flag == 0
            && format.red_max == 255
            && format.red_shift == 16
            && format.green_max == 255
            && format.green_shift == 8
            && format.blue_max == 255
            && format.blue_shift == 0;
        Ok(Self {
            format,
            passthrough,
        })
    }

    pub(crate) fn native() -> Self {
        Self {
            format: PixelFormat::rfb_native(),
            passthrough: true,
        }
    }

    pub(crate) fn bytes_per_pixel(&self) -> usize {
        usize::from(self.format.bits_per_pixel) / 8
    }

    /// Convert one row of `width * 4` bytes of little-endian ARGB words.
    pub(crate) fn convert_row(&self, row: &[u8], out: &mut BytesMut) {
        if self.passthrough {
            out.put_slice(row);
            return;
        }
        let pf = &self.format;
        for px in row.chunks_exact(4) {
            let word = u32::from_le_bytes([px[0], px[1], px[2], px[3]]);
            let r = (word >> 16) & 0xff;
            let g = (word >> 8) & 0xff;
            let b = word & 0xff;
            let r = r * u32::from(pf.red_max) / 255;
            let g = g * u32::from(pf.green_max) / 255;
            let b = b * u32::from(pf.blue_max) / 255;
            let value = (r << pf.red_shift) | (g << pf.green_shift) | (b << pf.blue_shift);
            match pf.bits_per_pixel {
                8 => out.put_u8(value as u8),
                16 => {
                    if pf.big_endian_flag != 0 {
                        out.put_u16(value as u16);
                    } else {
                        out.put_u16_le(value as u16);
                    }
                }
                _ => {
                    if pf.big_endian_flag != 0 {
                        out.put_u32(value);
                    } else {
                        out.put_u32_le(value);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(bpp: u8, maxes: (u16, u16, u16), shifts: (u8, u8, u8), big_endian: u8) -> PixelFormat {
        PixelFormat {
            bits_per_pixel: bpp,
            depth: bpp.min(24),
            big_endian_flag: big_endian,
            red_max: maxes.0,
            green_max: maxes.1,
            blue_max: maxes.2,
            red_shift: shifts.0,
            green_shift: shifts.1,
            blue_shift: shifts.2,
            ..PixelFormat::default()
        }
    }

    fn argb_bytes(pixels: &[u32]) -> Vec<u8> {
        pixels.iter().flat_map(|p| p.to_le_bytes()).collect()
    }

    #[test]
    fn wire_round_trip() {
        let pf = format(16, (31, 63, 31), (11, 5, 0), 1);
        let bytes: Vec<u8> = pf.into();
        let raw: [u8; 16] = bytes.try_into().unwrap();
        assert_eq!(PixelFormat::try_from(raw).unwrap(), pf);
    }

    #[test]
    fn rejects_odd_bits_per_pixel() {
        let mut bytes: [u8; 16] = Vec::from(PixelFormat::default()).try_into().unwrap();
        bytes[0] = 24;
        assert!(PixelFormat::try_from(bytes).is_err());
    }

    #[test]
    fn rejects_paletted_formats() {
        let mut pf = PixelFormat::default();
        pf.true_color_flag = 0;
        assert!(pf.validate().is_err());
    }

    #[test]
    fn rejects_overlapping_channels() {
        let pf = format(16, (255, 255, 255), (0, 4, 8), 0);
        assert!(pf.validate().is_err());
    }

    #[test]
    fn rejects_channels_wider_than_the_pixel() {
        let pf = format(16, (255, 255, 255), (0, 8, 16), 0);
        assert!(pf.validate().is_err());
    }

    #[test]
    fn bgr233_conversion() {
        // bpp 8, depth 6, two bits per channel: red lands at shift 0,
        // green at 2, blue at 4.
        let pf = format(8, (3, 3, 3), (0, 2, 4), 0);
        let converter = PixelConverter::new(pf).unwrap();
        let mut out = BytesMut::new();
        converter.convert_row(&argb_bytes(&[0xFFFF_0000, 0xFF00_FF00]), &mut out);
        assert_eq!(&out[..], &[0x03, 0x0C]);
    }

    #[test]
    fn native_format_is_passthrough() {
        let converter = PixelConverter::new(PixelFormat::rfb_native()).unwrap();
        let row = argb_bytes(&[0xFF12_3456, 0x0089_ABCD]);
        let mut out = BytesMut::new();
        converter.convert_row(&row, &mut out);
        assert_eq!(&out[..], &row[..]);
    }

    #[test]
    fn full_depth_formats_preserve_every_value() {
        // rgba-style layout with 8-bit channels; converting there and
        // extracting back must reproduce the original intensities.
        let pf = format(32, (255, 255, 255), (0, 8, 16), 0);
        let converter = PixelConverter::new(pf).unwrap();
        for &(r, g, b) in &[(0u32, 0u32, 0u32), (255, 255, 255), (18, 52, 86), (1, 254, 127)] {
            let argb = 0xFF00_0000 | (r << 16) | (g << 8) | b;
            let mut out = BytesMut::new();
            converter.convert_row(&argb_bytes(&[argb]), &mut out);
            let word = u32::from_le_bytes([out[0], out[1], out[2], out[3]]);
            assert_eq!((word >> pf.red_shift) & 0xff, r);
            assert_eq!((word >> pf.green_shift) & 0xff, g);
            assert_eq!((word >> pf.blue_shift) & 0xff, b);
        }
    }

    #[test]
    fn big_endian_serialization() {
        let pf = format(16, (31, 63, 31), (11, 5, 0), 1);
        let converter = PixelConverter::new(pf).unwrap();
        let mut out = BytesMut::new();
        converter.convert_row(&argb_bytes(&[0xFFFF_FFFF]), &mut out);
        // All channels at maximum: 0xffff, most significant byte first.
        assert_eq!(&out[..], &[0xff, 0xff]);
        assert_eq!(converter.bytes_per_pixel(), 2);
    }
}
