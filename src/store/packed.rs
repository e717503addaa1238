//! # Packed Integer Codecs
//!
//! Two small, pure codecs used throughout the on-disk format:
//!
//! ## Six-Byte Signed Pointers
//!
//! Every stored page number and row id is a 48-bit signed integer: a 47-bit
//! magnitude with the sign carried in the top bit of the first byte. This is
//! a dedicated fixed-width codec, not a varint, so pointer fields inside
//! page headers and slot arrays stay exactly 6 bytes wide:
//!
//! ```text
//! byte 0: [sign | magnitude bits 46..40]
//! byte 1..5: magnitude bits 39..0, big-endian
//! ```
//!
//! Zero encodes as six zero bytes and means "no pointer" everywhere.
//!
//! ## Varint Lengths
//!
//! The transaction log prefixes each batch with a packed length. The
//! encoding favors small values with a single byte and escapes upward:
//!
//! | Value range       | Bytes | Format                               |
//! |-------------------|-------|--------------------------------------|
//! | 0 - 240           | 1     | `[value]`                            |
//! | 241 - 2287        | 2     | `[241 + (v-240)>>8, (v-240) & 0xFF]` |
//! | 2288 - 67823      | 3     | `[249, hi, lo]` over `v - 2288`      |
//! | 67824 - 2^32 - 1  | 5     | `[250, 4-byte big-endian]`           |
//!
//! All functions operate on byte slices directly and perform no allocation.

use eyre::{bail, ensure, Result};

/// Largest magnitude representable in a six-byte packed pointer.
pub const SIX_MAX_MAGNITUDE: i64 = (1i64 << 47) - 1;

/// Reads a 48-bit signed packed pointer at `off`.
#[inline]
pub fn six_get(buf: &[u8], off: usize) -> i64 {
    let b = &buf[off..off + 6];
    let magnitude = ((b[0] as i64 & 0x7F) << 40)
        | ((b[1] as i64) << 32)
        | ((b[2] as i64) << 24)
        | ((b[3] as i64) << 16)
        | ((b[4] as i64) << 8)
        | (b[5] as i64);
    if b[0] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Writes a 48-bit signed packed pointer at `off`.
#[inline]
pub fn six_put(buf: &mut [u8], off: usize, value: i64) {
    let magnitude = value.unsigned_abs();
    debug_assert!(
        magnitude <= SIX_MAX_MAGNITUDE as u64,
        "value {value} exceeds 47-bit packed pointer magnitude"
    );
    let sign = if value < 0 { 0x80u8 } else { 0 };
    let b = &mut buf[off..off + 6];
    b[0] = sign | ((magnitude >> 40) as u8 & 0x7F);
    b[1] = (magnitude >> 32) as u8;
    b[2] = (magnitude >> 24) as u8;
    b[3] = (magnitude >> 16) as u8;
    b[4] = (magnitude >> 8) as u8;
    b[5] = magnitude as u8;
}

/// Number of bytes `len_put` will use for `value`.
pub fn len_size(value: u64) -> usize {
    if value <= 240 {
        1
    } else if value <= 2287 {
        2
    } else if value <= 67823 {
        3
    } else {
        5
    }
}

/// Encodes a packed length into `out`, returning the bytes written.
pub fn len_put(value: u64, out: &mut Vec<u8>) -> usize {
    if value <= 240 {
        out.push(value as u8);
        1
    } else if value <= 2287 {
        let v = value - 240;
        out.push(241 + (v >> 8) as u8);
        out.push(v as u8);
        2
    } else if value <= 67823 {
        let v = value - 2288;
        out.push(249);
        out.push((v >> 8) as u8);
        out.push(v as u8);
        3
    } else {
        assert!(value <= u32::MAX as u64, "packed length exceeds u32 range");
        out.push(250);
        out.extend_from_slice(&(value as u32).to_be_bytes());
        5
    }
}

/// Decodes a packed length from the front of `buf`, returning
/// `(value, bytes_consumed)`.
pub fn len_get(buf: &[u8]) -> Result<(u64, usize)> {
    ensure!(!buf.is_empty(), "empty buffer for packed length");
    let marker = buf[0];
    match marker {
        0..=240 => Ok((marker as u64, 1)),
        241..=248 => {
            ensure!(buf.len() >= 2, "truncated 2-byte packed length");
            Ok((240 + (((marker - 241) as u64) << 8) + buf[1] as u64, 2))
        }
        249 => {
            ensure!(buf.len() >= 3, "truncated 3-byte packed length");
            Ok((2288 + ((buf[1] as u64) << 8) + buf[2] as u64, 3))
        }
        250 => {
            ensure!(buf.len() >= 5, "truncated 5-byte packed length");
            let v = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
            Ok((v as u64, 5))
        }
        _ => bail!("invalid packed length marker: {marker}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn six_roundtrip(value: i64) {
        let mut buf = [0u8; 8];
        six_put(&mut buf, 1, value);
        assert_eq!(six_get(&buf, 1), value, "roundtrip of {value}");
    }

    #[test]
    fn six_byte_roundtrip_boundaries() {
        six_roundtrip(0);
        six_roundtrip(1);
        six_roundtrip(-1);
        six_roundtrip(4095);
        six_roundtrip(SIX_MAX_MAGNITUDE);
        six_roundtrip(-SIX_MAX_MAGNITUDE);
    }

    #[test]
    fn six_byte_zero_is_all_zero_bytes() {
        let mut buf = [0xFFu8; 6];
        six_put(&mut buf, 0, 0);
        assert_eq!(buf, [0u8; 6]);
    }

    #[test]
    fn six_byte_sign_bit_in_first_byte() {
        let mut buf = [0u8; 6];
        six_put(&mut buf, 0, -1);
        assert_eq!(buf[0] & 0x80, 0x80);
        assert_eq!(buf[5], 1);
    }

    #[test]
    fn len_roundtrip_boundaries() {
        for v in [0u64, 1, 240, 241, 2287, 2288, 67823, 67824, u32::MAX as u64] {
            let mut out = Vec::new();
            let written = len_put(v, &mut out);
            assert_eq!(written, out.len());
            assert_eq!(written, len_size(v));
            let (decoded, consumed) = len_get(&out).expect("should decode");
            assert_eq!(decoded, v);
            assert_eq!(consumed, written);
        }
    }

    #[test]
    fn len_get_rejects_empty_buffer() {
        assert!(len_get(&[]).is_err());
    }

    #[test]
    fn len_get_rejects_truncated_encoding() {
        assert!(len_get(&[249, 0]).is_err());
        assert!(len_get(&[250, 0, 0]).is_err());
    }

    #[test]
    fn len_get_rejects_reserved_marker() {
        assert!(len_get(&[252]).is_err());
    }
}
