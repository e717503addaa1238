//! # Record Header Codec
//!
//! Every record stored in a data page begins with a 3-byte header packing
//! two sizes: the *available* size (how many payload bytes the slot
//! reserves) and the *current* size (how many of them the record actually
//! uses right now).
//!
//! ## Layout
//!
//! ```text
//! byte 0:    current size, stored as (available - current)
//!            the value 255 is reserved and means current == 0
//! bytes 1-2: available size, compressed into a big-endian i16
//! ```
//!
//! ## Current-Size Encoding
//!
//! Storing the *delta* from the available size means a record can grow or
//! shrink in place with a one-byte metadata update, as long as the delta
//! stays within 0..=254. A shrink of more than 254 bytes (or any growth past
//! the available size) forces relocation instead.
//!
//! ## Available-Size Compression
//!
//! Values up to 32767 are stored directly. Larger values are stored as a
//! negative count of 254-byte steps above 32767:
//!
//! ```text
//! stored >= 0:  available = stored
//! stored <  0:  available = 32767 + (-stored) * 254
//! ```
//!
//! which caps a single slot at `32767 + 32768 * 254` = 8,355,839 bytes.
//! Only sizes that survive the compress/decompress round trip ("rounded"
//! sizes) can be stored; callers round a requested capacity first with
//! [`round_available_size`].

use eyre::{ensure, Result};

/// Size of the record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 3;

/// Largest delta between available and current size that the one-byte
/// encoding can express.
pub const MAX_SIZE_DELTA: usize = 254;

/// Largest available size a single record header can address.
pub const MAX_AVAILABLE_SIZE: usize = 32767 + 32768 * 254;

const ZERO_CURRENT: u8 = 255;
const DIRECT_LIMIT: usize = 32767;
const STEP: usize = 254;

/// Rounds a requested capacity up to the nearest storable available size.
pub fn round_available_size(size: usize) -> Result<usize> {
    ensure!(
        size <= MAX_AVAILABLE_SIZE,
        "record size {size} exceeds maximum available size {MAX_AVAILABLE_SIZE}"
    );
    if size <= DIRECT_LIMIT {
        Ok(size)
    } else {
        let steps = (size - DIRECT_LIMIT).div_ceil(STEP);
        Ok(DIRECT_LIMIT + steps * STEP)
    }
}

/// Rounds a capacity *down* to the nearest storable available size. Used
/// when trimming a freed slot, where rounding up would overstate capacity.
pub fn round_down_available_size(size: usize) -> usize {
    if size <= DIRECT_LIMIT {
        size
    } else {
        let steps = (size - DIRECT_LIMIT) / STEP;
        DIRECT_LIMIT + steps * STEP
    }
}

/// Reads the available size from a record header at `off`.
pub fn get_available_size(buf: &[u8], off: usize) -> usize {
    let stored = i16::from_be_bytes([buf[off + 1], buf[off + 2]]);
    if stored >= 0 {
        stored as usize
    } else {
        DIRECT_LIMIT + (-(stored as i32)) as usize * STEP
    }
}

/// Writes the available size into a record header at `off`. The size must
/// already be rounded.
pub fn set_available_size(buf: &mut [u8], off: usize, size: usize) -> Result<()> {
    ensure!(
        round_available_size(size)? == size,
        "available size {size} is not rounded"
    );
    let stored: i16 = if size <= DIRECT_LIMIT {
        size as i16
    } else {
        -(((size - DIRECT_LIMIT) / STEP) as i32) as i16
    };
    buf[off + 1..off + 3].copy_from_slice(&stored.to_be_bytes());
    Ok(())
}

/// Reads the current size from a record header at `off`, given the decoded
/// available size.
pub fn get_current_size(buf: &[u8], off: usize, available: usize) -> usize {
    let delta = buf[off];
    if delta == ZERO_CURRENT {
        0
    } else {
        available - delta as usize
    }
}

/// Writes the current size into a record header at `off`. A length of zero
/// uses the reserved sentinel; any other length must lie within
/// `available - 254 ..= available`.
pub fn set_current_size(buf: &mut [u8], off: usize, available: usize, len: usize) -> Result<()> {
    if len == 0 {
        buf[off] = ZERO_CURRENT;
        return Ok(());
    }
    ensure!(
        len <= available && available - len <= MAX_SIZE_DELTA,
        "current size {len} not within [{}, {available}]",
        available.saturating_sub(MAX_SIZE_DELTA)
    );
    buf[off] = (available - len) as u8;
    Ok(())
}
