//! Binary layout of an RGIS database file.
//!
//! All values are big-endian. Offsets stored in the file are absolute byte
//! offsets from the start of the buffer.
//!
//! ```text
//! Header:  magic:i32 totalLength:i32 crc32:i32 date:i64
//! Strings: nStrings:i32 { strLen:i32 bytes[strLen] 0x00 } * nStrings
//! Items:   nItems:i32 itemSize:i32 { record[itemSize] } * nItems
//! KeyMap:  mapLength:i32 mapRehash:i32 { itemOffset:i32 } * mapLength
//! KdTree:  { itemOffset:i32 leftOffset:i32 rightOffset:i32 } * nItems
//! ```

use crate::error::{GisError, Result};
use bytes::{Buf, BufMut, BytesMut};

/// "RGIS"
pub const MAGIC: i32 = 0x5247_4953;

pub const HEADER_SIZE: usize = 20;
pub const TOTAL_LENGTH_OFFSET: usize = 4;
pub const CRC32_OFFSET: usize = 8;
pub const DATE_OFFSET: usize = 12;

/// Size of one kd-tree node record.
pub const NODE_SIZE: usize = 12;

/// Marks an unused key-map slot or an absent kd-tree child.
pub const EMPTY: i32 = -1;

/// Fixed-size file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: i32,
    pub total_length: i32,
    pub crc32: i32,
    /// Build time in milliseconds since the unix epoch.
    pub date: i64,
}

impl Header {
    pub fn read(buf: &[u8]) -> Result<Header> {
        if buf.len() < HEADER_SIZE {
            return Err(GisError::format(format!(
                "buffer of {} bytes is shorter than the header",
                buf.len()
            )));
        }
        let mut hdr = &buf[..HEADER_SIZE];
        Ok(Header {
            magic: hdr.get_i32(),
            total_length: hdr.get_i32(),
            crc32: hdr.get_i32(),
            date: hdr.get_i64(),
        })
    }

    /// Write a header with reserved length and checksum fields.
    pub fn write_reserved(buf: &mut BytesMut, date: i64) {
        buf.put_i32(MAGIC);
        buf.put_i32(0);
        buf.put_i32(0);
        buf.put_i64(date);
    }
}

/// Fill in the total length and CRC32 of a fully serialized buffer.
pub fn backfill_header(buf: &mut [u8]) -> Result<()> {
    let len = to_i32(buf.len(), "total length")?;
    let crc = checksum(buf);
    buf[TOTAL_LENGTH_OFFSET..TOTAL_LENGTH_OFFSET + 4].copy_from_slice(&len.to_be_bytes());
    buf[CRC32_OFFSET..CRC32_OFFSET + 4].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

/// CRC32 over everything following the header.
pub fn checksum(buf: &[u8]) -> i32 {
    crc32fast::hash(buf.get(HEADER_SIZE..).unwrap_or_default()) as i32
}

/// Convert a size or offset into the i32 range of the file format.
pub fn to_i32(v: usize, what: &str) -> Result<i32> {
    i32::try_from(v)
        .map_err(|_| GisError::TooLarge(format!("{} {} exceeds the 32-bit offset range", what, v)))
}

#[inline]
fn slice_at(buf: &[u8], off: usize, len: usize) -> Result<&[u8]> {
    off.checked_add(len)
        .and_then(|end| buf.get(off..end))
        .ok_or_else(|| {
            GisError::corrupted(format!(
                "read of {} bytes at offset {} outside buffer of {} bytes",
                len,
                off,
                buf.len()
            ))
        })
}

#[inline]
pub fn read_i32(buf: &[u8], off: usize) -> Result<i32> {
    Ok(slice_at(buf, off, 4)?.get_i32())
}

/// Read a stored offset, mapping [`EMPTY`] to `None`.
#[inline]
pub fn read_offset(buf: &[u8], off: usize) -> Result<Option<usize>> {
    match read_i32(buf, off)? {
        EMPTY => Ok(None),
        v if v >= 0 => Ok(Some(v as usize)),
        v => Err(GisError::corrupted(format!(
            "negative offset {} at {}",
            v, off
        ))),
    }
}

#[inline]
pub fn read_f64(buf: &[u8], off: usize) -> Result<f64> {
    Ok(slice_at(buf, off, 8)?.get_f64())
}

/// Borrow `len` bytes at `off`.
#[inline]
pub fn read_bytes(buf: &[u8], off: usize, len: usize) -> Result<&[u8]> {
    slice_at(buf, off, len)
}
