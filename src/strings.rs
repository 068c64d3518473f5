//! Deduplicated string table shared by all items of a database.
//!
//! At build time strings are collected into an insertion-ordered set; index 0
//! is the schema name. At read time the table is decoded once into owned
//! strings so lookups by index never touch the raw bytes again.

use crate::error::{GisError, Result};
use crate::format::{read_bytes, read_i32, to_i32};
use bytes::{BufMut, BytesMut};
use rustc_hash::FxHashMap;

/// Build-side string table.
#[derive(Debug, Default, Clone)]
pub struct StringTableBuilder {
    index: FxHashMap<String, u32>,
    strings: Vec<String>,
}

impl StringTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string if it is not already present. Returns `true` when the
    /// string was newly added.
    pub fn add_string(&mut self, s: &str) -> bool {
        if self.index.contains_key(s) {
            return false;
        }
        let idx = self.strings.len() as u32;
        self.index.insert(s.to_owned(), idx);
        self.strings.push(s.to_owned());
        true
    }

    pub fn index_of(&self, s: &str) -> Option<u32> {
        self.index.get(s).copied()
    }

    /// Index of a string that must have been added before serialization.
    pub(crate) fn require(&self, s: &str) -> Result<i32> {
        self.index_of(s).map(|i| i as i32).ok_or_else(|| {
            GisError::InvalidInput(format!("string {:?} missing from string table", s))
        })
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }

    /// Serialize as `nStrings { strLen bytes 0x00 }*`.
    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i32(to_i32(self.strings.len(), "string count")?);
        for s in &self.strings {
            buf.put_i32(to_i32(s.len(), "string length")?);
            buf.put_slice(s.as_bytes());
            buf.put_u8(0);
        }
        Ok(())
    }
}

/// Read-side string table, decoded once when a database is opened.
#[derive(Debug, Default, Clone)]
pub struct StringTable {
    strings: Vec<String>,
}

impl StringTable {
    /// Decode the table starting at `off`. Returns the table and the offset
    /// of the first byte after it.
    pub fn read(buf: &[u8], off: usize) -> Result<(StringTable, usize)> {
        let n = read_i32(buf, off)?;
        if n < 0 {
            return Err(GisError::format(format!("negative string count {}", n)));
        }
        let mut pos = off + 4;
        // each entry takes at least 5 bytes, so a count the buffer cannot
        // hold fails below on the first out-of-range read
        let room = buf.len().saturating_sub(pos) / 5;
        let mut strings = Vec::with_capacity((n as usize).min(room));

        for i in 0..n {
            let len = read_i32(buf, pos)?;
            if len < 0 {
                return Err(GisError::format(format!(
                    "negative length {} for string {}",
                    len, i
                )));
            }
            let len = len as usize;
            let bytes = read_bytes(buf, pos + 4, len + 1)?;
            if bytes[len] != 0 {
                return Err(GisError::format(format!("string {} is not terminated", i)));
            }
            let s = std::str::from_utf8(&bytes[..len])
                .map_err(|e| GisError::format(format!("string {} is not UTF-8: {}", i, e)))?;
            strings.push(s.to_owned());
            pos += 4 + len + 1;
        }

        Ok((StringTable { strings }, pos))
    }

    #[inline]
    pub fn get(&self, idx: i32) -> Option<&str> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.strings.get(i))
            .map(String::as_str)
    }

    /// Like [`StringTable::get`], but a missing index is corruption.
    #[inline]
    pub(crate) fn resolve(&self, idx: i32) -> Result<&str> {
        self.get(idx)
            .ok_or_else(|| GisError::corrupted(format!("string index {} out of range", idx)))
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }
}
