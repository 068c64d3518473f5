//! Fixed-size item records.
//!
//! Every record starts with the same 56-byte prefix:
//!
//! ```text
//! hash:i32 ecefX:f64 ecefY:f64 ecefZ:f64 lat:f64 lon:f64 alt:f64 nameIndex:i32
//! ```
//!
//! followed by a schema-specific payload of `GisItem::PAYLOAD_SIZE` bytes.
//! Variable-length payload data goes into the string table and is stored as
//! an index.

use crate::datum::{Ecef, GeoPos};
use crate::error::{GisError, Result};
use crate::format::{read_bytes, read_i32};
use crate::keymap::name_hash;
use crate::strings::{StringTable, StringTableBuilder};
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

pub const HASH_OFFSET: usize = 0;
pub const ECEF_OFFSET: usize = 4;
pub const NAME_INDEX_OFFSET: usize = 52;
/// Size of the common record prefix.
pub const BASE_SIZE: usize = 56;

/// Fields shared by all item schemas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GisItemBase {
    pub name: String,
    pub hash: i32,
    pub pos: GeoPos,
    pub ecef: Ecef,
}

impl GisItemBase {
    pub fn new(name: impl Into<String>, lat: f64, lon: f64, alt: f64) -> Self {
        Self::from_pos(name, GeoPos::new(lat, lon, alt))
    }

    pub fn from_pos(name: impl Into<String>, pos: GeoPos) -> Self {
        let name = name.into();
        Self {
            hash: name_hash(&name),
            ecef: pos.to_ecef(),
            name,
            pos,
        }
    }

    fn write(&self, buf: &mut BytesMut, strings: &StringTableBuilder) -> Result<()> {
        buf.put_i32(self.hash);
        buf.put_f64(self.ecef.x);
        buf.put_f64(self.ecef.y);
        buf.put_f64(self.ecef.z);
        buf.put_f64(self.pos.lat);
        buf.put_f64(self.pos.lon);
        buf.put_f64(self.pos.alt);
        buf.put_i32(strings.require(&self.name)?);
        Ok(())
    }

    fn read(rec: &mut &[u8], strings: &StringTable) -> Result<Self> {
        let hash = rec.get_i32();
        let ecef = Ecef::new(rec.get_f64(), rec.get_f64(), rec.get_f64());
        let pos = GeoPos::new(rec.get_f64(), rec.get_f64(), rec.get_f64());
        let name = strings.resolve(rec.get_i32())?.to_owned();
        Ok(Self {
            name,
            hash,
            pos,
            ecef,
        })
    }
}

/// A record schema stored in a database.
///
/// Implementations define the payload that follows the common prefix. The
/// payload must always occupy exactly `PAYLOAD_SIZE` bytes.
pub trait GisItem: Sized {
    /// Schema name, stored as string 0 of the database.
    const SCHEMA: &'static str;
    const PAYLOAD_SIZE: usize;
    const ITEM_SIZE: usize = BASE_SIZE + Self::PAYLOAD_SIZE;

    fn base(&self) -> &GisItemBase;

    fn name(&self) -> &str {
        &self.base().name
    }

    fn pos(&self) -> GeoPos {
        self.base().pos
    }

    fn ecef(&self) -> Ecef {
        self.base().ecef
    }

    /// Register payload strings. The item name is registered by the factory.
    fn add_strings(&self, _strings: &mut StringTableBuilder) {}

    fn write_payload(&self, buf: &mut BytesMut, strings: &StringTableBuilder) -> Result<()>;

    fn read_payload(base: GisItemBase, payload: &mut &[u8], strings: &StringTable)
    -> Result<Self>;
}

/// Serialize `item` as one full record.
pub fn write_item<T: GisItem>(
    item: &T,
    buf: &mut BytesMut,
    strings: &StringTableBuilder,
) -> Result<()> {
    let start = buf.len();
    item.base().write(buf, strings)?;
    item.write_payload(buf, strings)?;
    let written = buf.len() - start;
    if written != T::ITEM_SIZE {
        return Err(GisError::InvalidInput(format!(
            "{} record for '{}' is {} bytes, expected {}",
            T::SCHEMA,
            item.name(),
            written,
            T::ITEM_SIZE
        )));
    }
    Ok(())
}

/// Decode the record at absolute offset `off`.
pub fn read_item<T: GisItem>(buf: &[u8], off: usize, strings: &StringTable) -> Result<T> {
    let mut rec = read_bytes(buf, off, T::ITEM_SIZE)?;
    let base = GisItemBase::read(&mut rec, strings)?;
    T::read_payload(base, &mut rec, strings)
}

/// Whether the record at `off` carries the name `key` with hash `hash`.
/// The stored hash is compared first so most collisions never touch the
/// string table.
pub fn name_matches(
    buf: &[u8],
    off: usize,
    strings: &StringTable,
    hash: i32,
    key: &str,
) -> Result<bool> {
    if read_i32(buf, off + HASH_OFFSET)? != hash {
        return Ok(false);
    }
    let name_idx = read_i32(buf, off + NAME_INDEX_OFFSET)?;
    Ok(strings.resolve(name_idx)? == key)
}
