use crate::error::Result;
use crate::item::{GisItem, GisItemBase};
use crate::parser::{CsvRecord, parse_field};
use crate::strings::{StringTable, StringTableBuilder};
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

/// A generic named location with a category and free-form description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Place {
    #[serde(flatten)]
    pub base: GisItemBase,
    pub kind: String,
    pub description: String,
}

impl Place {
    pub fn new(
        name: impl Into<String>,
        lat: f64,
        lon: f64,
        alt: f64,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            base: GisItemBase::new(name, lat, lon, alt),
            kind: kind.into(),
            description: description.into(),
        }
    }
}

impl GisItem for Place {
    const SCHEMA: &'static str = "place";
    const PAYLOAD_SIZE: usize = 8;

    fn base(&self) -> &GisItemBase {
        &self.base
    }

    fn add_strings(&self, strings: &mut StringTableBuilder) {
        strings.add_string(&self.kind);
        strings.add_string(&self.description);
    }

    fn write_payload(&self, buf: &mut BytesMut, strings: &StringTableBuilder) -> Result<()> {
        buf.put_i32(strings.require(&self.kind)?);
        buf.put_i32(strings.require(&self.description)?);
        Ok(())
    }

    fn read_payload(base: GisItemBase, payload: &mut &[u8], strings: &StringTable) -> Result<Self> {
        let kind = strings.resolve(payload.get_i32())?.to_owned();
        let description = strings.resolve(payload.get_i32())?.to_owned();
        Ok(Place {
            base,
            kind,
            description,
        })
    }
}

impl CsvRecord for Place {
    const COLUMNS: &'static [&'static str] = &["name", "lat", "lon", "alt", "kind", "description"];

    fn from_fields(fields: &[&str]) -> Result<Self> {
        Ok(Place::new(
            fields[0],
            parse_field(fields[1], "lat")?,
            parse_field(fields[2], "lon")?,
            parse_field(fields[3], "alt")?,
            fields[4],
            fields[5],
        ))
    }
}
