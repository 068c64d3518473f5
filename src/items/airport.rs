use crate::error::Result;
use crate::item::{GisItem, GisItemBase};
use crate::parser::{CsvRecord, parse_bool, parse_field};
use crate::strings::{StringTable, StringTableBuilder};
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

const METERS_PER_FOOT: f64 = 0.3048;

/// Airport keyed by its ICAO identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Airport {
    #[serde(flatten)]
    pub base: GisItemBase,
    pub city: String,
    pub country: String,
    pub elevation_ft: f32,
    pub runways: i32,
    pub towered: bool,
}

impl Airport {
    /// Create an airport; the item altitude is the field elevation in meters.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        lat: f64,
        lon: f64,
        elevation_ft: f32,
        city: impl Into<String>,
        country: impl Into<String>,
        runways: i32,
        towered: bool,
    ) -> Self {
        Self {
            base: GisItemBase::new(id, lat, lon, elevation_ft as f64 * METERS_PER_FOOT),
            city: city.into(),
            country: country.into(),
            elevation_ft,
            runways,
            towered,
        }
    }
}

impl GisItem for Airport {
    const SCHEMA: &'static str = "airport";
    const PAYLOAD_SIZE: usize = 20;

    fn base(&self) -> &GisItemBase {
        &self.base
    }

    fn add_strings(&self, strings: &mut StringTableBuilder) {
        strings.add_string(&self.city);
        strings.add_string(&self.country);
    }

    fn write_payload(&self, buf: &mut BytesMut, strings: &StringTableBuilder) -> Result<()> {
        buf.put_i32(strings.require(&self.city)?);
        buf.put_i32(strings.require(&self.country)?);
        buf.put_f32(self.elevation_ft);
        buf.put_i32(self.runways);
        buf.put_i32(self.towered as i32);
        Ok(())
    }

    fn read_payload(base: GisItemBase, payload: &mut &[u8], strings: &StringTable) -> Result<Self> {
        let city = strings.resolve(payload.get_i32())?.to_owned();
        let country = strings.resolve(payload.get_i32())?.to_owned();
        Ok(Airport {
            base,
            city,
            country,
            elevation_ft: payload.get_f32(),
            runways: payload.get_i32(),
            towered: payload.get_i32() != 0,
        })
    }
}

impl CsvRecord for Airport {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "lat",
        "lon",
        "elevation_ft",
        "city",
        "country",
        "runways",
        "towered",
    ];

    fn from_fields(fields: &[&str]) -> Result<Self> {
        Ok(Airport::new(
            fields[0],
            parse_field(fields[1], "lat")?,
            parse_field(fields[2], "lon")?,
            parse_field(fields[3], "elevation_ft")?,
            fields[4],
            fields[5],
            parse_field(fields[6], "runways")?,
            parse_bool(fields[7], "towered")?,
        ))
    }
}
