//! Read-only query engine over a serialized database.
//!
//! A [`GisItemDB`] wraps one immutable byte buffer (a memory-mapped file or
//! an in-memory [`Bytes`]). Section offsets are derived once when the
//! database is opened; afterwards every query is a pure read, so a database
//! can be shared between threads without locking.

use crate::config::Config;
use crate::datum::{Ecef, GeoPos};
use crate::error::{GisError, Result};
use crate::format::{HEADER_SIZE, Header, MAGIC, NODE_SIZE, checksum, read_i32};
use crate::item::{GisItem, name_matches, read_item};
use crate::kdtree::{
    KNearestNeighbors, KdTreeRef, Metric, NearestNeighbor, NeighborCollector, RangeNeighbors,
};
use crate::keymap::{self, MapParams, name_hash};
use crate::strings::StringTable;
use bytes::Bytes;
use memmap2::Mmap;
use serde::Serialize;
use std::fs::File;
use std::marker::PhantomData;
use std::ops::Deref;
use std::path::Path;

#[derive(Debug)]
enum Backing {
    Bytes(Bytes),
    Mmap(Mmap),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Backing::Bytes(b) => b,
            Backing::Mmap(m) => m,
        }
    }
}

/// Summary of a database's structure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DbInfo {
    pub schema: String,
    pub byte_length: usize,
    pub build_date: i64,
    pub crc32: u32,
    pub n_strings: usize,
    pub n_items: usize,
    pub item_size: usize,
    pub map_length: usize,
    pub map_rehash: usize,
    pub kdtree_depth: usize,
    pub items_offset: usize,
    pub keymap_offset: usize,
    pub kdtree_offset: usize,
}

/// Immutable, queryable view of a database holding items of schema `T`.
#[derive(Debug)]
pub struct GisItemDB<T: GisItem> {
    data: Backing,
    header: Header,
    strings: StringTable,
    metric: Metric,
    n_items: usize,
    items_off: usize,
    map_params: MapParams,
    slots_off: usize,
    kd_off: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T: GisItem> GisItemDB<T> {
    /// Memory-map and open the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        if file.metadata()?.len() < HEADER_SIZE as u64 {
            return Err(GisError::format(format!(
                "{} is too short to be a database",
                path.display()
            )));
        }
        // SAFETY: database files are written once via rename and never
        // modified in place afterwards.
        let mmap = unsafe { Mmap::map(&file)? };
        let db = Self::from_backing(Backing::Mmap(mmap), config)?;
        log::info!(
            "opened {} database {} ({} items, {} bytes)",
            T::SCHEMA,
            path.display(),
            db.n_items,
            db.data.len()
        );
        Ok(db)
    }

    /// Open a database held in memory.
    pub fn from_bytes(bytes: Bytes) -> Result<Self> {
        Self::from_bytes_with_config(bytes, Config::default())
    }

    pub fn from_bytes_with_config(bytes: Bytes, config: Config) -> Result<Self> {
        Self::from_backing(Backing::Bytes(bytes), config)
    }

    fn from_backing(data: Backing, config: Config) -> Result<Self> {
        config.validate().map_err(GisError::Config)?;
        let buf: &[u8] = &data;

        let header = Header::read(buf)?;
        if header.magic != MAGIC {
            return Err(GisError::format(format!(
                "bad magic {:#010x}",
                header.magic as u32
            )));
        }
        if header.total_length < 0 || header.total_length as usize != buf.len() {
            return Err(GisError::format(format!(
                "header length {} does not match buffer length {}",
                header.total_length,
                buf.len()
            )));
        }
        if config.verify_checksum {
            let actual = checksum(buf);
            if actual != header.crc32 {
                log::warn!(
                    "checksum mismatch: header {:#010x}, computed {:#010x}",
                    header.crc32 as u32,
                    actual as u32
                );
                return Err(GisError::format("checksum mismatch"));
            }
        }

        let (strings, items_hdr) = StringTable::read(buf, HEADER_SIZE)?;
        match strings.get(0) {
            Some(schema) if schema == T::SCHEMA => {}
            found => {
                return Err(GisError::SchemaMismatch {
                    expected: T::SCHEMA.to_owned(),
                    found: found.unwrap_or_default().to_owned(),
                });
            }
        }

        let n_items = read_i32(buf, items_hdr)?;
        let item_size = read_i32(buf, items_hdr + 4)?;
        if n_items < 0 {
            return Err(GisError::format(format!("negative item count {}", n_items)));
        }
        if item_size < 0 || item_size as usize != T::ITEM_SIZE {
            return Err(GisError::format(format!(
                "item size {} does not match {} record size {}",
                item_size,
                T::SCHEMA,
                T::ITEM_SIZE
            )));
        }
        let n_items = n_items as usize;
        let items_off = items_hdr + 8;

        let map_off = items_off + n_items * T::ITEM_SIZE;
        let map_params = keymap::read_params(buf, map_off)?;
        let slots_off = map_off + 8;
        let kd_off = slots_off + 4 * map_params.length;

        let expected_len = kd_off + n_items * NODE_SIZE;
        if expected_len != buf.len() {
            return Err(GisError::format(format!(
                "sections end at {} but buffer has {} bytes",
                expected_len,
                buf.len()
            )));
        }

        log::debug!(
            "{} sections: strings={} items@{} map@{} (length={} rehash={}) kdtree@{}",
            T::SCHEMA,
            strings.len(),
            items_off,
            map_off,
            map_params.length,
            map_params.rehash,
            kd_off
        );

        Ok(Self {
            data,
            header,
            strings,
            metric: Metric::new(config.long_range_threshold_m),
            n_items,
            items_off,
            map_params,
            slots_off,
            kd_off,
            _item: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.n_items
    }

    pub fn is_empty(&self) -> bool {
        self.n_items == 0
    }

    pub fn schema(&self) -> &str {
        T::SCHEMA
    }

    /// Build time in epoch milliseconds.
    pub fn build_date(&self) -> i64 {
        self.header.date
    }

    pub fn string(&self, idx: i32) -> Option<&str> {
        self.strings.get(idx)
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decode the item record at absolute byte offset `off`.
    pub fn read_item(&self, off: usize) -> Result<T> {
        read_item(&self.data, off, &self.strings)
    }

    /// All items in file order.
    pub fn items(&self) -> impl Iterator<Item = Result<T>> + '_ {
        (0..self.n_items).map(move |i| self.read_item(self.items_off + i * T::ITEM_SIZE))
    }

    /// Exact lookup by item name.
    ///
    /// Returns `Ok(None)` if no item has this name and
    /// [`GisError::Corrupted`] if the key map is damaged.
    pub fn get_item(&self, key: &str) -> Result<Option<T>> {
        let buf: &[u8] = &self.data;
        let hash = name_hash(key);
        let found = keymap::lookup(
            buf,
            self.slots_off,
            self.map_params,
            self.n_items,
            hash,
            |off| name_matches(buf, off, &self.strings, hash, key),
        )?;
        found.map(|off| self.read_item(off)).transpose()
    }

    /// The item closest to `pos` and its distance in meters.
    pub fn get_nearest_item(&self, pos: &GeoPos) -> Result<Option<(T, f64)>> {
        let mut nn = NearestNeighbor::new(self.metric);
        self.search(pos, &mut nn)?;
        nn.result()
            .map(|(dist, off)| Ok((self.read_item(off)?, dist)))
            .transpose()
    }

    /// Up to `n` items closest to `pos`, nearest first.
    pub fn get_n_nearest_items(&self, pos: &GeoPos, n: usize) -> Result<Vec<(T, f64)>> {
        let mut knn = KNearestNeighbors::new(self.metric, n);
        self.search(pos, &mut knn)?;
        self.resolve(knn.into_results())
    }

    /// All items within `dist` meters of `pos`, nearest first.
    pub fn get_items_within(&self, pos: &GeoPos, dist: f64) -> Result<Vec<(T, f64)>> {
        if dist.is_nan() {
            return Err(GisError::InvalidInput("query distance is NaN".into()));
        }
        let mut range = RangeNeighbors::new(self.metric, dist);
        self.search(pos, &mut range)?;
        self.resolve(range.into_results())
    }

    fn search<C: NeighborCollector>(&self, pos: &GeoPos, collector: &mut C) -> Result<()> {
        if !(pos.lat.is_finite() && pos.lon.is_finite() && pos.alt.is_finite()) {
            return Err(GisError::InvalidInput(format!(
                "query position must be finite: {:?}",
                pos
            )));
        }
        self.search_ecef(&pos.to_ecef(), collector)
    }

    fn search_ecef<C: NeighborCollector>(&self, target: &Ecef, collector: &mut C) -> Result<()> {
        self.kdtree().search(target, collector)
    }

    fn kdtree(&self) -> KdTreeRef<'_> {
        let root = (self.n_items > 0).then_some(self.kd_off);
        KdTreeRef::new(&self.data, root, self.n_items)
    }

    fn resolve(&self, hits: Vec<(f64, usize)>) -> Result<Vec<(T, f64)>> {
        hits.into_iter()
            .map(|(dist, off)| Ok((self.read_item(off)?, dist)))
            .collect()
    }

    pub fn info(&self) -> Result<DbInfo> {
        Ok(DbInfo {
            schema: T::SCHEMA.to_owned(),
            byte_length: self.data.len(),
            build_date: self.header.date,
            crc32: self.header.crc32 as u32,
            n_strings: self.strings.len(),
            n_items: self.n_items,
            item_size: T::ITEM_SIZE,
            map_length: self.map_params.length,
            map_rehash: self.map_params.rehash,
            kdtree_depth: self.kdtree().depth()?,
            items_offset: self.items_off,
            keymap_offset: self.slots_off - 8,
            kdtree_offset: self.kd_off,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::GisItemDBFactory;
    use crate::items::{Airport, Place};
    use bytes::BytesMut;

    fn sample_bytes() -> Bytes {
        let mut factory = GisItemDBFactory::new().with_build_date(1_000);
        factory
            .add_item(Place::new("origin", 0.0, 0.0, 0.0, "marker", "lat 0 lon 0"))
            .unwrap();
        factory
            .add_item(Place::new("east", 0.0, 1.0, 0.0, "marker", ""))
            .unwrap();
        factory
            .add_item(Place::new("north", 1.0, 0.0, 0.0, "marker", ""))
            .unwrap();
        factory.to_bytes().unwrap()
    }

    #[test]
    fn test_db_is_send_sync() {
        fn assert_send_sync<S: Send + Sync>() {}
        assert_send_sync::<GisItemDB<Place>>();
        assert_send_sync::<GisItemDB<Airport>>();
    }

    #[test]
    fn test_open_and_lookup() {
        let db = GisItemDB::<Place>::from_bytes(sample_bytes()).unwrap();
        assert_eq!(db.len(), 3);
        assert_eq!(db.schema(), "place");
        assert_eq!(db.build_date(), 1_000);
        assert_eq!(db.string(0), Some("place"));

        let origin = db.get_item("origin").unwrap().unwrap();
        assert_eq!(origin.description, "lat 0 lon 0");
        assert!(db.get_item("west").unwrap().is_none());
        assert!(db.get_item("").unwrap().is_none());
    }

    #[test]
    fn test_schema_mismatch() {
        let err = GisItemDB::<Airport>::from_bytes(sample_bytes()).unwrap_err();
        assert!(matches!(err, GisError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_bad_magic_and_length() {
        let mut raw = BytesMut::from(&sample_bytes()[..]);
        raw[0] = b'X';
        let err = GisItemDB::<Place>::from_bytes(raw.freeze()).unwrap_err();
        assert!(matches!(err, GisError::InvalidFormat(_)));

        let bytes = sample_bytes();
        let truncated = bytes.slice(..bytes.len() - 1);
        assert!(GisItemDB::<Place>::from_bytes(truncated).is_err());

        assert!(GisItemDB::<Place>::from_bytes(Bytes::from_static(b"RGIS")).is_err());
    }

    #[test]
    fn test_checksum_verification() {
        let mut raw = BytesMut::from(&sample_bytes()[..]);
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let corrupted = raw.freeze();

        let err = GisItemDB::<Place>::from_bytes(corrupted.clone()).unwrap_err();
        assert!(matches!(err, GisError::InvalidFormat(_)));

        let config = Config::default().with_verify_checksum(false);
        assert!(GisItemDB::<Place>::from_bytes_with_config(corrupted, config).is_ok());
    }

    #[test]
    fn test_corrupted_key_map() {
        let bytes = sample_bytes();
        let db = GisItemDB::<Place>::from_bytes(bytes.clone()).unwrap();
        let info = db.info().unwrap();
        let item_off = info.items_offset as i32;

        // fill every slot with the first item so probing never hits EMPTY
        let mut raw = BytesMut::from(&bytes[..]);
        for slot in 0..info.map_length {
            let at = info.keymap_offset + 8 + 4 * slot;
            raw[at..at + 4].copy_from_slice(&item_off.to_be_bytes());
        }
        crate::format::backfill_header(&mut raw).unwrap();
        let db = GisItemDB::<Place>::from_bytes(raw.freeze()).unwrap();

        assert!(db.get_item("origin").unwrap().is_some());
        assert!(matches!(db.get_item("missing"), Err(GisError::Corrupted(_))));
    }

    #[test]
    fn test_info() {
        let db = GisItemDB::<Place>::from_bytes(sample_bytes()).unwrap();
        let info = db.info().unwrap();
        assert_eq!(info.n_items, 3);
        assert_eq!(info.item_size, Place::ITEM_SIZE);
        assert_eq!(info.map_length, 19);
        assert_eq!(info.kdtree_depth, 2);
        assert_eq!(info.kdtree_offset + 3 * NODE_SIZE, info.byte_length);
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"schema\":\"place\""));
    }

    #[test]
    fn test_items_in_file_order() {
        let db = GisItemDB::<Place>::from_bytes(sample_bytes()).unwrap();
        let names: Vec<String> = db.items().map(|p| p.unwrap().base.name).collect();
        assert_eq!(names, vec!["origin", "east", "north"]);
    }

    #[test]
    fn test_invalid_query_input() {
        let db = GisItemDB::<Place>::from_bytes(sample_bytes()).unwrap();
        let bad = GeoPos::new(f64::NAN, 0.0, 0.0);
        assert!(db.get_nearest_item(&bad).is_err());
        let origin = GeoPos::new(0.0, 0.0, 0.0);
        assert!(db.get_items_within(&origin, f64::NAN).is_err());
        assert!(db.get_items_within(&origin, -1.0).unwrap().is_empty());
        assert!(db.get_n_nearest_items(&origin, 0).unwrap().is_empty());
    }
}
