//! Build-time orchestration: collect items, then serialize a database.
//!
//! ```rust
//! use rgis::{GisItemDB, GisItemDBFactory, GeoPos, Place};
//!
//! let mut factory = GisItemDBFactory::new();
//! factory.add_item(Place::new("Ferry Building", 37.7955, -122.3937, 0.0, "landmark", ""))?;
//! factory.add_item(Place::new("Coit Tower", 37.8024, -122.4058, 64.0, "landmark", ""))?;
//!
//! let db = GisItemDB::<Place>::from_bytes(factory.to_bytes()?)?;
//! let (nearest, dist) = db.get_nearest_item(&GeoPos::new(37.80, -122.40, 0.0))?.unwrap();
//! assert_eq!(nearest.base.name, "Coit Tower");
//! assert!(dist < 1_000.0);
//! # Ok::<(), rgis::GisError>(())
//! ```

use crate::config::Config;
use crate::datum::Ecef;
use crate::error::{GisError, Result};
use crate::format::{Header, NODE_SIZE, backfill_header, to_i32};
use crate::item::{GisItem, write_item};
use crate::kdtree;
use crate::keymap::{self, MapParams};
use crate::parser::ItemParser;
use crate::strings::StringTableBuilder;
use crate::validation::{validate_finite, validate_name, validate_position};
use bytes::{BufMut, Bytes, BytesMut};
use rustc_hash::FxHashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Accumulates items of one schema and writes them as an RGIS database.
#[derive(Debug)]
pub struct GisItemDBFactory<T: GisItem> {
    config: Config,
    items: Vec<T>,
    ecef: Vec<Ecef>,
    names: FxHashSet<String>,
    build_date: Option<i64>,
}

impl<T: GisItem> GisItemDBFactory<T> {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            items: Vec::new(),
            ecef: Vec::new(),
            names: FxHashSet::default(),
            build_date: None,
        }
    }

    /// Use a fixed header date (epoch milliseconds) instead of the current
    /// time, e.g. for reproducible output.
    pub fn with_build_date(mut self, millis: i64) -> Self {
        self.build_date = Some(millis);
        self
    }

    /// Add one item. Names must be unique within a database.
    pub fn add_item(&mut self, item: T) -> Result<()> {
        validate_name(item.name())?;
        if let Err(e) = validate_finite(&item.pos()).and_then(|()| finite_ecef(&item.ecef())) {
            log::warn!("rejecting {} item '{}': {}", T::SCHEMA, item.name(), e);
            return Err(e);
        }
        if self.config.validate_coordinates {
            validate_position(&item.pos())?;
        }
        if self.names.contains(item.name()) {
            return Err(GisError::DuplicateName(item.name().to_owned()));
        }

        self.names.insert(item.name().to_owned());
        self.ecef.push(item.ecef());
        self.items.push(item);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Feed `input` through `parser`, adding every record. Returns the number
    /// of items added. Bad records are skipped with a warning unless
    /// `skip_invalid_records` is disabled.
    pub fn parse<P: ItemParser<T>>(&mut self, parser: &P, input: &str) -> Result<usize> {
        let skip = self.config.skip_invalid_records;
        let before = self.items.len();

        parser.parse(input, &mut |record| {
            let added = record.and_then(|item| self.add_item(item));
            match added {
                Ok(()) => Ok(()),
                Err(e) if skip => {
                    log::warn!("skipping {} record: {}", T::SCHEMA, e);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })?;

        let added = self.items.len() - before;
        log::debug!("parsed {} {} items", added, T::SCHEMA);
        Ok(added)
    }

    /// Serialize all sections: header, strings, items, key map, kd-tree.
    pub fn to_bytes(&self) -> Result<Bytes> {
        if self.items.is_empty() {
            return Err(GisError::NoItems);
        }

        let mut strings = StringTableBuilder::new();
        strings.add_string(T::SCHEMA);
        for item in &self.items {
            strings.add_string(item.name());
            item.add_strings(&mut strings);
        }

        let n_items = self.items.len();
        let params = MapParams::for_items(n_items)?;
        let mut buf = BytesMut::with_capacity(
            64 + n_items * (T::ITEM_SIZE + NODE_SIZE) + params.byte_size(),
        );

        Header::write_reserved(&mut buf, self.build_date.unwrap_or_else(now_millis));
        strings.write(&mut buf)?;

        buf.put_i32(to_i32(n_items, "item count")?);
        buf.put_i32(to_i32(T::ITEM_SIZE, "item size")?);
        let items_base = buf.len();
        for item in &self.items {
            write_item(item, &mut buf, &strings)?;
        }

        let entries: Vec<(i32, usize)> = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.base().hash, items_base + i * T::ITEM_SIZE))
            .collect();
        let slots = keymap::build_slots(&entries, params)?;
        let map_base = buf.len();
        keymap::write_slots(&mut buf, params, &slots)?;

        let nodes = kdtree::build(&self.ecef);
        let node_base = buf.len();
        kdtree::write_nodes(&mut buf, &nodes, node_base, items_base, T::ITEM_SIZE)?;

        to_i32(buf.len(), "database length")?;
        backfill_header(&mut buf)?;

        log::debug!(
            "{} layout: items@{} map@{} (length={} rehash={}) kdtree@{} depth={}",
            T::SCHEMA,
            items_base,
            map_base,
            params.length,
            params.rehash,
            node_base,
            kdtree::depth(&nodes)
        );
        Ok(buf.freeze())
    }

    /// Write the database to `path`. The file is written to a temporary
    /// sibling and renamed into place, so a failed write leaves no output.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        let tmp = temp_path(path)?;

        let result = (|| -> Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        } else {
            log::info!(
                "wrote {} {} items ({} bytes) to {}",
                self.items.len(),
                T::SCHEMA,
                bytes.len(),
                path.display()
            );
        }
        result
    }

    /// Parse `in_file` with `parser` and write the result to `out_file`.
    /// Fails without creating `out_file` if nothing could be parsed or the
    /// output cannot be written.
    pub fn create_db<P, I, O>(&mut self, parser: &P, in_file: I, out_file: O) -> Result<usize>
    where
        P: ItemParser<T>,
        I: AsRef<Path>,
        O: AsRef<Path>,
    {
        let in_file = in_file.as_ref();
        let out_file = out_file.as_ref();

        let result = fs::read_to_string(in_file)
            .map_err(GisError::from)
            .and_then(|input| self.parse(parser, &input))
            .and_then(|_| self.write(out_file));

        match result {
            Ok(()) => Ok(self.items.len()),
            Err(e) => {
                log::error!(
                    "failed to create {} from {}: {}",
                    out_file.display(),
                    in_file.display(),
                    e
                );
                Err(e)
            }
        }
    }
}

impl<T: GisItem> Default for GisItemDBFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn finite_ecef(ecef: &Ecef) -> Result<()> {
    if ecef.x.is_finite() && ecef.y.is_finite() && ecef.z.is_finite() {
        Ok(())
    } else {
        Err(GisError::InvalidInput(format!(
            "ECEF position must be finite, got: {:?}",
            ecef
        )))
    }
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let mut name = path
        .file_name()
        .ok_or_else(|| {
            GisError::InvalidInput(format!("output path {} has no file name", path.display()))
        })?
        .to_os_string();
    name.push(".tmp");
    Ok(path.with_file_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{HEADER_SIZE, read_i32};
    use crate::items::Place;
    use crate::parser::CsvParser;
    use tempfile::TempDir;

    fn place(name: &str, lat: f64, lon: f64) -> Place {
        Place::new(name, lat, lon, 0.0, "test", "")
    }

    #[test]
    fn test_add_item_rejects_duplicates() {
        let mut factory = GisItemDBFactory::new();
        factory.add_item(place("A", 0.0, 0.0)).unwrap();
        let err = factory.add_item(place("A", 1.0, 1.0)).unwrap_err();
        assert!(matches!(err, GisError::DuplicateName(n) if n == "A"));
        assert_eq!(factory.len(), 1);
    }

    #[test]
    fn test_add_item_validates_coordinates() {
        let mut factory = GisItemDBFactory::new();
        assert!(factory.add_item(place("bad", 91.0, 0.0)).is_err());
        assert!(factory.add_item(place("", 0.0, 0.0)).is_err());
        assert!(factory.is_empty());

        let mut lenient =
            GisItemDBFactory::with_config(Config::default().with_validate_coordinates(false));
        lenient.add_item(place("bad", 91.0, 0.0)).unwrap();
        assert_eq!(lenient.len(), 1);
    }

    #[test]
    fn test_non_finite_rejected_without_range_validation() {
        let mut factory =
            GisItemDBFactory::with_config(Config::default().with_validate_coordinates(false));
        factory.add_item(place("Z", 0.0, 0.0)).unwrap();
        for (name, lat, lon) in [
            ("X", f64::NAN, 0.0),
            ("Y", f64::NAN, 1.0),
            ("W", 0.0, f64::INFINITY),
        ] {
            let err = factory.add_item(place(name, lat, lon)).unwrap_err();
            assert!(matches!(err, GisError::InvalidInput(_)));
        }
        let alt = Place::new("H", 0.0, 0.0, f64::NEG_INFINITY, "test", "");
        assert!(matches!(factory.add_item(alt), Err(GisError::InvalidInput(_))));
        assert_eq!(factory.len(), 1);

        let db = crate::db::GisItemDB::<Place>::from_bytes(factory.to_bytes().unwrap()).unwrap();
        let origin = crate::datum::GeoPos::new(0.0, 0.0, 0.0);
        let (nearest, _) = db.get_nearest_item(&origin).unwrap().unwrap();
        assert_eq!(nearest.base.name, "Z");
    }

    #[test]
    fn test_empty_factory_has_no_bytes() {
        let factory = GisItemDBFactory::<Place>::new();
        assert!(matches!(factory.to_bytes(), Err(GisError::NoItems)));
    }

    #[test]
    fn test_section_layout() {
        let mut factory = GisItemDBFactory::new().with_build_date(42);
        factory.add_item(place("A", 0.0, 0.0)).unwrap();
        factory.add_item(place("B", 0.0, 1.0)).unwrap();
        let bytes = factory.to_bytes().unwrap();

        // strings: place, A, test, "", B
        let strings_len = 4 + (4 + 5 + 1) + (4 + 1 + 1) + (4 + 4 + 1) + (4 + 0 + 1) + (4 + 1 + 1);
        let items_hdr = HEADER_SIZE + strings_len;
        assert_eq!(read_i32(&bytes, items_hdr).unwrap(), 2);
        assert_eq!(read_i32(&bytes, items_hdr + 4).unwrap(), Place::ITEM_SIZE as i32);

        let map_base = items_hdr + 8 + 2 * Place::ITEM_SIZE;
        assert_eq!(read_i32(&bytes, map_base).unwrap(), 19);
        assert_eq!(read_i32(&bytes, map_base + 4).unwrap(), 17);

        let node_base = map_base + 8 + 19 * 4;
        assert_eq!(bytes.len(), node_base + 2 * 12);
    }

    #[test]
    fn test_output_is_deterministic() {
        let build = || {
            let mut factory = GisItemDBFactory::new().with_build_date(1);
            for i in 0..50 {
                factory
                    .add_item(place(&format!("P{}", i), (i % 7) as f64, (i % 11) as f64))
                    .unwrap();
            }
            factory.to_bytes().unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_parse_skips_bad_records() {
        let mut factory = GisItemDBFactory::<Place>::new();
        let input = "A,1,2,3,k,d\nB,oops,2,3,k,d\nA,5,5,5,k,d\nC,95,0,0,k,d\nD,4,5,6,k,d\n";
        let added = factory.parse(&CsvParser::new(), input).unwrap();
        assert_eq!(added, 2);

        let mut strict =
            GisItemDBFactory::<Place>::with_config(Config::default().with_skip_invalid_records(false));
        let err = strict.parse(&CsvParser::new(), input).unwrap_err();
        assert!(matches!(err, GisError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_create_db_without_items_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.csv");
        let output = dir.path().join("out.rgis");
        fs::write(&input, "# nothing here\n").unwrap();

        let mut factory = GisItemDBFactory::<Place>::new();
        let err = factory.create_db(&CsvParser::new(), &input, &output).unwrap_err();
        assert!(matches!(err, GisError::NoItems));
        assert!(!output.exists());
        assert!(!dir.path().join("out.rgis.tmp").exists());
    }

    #[test]
    fn test_create_db_unwritable_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.csv");
        fs::write(&input, "A,1,2,3,k,d\n").unwrap();
        let output = dir.path().join("missing").join("out.rgis");

        let mut factory = GisItemDBFactory::<Place>::new();
        let err = factory.create_db(&CsvParser::new(), &input, &output).unwrap_err();
        assert!(matches!(err, GisError::Io(_)));
        assert!(!output.exists());
    }

    #[test]
    fn test_create_db_missing_input() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.rgis");
        let mut factory = GisItemDBFactory::<Place>::new();
        let result = factory.create_db(&CsvParser::new(), dir.path().join("nope.csv"), &output);
        assert!(matches!(result, Err(GisError::Io(_))));
        assert!(!output.exists());
    }

    #[test]
    fn test_write_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("db.rgis");
        fs::write(&output, b"stale").unwrap();

        let mut factory = GisItemDBFactory::new();
        factory.add_item(place("A", 0.0, 0.0)).unwrap();
        factory.write(&output).unwrap();

        let written = fs::read(&output).unwrap();
        assert_eq!(&written[..4], b"RGIS");
        assert_eq!(written.len(), factory.to_bytes().unwrap().len());
    }
}
