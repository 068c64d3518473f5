//! Static GIS item database: a compact binary file of named, geolocated
//! records with exact-name lookup and nearest / k-nearest / range queries.
//!
//! Databases are built once by a [`GisItemDBFactory`] and opened read-only
//! (usually memory-mapped) as a [`GisItemDB`]. Spatial queries run on a
//! kd-tree over ECEF coordinates stored in the same file.
//!
//! ```rust
//! use rgis::{GeoPos, GisItemDB, GisItemDBFactory, Place};
//!
//! let mut factory = GisItemDBFactory::new();
//! factory.add_item(Place::new("origin", 0.0, 0.0, 0.0, "marker", ""))?;
//! factory.add_item(Place::new("east", 0.0, 1.0, 0.0, "marker", ""))?;
//! factory.add_item(Place::new("north", 1.0, 0.0, 0.0, "marker", ""))?;
//!
//! let db = GisItemDB::<Place>::from_bytes(factory.to_bytes()?)?;
//! assert!(db.get_item("east")?.is_some());
//!
//! let within = db.get_items_within(&GeoPos::new(0.0, 0.0, 0.0), 120_000.0)?;
//! assert_eq!(within.len(), 3);
//! # Ok::<(), rgis::GisError>(())
//! ```

pub mod config;
pub mod datum;
pub mod db;
pub mod error;
pub mod factory;
pub mod format;
pub mod item;
pub mod items;
pub mod kdtree;
pub mod keymap;
pub mod parser;
pub mod strings;
pub mod validation;

pub use config::Config;
pub use datum::{Ecef, GeoPos, ecef_to_wgs84, wgs84_to_ecef};
pub use db::{DbInfo, GisItemDB};
pub use error::{GisError, Result};
pub use factory::GisItemDBFactory;
pub use item::{GisItem, GisItemBase};
pub use items::{Airport, Place};
pub use parser::{CsvParser, CsvRecord, ItemParser};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{Config, GisError, GisItemDB, GisItemDBFactory, Result};

    pub use crate::{GeoPos, GisItem, GisItemBase};

    pub use crate::{Airport, Place};

    pub use crate::{CsvParser, ItemParser};
}
