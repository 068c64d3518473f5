//! Factory and reader configuration.
//!
//! ```rust
//! use rgis::Config;
//!
//! let json = r#"{
//!     "verify_checksum": false,
//!     "long_range_threshold_m": 50000.0
//! }"#;
//! let config = Config::from_json(json).unwrap();
//! assert!(!config.verify_checksum);
//! assert!(config.validate_coordinates);
//! ```

use serde::de::Error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Recompute the CRC32 of a database when opening it.
    #[serde(default = "Config::default_verify_checksum")]
    pub verify_checksum: bool,

    /// Separation (meters) above which straight-line ECEF distances are
    /// corrected to great-circle arc length.
    #[serde(default = "Config::default_long_range_threshold")]
    pub long_range_threshold_m: f64,

    /// Reject items with out-of-range or non-finite coordinates at build time.
    #[serde(default = "Config::default_validate_coordinates")]
    pub validate_coordinates: bool,

    /// Log and skip bad input records instead of aborting the parse.
    #[serde(default = "Config::default_skip_invalid_records")]
    pub skip_invalid_records: bool,
}

impl Config {
    const fn default_verify_checksum() -> bool {
        true
    }

    const fn default_long_range_threshold() -> f64 {
        100_000.0
    }

    const fn default_validate_coordinates() -> bool {
        true
    }

    const fn default_skip_invalid_records() -> bool {
        true
    }

    pub fn with_verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    pub fn with_long_range_threshold(mut self, meters: f64) -> Self {
        self.long_range_threshold_m = meters;
        self
    }

    pub fn with_validate_coordinates(mut self, validate: bool) -> Self {
        self.validate_coordinates = validate;
        self
    }

    pub fn with_skip_invalid_records(mut self, skip: bool) -> Self {
        self.skip_invalid_records = skip;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if !self.long_range_threshold_m.is_finite() {
            return Err("Long range threshold must be finite".to_string());
        }
        if self.long_range_threshold_m <= 0.0 {
            return Err("Long range threshold must be positive".to_string());
        }
        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verify_checksum: Self::default_verify_checksum(),
            long_range_threshold_m: Self::default_long_range_threshold(),
            validate_coordinates: Self::default_validate_coordinates(),
            skip_invalid_records: Self::default_skip_invalid_records(),
        }
    }
}
