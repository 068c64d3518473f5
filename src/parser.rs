//! Input parsing hooks used by the factory.
//!
//! Feed-specific parsers implement [`ItemParser`]; the crate ships a simple
//! delimited-text parser for schemas implementing [`CsvRecord`].

use crate::error::{GisError, Result};
use crate::item::GisItem;
use std::marker::PhantomData;
use std::str::FromStr;

/// Turns raw input into items, handing each parsed record (or the error
/// for a bad record) to `sink`. An error returned by `sink` aborts parsing.
pub trait ItemParser<T: GisItem> {
    fn parse(&self, input: &str, sink: &mut dyn FnMut(Result<T>) -> Result<()>) -> Result<()>;
}

/// A schema that can be built from one delimited text line.
pub trait CsvRecord: GisItem {
    /// Column names, used to recognize and skip a header line.
    const COLUMNS: &'static [&'static str];

    fn from_fields(fields: &[&str]) -> Result<Self>;
}

/// Parses one record per line. Blank lines and lines starting with `#` are
/// ignored, as is a first line equal to the schema's column names. Fields
/// are trimmed; quoting is not supported.
#[derive(Debug, Clone)]
pub struct CsvParser<T> {
    delimiter: char,
    _item: PhantomData<fn() -> T>,
}

impl<T: CsvRecord> CsvParser<T> {
    pub fn new() -> Self {
        Self {
            delimiter: ',',
            _item: PhantomData,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn is_header(&self, fields: &[&str]) -> bool {
        fields.len() == T::COLUMNS.len()
            && fields
                .iter()
                .zip(T::COLUMNS)
                .all(|(f, c)| f.eq_ignore_ascii_case(c))
    }
}

impl<T: CsvRecord> Default for CsvParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CsvRecord> ItemParser<T> for CsvParser<T> {
    fn parse(&self, input: &str, sink: &mut dyn FnMut(Result<T>) -> Result<()>) -> Result<()> {
        let mut first = true;
        for (i, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(self.delimiter).map(str::trim).collect();
            if std::mem::take(&mut first) && self.is_header(&fields) {
                continue;
            }

            let record = if fields.len() != T::COLUMNS.len() {
                Err(GisError::Parse {
                    line: i + 1,
                    message: format!(
                        "expected {} fields, found {}",
                        T::COLUMNS.len(),
                        fields.len()
                    ),
                })
            } else {
                T::from_fields(&fields).map_err(|e| GisError::Parse {
                    line: i + 1,
                    message: e.to_string(),
                })
            };
            sink(record)?;
        }
        Ok(())
    }
}

/// Parse a single field, naming it in the error.
pub fn parse_field<V: FromStr>(value: &str, column: &str) -> Result<V> {
    value
        .parse()
        .map_err(|_| GisError::InvalidInput(format!("invalid {} '{}'", column, value)))
}

/// Parse a boolean field (`true/false`, `yes/no`, `1/0`, `y/n`).
pub fn parse_bool(value: &str, column: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" | "" => Ok(false),
        _ => Err(GisError::InvalidInput(format!(
            "invalid {} '{}'",
            column, value
        ))),
    }
}
