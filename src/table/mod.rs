//! Typed, column-oriented tables for catalogue input and match output
//!
//! Catalogue files are either CSV (optionally gzip-compressed, with leading
//! `# KEY VALUE` metadata lines) or the compact binary format implemented in
//! [`binary`]. Columns carry an explicit logical type so sentinel handling
//! and output formatting stay unambiguous.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::{Result, SkymatchError};

pub mod binary;

/// Sentinel written into numeric columns where a counterpart is absent
pub const MISSING_FLOAT: f64 = -99.0;
/// Sentinel written into integer columns where a counterpart is absent
pub const MISSING_INT: i64 = -99;

/// Logical type of a table column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Float,
    Int,
    Text,
}

/// A typed column of table data
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Text(Vec<String>),
}

impl Column {
    /// Number of rows in the column
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    /// Check if the column has no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The logical type descriptor of the column
    pub fn column_type(&self) -> ColumnType {
        match self {
            Column::Float(_) => ColumnType::Float,
            Column::Int(_) => ColumnType::Int,
            Column::Text(_) => ColumnType::Text,
        }
    }

    /// Borrow the float data, if this is a float column
    pub fn as_float(&self) -> Option<&[f64]> {
        match self {
            Column::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the integer data, if this is an integer column
    pub fn as_int(&self) -> Option<&[i64]> {
        match self {
            Column::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the text data, if this is a text column
    pub fn as_text(&self) -> Option<&[String]> {
        match self {
            Column::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric view of the column; text columns have none
    pub fn to_float_vec(&self) -> Option<Vec<f64>> {
        match self {
            Column::Float(v) => Some(v.clone()),
            Column::Int(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Column::Text(_) => None,
        }
    }

    fn retain(&mut self, mask: &[bool]) {
        fn keep<T>(values: &mut Vec<T>, mask: &[bool]) {
            let mut it = mask.iter();
            values.retain(|_| *it.next().unwrap_or(&false));
        }
        match self {
            Column::Float(v) => keep(v, mask),
            Column::Int(v) => keep(v, mask),
            Column::Text(v) => keep(v, mask),
        }
    }
}

/// An ordered collection of equally sized named columns plus string header
/// entries, carrying catalogue metadata such as `SKYAREA`
#[derive(Debug, Clone, Default)]
pub struct Table {
    name: String,
    header: Vec<(String, String)>,
    columns: Vec<(String, Column)>,
}

impl Table {
    /// Create a new empty table
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            header: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// The table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the table
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |(_, c)| c.len())
    }

    /// Check if the table has no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of columns
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Append a column; all columns must have the same number of rows
    pub fn add_column(&mut self, name: &str, column: Column) -> Result<()> {
        if !self.columns.is_empty() && column.len() != self.len() {
            return Err(SkymatchError::Data(format!(
                "column \"{}\" has {} rows, table \"{}\" has {}",
                name,
                column.len(),
                self.name,
                self.len()
            )));
        }
        if self.column(name).is_some() {
            return Err(SkymatchError::Data(format!(
                "duplicate column \"{}\" in table \"{}\"",
                name, self.name
            )));
        }
        self.columns.push((name.to_string(), column));
        Ok(())
    }

    /// Look up a column by exact name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// All columns in insertion order
    pub fn columns(&self) -> &[(String, Column)] {
        &self.columns
    }

    /// Column names in insertion order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// Header entries in insertion order
    pub fn header(&self) -> &[(String, String)] {
        &self.header
    }

    /// Look up a header value
    pub fn header_get(&self, key: &str) -> Option<&str> {
        self.header
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a header value, replacing any previous entry with the same key
    pub fn header_set(&mut self, key: &str, value: &str) {
        if let Some(pos) = self.header.iter().position(|(k, _)| k == key) {
            self.header[pos].1 = value.to_string();
        } else {
            self.header.push((key.to_string(), value.to_string()));
        }
    }

    /// The catalogue sky coverage in square degrees, from the `SKYAREA`
    /// header entry
    pub fn skyarea(&self) -> Result<f64> {
        let raw = self.header_get("SKYAREA").ok_or_else(|| {
            SkymatchError::Schema(format!(
                "table \"{}\" does not have a \"SKYAREA\" header entry, \
                 which should contain the area of the catalogue in square degrees",
                self.name
            ))
        })?;
        raw.parse().map_err(|_| {
            SkymatchError::Schema(format!(
                "table \"{}\": SKYAREA value \"{}\" is not a number",
                self.name, raw
            ))
        })
    }

    /// Resolve a column by case-insensitive name, preferring an exact match
    /// over a prefix match. Earlier columns win ties.
    pub fn find_key(&self, name: &str) -> Result<String> {
        let upper = name.to_uppercase();
        let mut best: Option<(u8, &str)> = None;
        for (col, _) in &self.columns {
            let cu = col.to_uppercase();
            let rank = if cu == upper {
                0
            } else if cu.starts_with(&upper) {
                1
            } else {
                continue;
            };
            if best.map_or(true, |(r, _)| rank < r) {
                best = Some((rank, col));
            }
        }
        best.map(|(_, c)| c.to_string()).ok_or_else(|| {
            SkymatchError::Schema(format!(
                "no \"{}\" column found in catalogue \"{}\". Only have: {}",
                name,
                self.name,
                self.column_names().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// The right ascension column name
    pub fn ra_key(&self) -> Result<String> {
        self.find_key("RA")
    }

    /// The declination column name
    pub fn dec_key(&self) -> Result<String> {
        self.find_key("DEC")
    }

    /// The identifier column name
    pub fn id_key(&self) -> Result<String> {
        self.find_key("ID")
    }

    /// Keep only the rows where `mask` is true. Applied to every column at
    /// once; each column is masked exactly once.
    pub fn retain(&mut self, mask: &[bool]) {
        assert_eq!(mask.len(), self.len(), "mask length must match row count");
        for (_, column) in &mut self.columns {
            column.retain(mask);
        }
    }

    /// Read a table from a file. Gzip-compressed CSV is recognised by the
    /// `.gz` extension; the binary format is recognised by its magic bytes;
    /// everything else is parsed as CSV.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Table> {
        let path = path.as_ref();
        let default_name = table_name_from_path(path);

        if path.extension().is_some_and(|e| e == "gz") {
            let file = File::open(path)?;
            let reader = BufReader::new(GzDecoder::new(file));
            return Self::from_csv_reader(reader, &default_name);
        }

        let mut magic = [0u8; binary::MAGIC_BYTES.len()];
        let sniffed = {
            let mut file = File::open(path)?;
            file.read_exact(&mut magic).is_ok() && &magic == binary::MAGIC_BYTES
        };
        if sniffed {
            binary::load(path)
        } else {
            let reader = BufReader::new(File::open(path)?);
            Self::from_csv_reader(reader, &default_name)
        }
    }

    /// Parse a CSV table: optional `# KEY VALUE` metadata lines, a header
    /// row of column names, then data rows. Column types are inferred
    /// (all-integer, all-numeric, otherwise text; empty numeric cells read
    /// as NaN).
    pub fn from_csv_reader<R: BufRead>(reader: R, default_name: &str) -> Result<Table> {
        let mut header = Vec::new();
        let mut names: Option<Vec<String>> = None;
        let mut cells: Vec<Vec<String>> = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix('#') {
                let rest = rest.trim();
                if names.is_none() && !rest.is_empty() {
                    let (key, value) = match rest.split_once(char::is_whitespace) {
                        Some((k, v)) => (k, v.trim_start_matches('=').trim()),
                        None => (rest, ""),
                    };
                    header.push((key.to_string(), value.to_string()));
                }
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match &names {
                None => {
                    names = Some(fields.iter().map(|f| f.to_string()).collect());
                    cells = vec![Vec::new(); fields.len()];
                }
                Some(n) => {
                    if fields.len() != n.len() {
                        return Err(SkymatchError::Data(format!(
                            "row with {} fields in a {}-column table",
                            fields.len(),
                            n.len()
                        )));
                    }
                    for (store, field) in cells.iter_mut().zip(&fields) {
                        store.push(field.to_string());
                    }
                }
            }
        }

        let names = names.ok_or_else(|| {
            SkymatchError::Data("table file contains no column header row".to_string())
        })?;

        let mut table = Table::new(default_name);
        table.header = header;
        if let Some(name) = table.header_get("NAME") {
            table.name = name.to_string();
        }
        // the name lives in its own field; keep it out of the header entries
        table.header.retain(|(key, _)| key != "NAME");
        for (name, values) in names.into_iter().zip(cells) {
            let column = infer_column(values);
            table.add_column(&name, column)?;
        }
        Ok(table)
    }

    /// Write the table as CSV with `# KEY VALUE` metadata lines
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# NAME {}", self.name)?;
        for (key, value) in &self.header {
            writeln!(writer, "# {} {}", key, value)?;
        }
        let names: Vec<&str> = self.column_names().collect();
        writeln!(writer, "{}", names.join(","))?;
        for row in 0..self.len() {
            let mut fields = Vec::with_capacity(self.n_columns());
            for (_, column) in &self.columns {
                fields.push(match column {
                    Column::Float(v) => format!("{}", v[row]),
                    Column::Int(v) => format!("{}", v[row]),
                    Column::Text(v) => v[row].clone(),
                });
            }
            writeln!(writer, "{}", fields.join(","))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Save the table: CSV when the path ends in `.csv`, the binary format
    /// otherwise
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if path.extension().is_some_and(|e| e == "csv") {
            self.write_csv(path)
        } else {
            binary::save(self, path)
        }
    }
}

/// Derive a table name from a file path: the stem, with a trailing `.csv`
/// (from `.csv.gz`) stripped
fn table_name_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "table".to_string());
    stem.strip_suffix(".csv").unwrap_or(&stem).to_string()
}

fn infer_column(values: Vec<String>) -> Column {
    let all_int = values
        .iter()
        .all(|v| !v.is_empty() && v.parse::<i64>().is_ok());
    if all_int {
        return Column::Int(values.iter().map(|v| v.parse().unwrap_or(0)).collect());
    }
    let all_float = values.iter().all(|v| v.is_empty() || v.parse::<f64>().is_ok());
    if all_float {
        return Column::Float(
            values
                .iter()
                .map(|v| v.parse().unwrap_or(f64::NAN))
                .collect(),
        );
    }
    Column::Text(values)
}
