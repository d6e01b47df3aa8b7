//! Binary table format for efficient storage and loading
//!
//! A compact record of a [`Table`]: magic bytes, a format version, the table
//! name, the key/value header entries, then one typed block per column.
//! All integers are little-endian; strings are length-prefixed UTF-8.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{Column, Table};
use crate::{Result, SkymatchError};

/// Magic bytes for identification of binary table files
pub const MAGIC_BYTES: &[u8; 6] = b"SKYTAB";

/// Current version of the binary format
pub const FORMAT_VERSION: u8 = 1;

const TYPE_FLOAT: u8 = 0;
const TYPE_INT: u8 = 1;
const TYPE_TEXT: u8 = 2;

fn write_str<W: Write>(writer: &mut W, s: &str) -> io::Result<()> {
    writer.write_u16::<LittleEndian>(s.len() as u16)?;
    writer.write_all(s.as_bytes())
}

fn read_str<R: Read>(reader: &mut R) -> io::Result<String> {
    let len = reader.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).to_string())
}

fn write_cell<W: Write>(writer: &mut W, s: &str) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(s.len() as u32)?;
    writer.write_all(s.as_bytes())
}

fn read_cell<R: Read>(reader: &mut R) -> io::Result<String> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).to_string())
}

/// Save a table to a binary file
pub fn save<P: AsRef<Path>>(table: &Table, path: P) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(MAGIC_BYTES)?;
    writer.write_u8(FORMAT_VERSION)?;
    write_str(&mut writer, table.name())?;

    writer.write_u16::<LittleEndian>(table.header().len() as u16)?;
    for (key, value) in table.header() {
        write_str(&mut writer, key)?;
        write_str(&mut writer, value)?;
    }

    writer.write_u16::<LittleEndian>(table.n_columns() as u16)?;
    writer.write_u64::<LittleEndian>(table.len() as u64)?;
    for (name, column) in table.columns() {
        write_str(&mut writer, name)?;
        match column {
            Column::Float(values) => {
                writer.write_u8(TYPE_FLOAT)?;
                for &v in values {
                    writer.write_f64::<LittleEndian>(v)?;
                }
            }
            Column::Int(values) => {
                writer.write_u8(TYPE_INT)?;
                for &v in values {
                    writer.write_i64::<LittleEndian>(v)?;
                }
            }
            Column::Text(values) => {
                writer.write_u8(TYPE_TEXT)?;
                for v in values {
                    write_cell(&mut writer, v)?;
                }
            }
        }
    }

    writer.flush()?;
    Ok(())
}

/// Load a table from a binary file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Table> {
    let file = File::open(&path)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC_BYTES {
        return Err(SkymatchError::Data(
            "invalid binary table format: incorrect magic bytes".to_string(),
        ));
    }

    let version = reader.read_u8()?;
    if version != FORMAT_VERSION {
        return Err(SkymatchError::Data(format!(
            "unsupported binary table version: {}. Expected version {}",
            version, FORMAT_VERSION
        )));
    }

    let name = read_str(&mut reader)?;
    let mut table = Table::new(&name);

    let n_header = reader.read_u16::<LittleEndian>()?;
    for _ in 0..n_header {
        let key = read_str(&mut reader)?;
        let value = read_str(&mut reader)?;
        table.header_set(&key, &value);
    }

    let n_columns = reader.read_u16::<LittleEndian>()?;
    let n_rows = reader.read_u64::<LittleEndian>()? as usize;
    for _ in 0..n_columns {
        let column_name = read_str(&mut reader)?;
        let tag = reader.read_u8()?;
        let column = read_column(&mut reader, tag, n_rows).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                SkymatchError::Data("truncated binary table file".to_string())
            } else {
                SkymatchError::Io(e)
            }
        })?;
        table.add_column(&column_name, column)?;
    }

    Ok(table)
}

fn read_column<R: Read>(reader: &mut R, tag: u8, n_rows: usize) -> io::Result<Column> {
    match tag {
        TYPE_FLOAT => {
            let mut values = Vec::with_capacity(n_rows);
            for _ in 0..n_rows {
                values.push(reader.read_f64::<LittleEndian>()?);
            }
            Ok(Column::Float(values))
        }
        TYPE_INT => {
            let mut values = Vec::with_capacity(n_rows);
            for _ in 0..n_rows {
                values.push(reader.read_i64::<LittleEndian>()?);
            }
            Ok(Column::Int(values))
        }
        TYPE_TEXT => {
            let mut values = Vec::with_capacity(n_rows);
            for _ in 0..n_rows {
                values.push(read_cell(reader)?);
            }
            Ok(Column::Text(values))
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown column type tag {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_table() -> Table {
        let mut table = Table::new("SIMIN");
        table.header_set("SKYAREA", "1.25");
        table
            .add_column("ID", Column::Int(vec![10, 20, 30]))
            .unwrap();
        table
            .add_column("RA", Column::Float(vec![10.0, 10.5, f64::NAN]))
            .unwrap();
        table
            .add_column(
                "class",
                Column::Text(vec!["agn".into(), String::new(), "star".into()]),
            )
            .unwrap();
        table
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.skytab");

        let table = create_test_table();
        save(&table, &path).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.name(), "SIMIN");
        assert_eq!(loaded.header_get("SKYAREA"), Some("1.25"));
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.column("ID").unwrap().as_int().unwrap(), &[10, 20, 30]);
        let ra = loaded.column("RA").unwrap().as_float().unwrap();
        assert_eq!(&ra[..2], &[10.0, 10.5]);
        assert!(ra[2].is_nan());
        assert_eq!(
            loaded.column("class").unwrap().as_text().unwrap()[2],
            "star"
        );
    }

    #[test]
    fn test_invalid_magic_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.skytab");
        std::fs::write(&path, b"BADTAB\x01rest").unwrap();

        let result = load(&path);
        match result {
            Err(SkymatchError::Data(msg)) => assert!(msg.contains("incorrect magic bytes")),
            other => panic!("expected Data error, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vers.skytab");
        let mut bytes = MAGIC_BYTES.to_vec();
        bytes.push(99);
        std::fs::write(&path, bytes).unwrap();

        let result = load(&path);
        match result {
            Err(SkymatchError::Data(msg)) => {
                assert!(msg.contains("unsupported binary table version"))
            }
            other => panic!("expected Data error, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_file() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.skytab");
        let bad = dir.path().join("trunc.skytab");

        save(&create_test_table(), &good).unwrap();
        let bytes = std::fs::read(&good).unwrap();
        std::fs::write(&bad, &bytes[..bytes.len() - 10]).unwrap();

        let result = load(&bad);
        match result {
            Err(SkymatchError::Data(msg)) => assert!(msg.contains("truncated")),
            // truncation inside the trailing text column may surface as EOF
            Err(SkymatchError::Io(_)) => {}
            other => panic!("expected Data or Io error, got {:?}", other),
        }
    }

    #[test]
    fn test_table_read_dispatches_on_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dispatch.tbl");

        let table = create_test_table();
        save(&table, &path).unwrap();
        let loaded = Table::read(&path).unwrap();
        assert_eq!(loaded.name(), "SIMIN");
        assert_eq!(loaded.n_columns(), 3);
    }
}
