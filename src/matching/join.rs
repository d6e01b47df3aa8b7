//! Join-table assembler: materialises candidate tuples into a row-oriented
//! table with copied catalogue columns and derived separation columns

use log::info;

use super::CandidateTuple;
use crate::coordinates::RaDec;
use crate::table::{Column, Table, MISSING_FLOAT, MISSING_INT};
use crate::{Result, SkymatchError};

/// The materialised join of the input catalogues over the candidate tuples
pub struct JoinedTable {
    /// Joined columns, pairwise separations, `Separation_max` and `ncat`,
    /// already filtered to the search radius
    pub table: Table,
    /// Candidate tuples aligned with the table rows
    pub tuples: Vec<CandidateTuple>,
}

/// Name of the separation column for a catalogue pair, first table first
pub fn separation_column(a: &str, b: &str) -> String {
    format!("Separation_{}_{}", a, b)
}

/// Offset of the pair (i, j), i < j, in the row-major upper-triangle
/// ordering shared between the assembler and the scorer
pub fn pair_index(ncat: usize, i: usize, j: usize) -> usize {
    debug_assert!(i < j && j < ncat);
    i * ncat - i * (i + 1) / 2 + (j - i - 1)
}

/// Materialise the candidate tuples against the input catalogues.
///
/// Absent slots write −99 into numeric columns and the empty string into
/// text columns; their separations are NaN. `Separation_max` is the
/// NaN-aware maximum of the pairwise separations and 0, so it is always
/// finite, and the single radius filter `Separation_max < radius` is
/// applied to every column exactly once.
pub fn assemble(
    tables: &[&Table],
    tuples: &[CandidateTuple],
    radius_arcsec: f64,
) -> Result<JoinedTable> {
    let ncat = tables.len();
    let nrows = tuples.len();

    let mut ra_keys = Vec::with_capacity(ncat);
    let mut dec_keys = Vec::with_capacity(ncat);
    let mut coords: Vec<(Vec<f64>, Vec<f64>)> = Vec::with_capacity(ncat);
    for table in tables {
        let ra_key = table.ra_key()?;
        let dec_key = table.dec_key()?;
        let ra = numeric_column(table, &ra_key)?;
        let dec = numeric_column(table, &dec_key)?;
        ra_keys.push(ra_key);
        dec_keys.push(dec_key);
        coords.push((ra, dec));
    }

    let mut joined = Table::new("MULTIMATCH");
    joined.header_set("COLS_RA", &joined_keys(tables, &ra_keys));
    joined.header_set("COLS_DEC", &joined_keys(tables, &dec_keys));

    for (ti, table) in tables.iter().enumerate() {
        for (col_name, column) in table.columns() {
            let out = match column {
                Column::Float(values) => Column::Float(
                    tuples
                        .iter()
                        .map(|t| slot(t[ti]).map_or(MISSING_FLOAT, |e| values[e]))
                        .collect(),
                ),
                Column::Int(values) => Column::Int(
                    tuples
                        .iter()
                        .map(|t| slot(t[ti]).map_or(MISSING_INT, |e| values[e]))
                        .collect(),
                ),
                Column::Text(values) => Column::Text(
                    tuples
                        .iter()
                        .map(|t| slot(t[ti]).map_or_else(String::new, |e| values[e].clone()))
                        .collect(),
                ),
            };
            joined.add_column(&format!("{}_{}", table.name(), col_name), out)?;
        }
    }

    let mut max_separation = vec![0.0f64; nrows];
    for i in 0..ncat {
        for j in (i + 1)..ncat {
            let mut separations = Vec::with_capacity(nrows);
            for (row, tuple) in tuples.iter().enumerate() {
                let value = match (slot(tuple[i]), slot(tuple[j])) {
                    (Some(a), Some(b)) => {
                        let pa = RaDec::from_degrees(coords[i].0[a], coords[i].1[a]);
                        let pb = RaDec::from_degrees(coords[j].0[b], coords[j].1[b]);
                        let sep = pa.separation_arcsec(&pb);
                        if sep.is_nan() {
                            return Err(SkymatchError::Numeric(format!(
                                "NaN separation between \"{}\" and \"{}\"",
                                tables[i].name(),
                                tables[j].name()
                            )));
                        }
                        if sep > max_separation[row] {
                            max_separation[row] = sep;
                        }
                        sep
                    }
                    _ => f64::NAN,
                };
                separations.push(value);
            }
            joined.add_column(
                &separation_column(tables[i].name(), tables[j].name()),
                Column::Float(separations),
            )?;
        }
    }

    joined.add_column("Separation_max", Column::Float(max_separation.clone()))?;
    joined.add_column(
        "ncat",
        Column::Int(
            tuples
                .iter()
                .map(|t| t.iter().filter(|&&e| e != -1).count() as i64)
                .collect(),
        ),
    )?;

    let mask: Vec<bool> = max_separation.iter().map(|&s| s < radius_arcsec).collect();
    joined.retain(&mask);
    let kept: Vec<CandidateTuple> = tuples
        .iter()
        .zip(&mask)
        .filter(|(_, &keep)| keep)
        .map(|(t, _)| t.clone())
        .collect();
    info!("matching: {} matches after filtering", kept.len());

    Ok(JoinedTable {
        table: joined,
        tuples: kept,
    })
}

fn slot(e: i32) -> Option<usize> {
    (e >= 0).then_some(e as usize)
}

fn numeric_column(table: &Table, name: &str) -> Result<Vec<f64>> {
    table
        .column(name)
        .and_then(|c| c.to_float_vec())
        .ok_or_else(|| {
            SkymatchError::Schema(format!(
                "column \"{}\" in table \"{}\" is not numeric",
                name,
                table.name()
            ))
        })
}

fn joined_keys(tables: &[&Table], keys: &[String]) -> String {
    tables
        .iter()
        .zip(keys)
        .map(|(t, k)| format!("{}_{}", t.name(), k))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn catalogue(name: &str, ids: Vec<i64>, ra: Vec<f64>, dec: Vec<f64>) -> Table {
        let mut table = Table::new(name);
        table.header_set("SKYAREA", "1.0");
        table.add_column("ID", Column::Int(ids)).unwrap();
        table.add_column("RA", Column::Float(ra)).unwrap();
        table.add_column("DEC", Column::Float(dec)).unwrap();
        table
    }

    #[test]
    fn test_pair_index_ordering() {
        assert_eq!(pair_index(3, 0, 1), 0);
        assert_eq!(pair_index(3, 0, 2), 1);
        assert_eq!(pair_index(3, 1, 2), 2);
        assert_eq!(pair_index(4, 1, 3), 4);
    }

    #[test]
    fn test_sentinels_and_separations() {
        let a = catalogue("A", vec![7], vec![10.0], vec![0.0]);
        let b = catalogue("B", vec![3], vec![10.0], vec![0.001]);

        let tuples = vec![vec![0, 0], vec![0, -1]];
        let joined = assemble(&[&a, &b], &tuples, 10.0).unwrap();

        // the 3.6 arcsec pair survives, the counterpart-free row survives
        // with its zero max separation
        assert_eq!(joined.table.len(), 2);
        let sep = joined
            .table
            .column("Separation_A_B")
            .unwrap()
            .as_float()
            .unwrap();
        assert_relative_eq!(sep[0], 3.6, epsilon = 1e-6);
        assert!(sep[1].is_nan());

        let b_id = joined.table.column("B_ID").unwrap().as_int().unwrap();
        assert_eq!(b_id, &[3, MISSING_INT]);

        let ncat = joined.table.column("ncat").unwrap().as_int().unwrap();
        assert_eq!(ncat, &[2, 1]);

        let max = joined
            .table
            .column("Separation_max")
            .unwrap()
            .as_float()
            .unwrap();
        assert_relative_eq!(max[0], 3.6, epsilon = 1e-6);
        assert_eq!(max[1], 0.0);
    }

    #[test]
    fn test_radius_filter_is_strict() {
        let a = catalogue("A", vec![1], vec![10.0], vec![0.0]);
        let b = catalogue("B", vec![2, 3], vec![10.0, 10.0], vec![0.001, 0.01]);

        let tuples = vec![vec![0, 0], vec![0, 1]];
        let joined = assemble(&[&a, &b], &tuples, 10.0).unwrap();

        // 3.6 arcsec passes, 36 arcsec does not
        assert_eq!(joined.table.len(), 1);
        assert_eq!(joined.tuples, vec![vec![0, 0]]);
    }

    #[test]
    fn test_headers_record_coordinate_columns() {
        let a = catalogue("A", vec![1], vec![10.0], vec![0.0]);
        let b = catalogue("B", vec![2], vec![10.0], vec![0.001]);

        let joined = assemble(&[&a, &b], &[vec![0, 0]], 10.0).unwrap();
        assert_eq!(joined.table.header_get("COLS_RA"), Some("A_RA B_RA"));
        assert_eq!(joined.table.header_get("COLS_DEC"), Some("A_DEC B_DEC"));
    }

    #[test]
    fn test_separation_symmetry_between_pair_orders() {
        let a = catalogue("A", vec![1], vec![53.147], vec![-27.794]);
        let b = catalogue("B", vec![9], vec![53.149], vec![-27.793]);

        let tuples = vec![vec![0, 0]];
        let ab = assemble(&[&a, &b], &tuples, 3600.0).unwrap();
        let ba = assemble(&[&b, &a], &tuples, 3600.0).unwrap();

        let sab = ab
            .table
            .column("Separation_A_B")
            .unwrap()
            .as_float()
            .unwrap()[0];
        let sba = ba
            .table
            .column("Separation_B_A")
            .unwrap()
            .as_float()
            .unwrap()[0];
        assert_relative_eq!(sab, sba, epsilon = 1e-9);
    }
}
