//! Adaptive magnitude priors
//!
//! Counterparts of real associations have a different magnitude
//! distribution than the catalogue at large. This module builds a smooth
//! likelihood ratio between the two: an adaptively binned histogram pair
//! driven by the quantiles of the likely-matched sample, turned into a
//! piecewise-constant biasing function whose log₁₀ is added to the
//! astrometric evidence.

use log::info;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::table::MISSING_FLOAT;
use crate::{Result, SkymatchError};

/// Number of quantile-placed bin edges for the auto histogram
pub const QUANTILE_EDGES: usize = 15;

/// A pair of density histograms over a shared adaptive bin set
#[derive(Debug, Clone, PartialEq)]
pub struct MagnitudeHistogram {
    /// Bin edges, one more than the number of bins
    pub edges: Vec<f64>,
    /// Density histogram of the likely-matched sample
    pub selected: Vec<f64>,
    /// Density histogram of the secure non-matches
    pub others: Vec<f64>,
}

impl MagnitudeHistogram {
    /// Build the histogram pair with bins adapted to the selected sample.
    ///
    /// Edges sit at [`QUANTILE_EDGES`] equally spaced quantiles of the
    /// selected magnitudes (linear interpolation between order statistics),
    /// with one extra edge one magnitude above `top`, the largest valid
    /// magnitude in the catalogue. Both samples are histogrammed with
    /// density normalisation on the shared edges.
    pub fn adaptive(mag_sel: &[f64], mag_others: &[f64], top: f64) -> Result<Self> {
        if mag_sel.len() < 2 {
            return Err(SkymatchError::Config(
                "fewer than 2 selected rows for a magnitude histogram".to_string(),
            ));
        }
        let mut sorted = mag_sel.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mut edges: Vec<f64> = (0..QUANTILE_EDGES)
            .map(|k| quantile(&sorted, k as f64 / (QUANTILE_EDGES - 1) as f64))
            .collect();
        edges.push(top + 1.0);

        let selected = histogram_density(mag_sel, &edges);
        let others = histogram_density(mag_others, &edges);
        Ok(Self {
            edges,
            selected,
            others,
        })
    }

    /// Load a histogram pair from a four-column whitespace table:
    /// `bin_lo bin_hi hist_selected hist_others`, `#` lines ignored
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut lo = Vec::new();
        let mut hi = Vec::new();
        let mut selected = Vec::new();
        let mut others = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<f64> = line
                .split_whitespace()
                .map(|f| f.parse::<f64>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|_| {
                    SkymatchError::Data(format!(
                        "bad histogram line in \"{}\": {}",
                        path.display(),
                        line
                    ))
                })?;
            if fields.len() != 4 {
                return Err(SkymatchError::Data(format!(
                    "histogram file \"{}\" needs 4 columns, found {}",
                    path.display(),
                    fields.len()
                )));
            }
            lo.push(fields[0]);
            hi.push(fields[1]);
            selected.push(fields[2]);
            others.push(fields[3]);
        }

        let last_hi = *hi.last().ok_or_else(|| {
            SkymatchError::Data(format!("histogram file \"{}\" is empty", path.display()))
        })?;
        let mut edges = lo;
        edges.push(last_hi);
        Ok(Self {
            edges,
            selected,
            others,
        })
    }

    /// Dump the histogram pair in the format [`from_file`](Self::from_file)
    /// reads
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# lo hi selected others")?;
        for k in 0..self.selected.len() {
            writeln!(
                writer,
                "{:10.5} {:10.5} {:10.5} {:10.5}",
                self.edges[k],
                self.edges[k + 1],
                self.selected[k],
                self.others[k]
            )?;
        }
        writer.flush()?;
        Ok(())
    }

    /// The biasing function `sel / (sel + all)` over these bins
    pub fn bias_function(&self) -> BiasFunction {
        let fraction = self
            .selected
            .iter()
            .zip(&self.others)
            .map(|(s, a)| s / (s + a))
            .collect();
        BiasFunction {
            edges: self.edges.clone(),
            fraction,
        }
    }
}

/// Piecewise-constant interpolator over the selected fraction per bin.
///
/// Queries outside the bin range clamp to the end bins.
#[derive(Debug, Clone)]
pub struct BiasFunction {
    edges: Vec<f64>,
    fraction: Vec<f64>,
}

impl BiasFunction {
    /// The selected fraction for a magnitude
    pub fn eval(&self, mag: f64) -> f64 {
        let nbins = self.fraction.len();
        if mag <= self.edges[0] {
            return self.fraction[0];
        }
        if mag >= self.edges[nbins] {
            return self.fraction[nbins - 1];
        }
        let bin = self
            .edges
            .partition_point(|&e| e <= mag)
            .saturating_sub(1)
            .min(nbins - 1);
        self.fraction[bin]
    }

    /// log₁₀ weight for a magnitude; undefined magnitudes (NaN, ±∞ or the
    /// −99 sentinel) and empty bins are neutral
    pub fn weight(&self, mag: f64) -> f64 {
        if !mag.is_finite() || mag == MISSING_FLOAT {
            return 0.0;
        }
        let w = self.eval(mag).log10();
        if w.is_nan() {
            0.0
        } else {
            w
        }
    }
}

/// Build the auto histogram for one catalogue magnitude column.
///
/// `mag_catalogue` is the full catalogue column with invalid entries mapped
/// to NaN; `slots` is the catalogue row referenced by each join row (−1 for
/// absent); `secure` and `possible` mark the join rows whose counterparts
/// feed the selected sample and the "vaguely possible" exclusion set. The
/// others sample is every valid catalogue row not vaguely possible.
pub fn auto_histogram(
    mag_catalogue: &[f64],
    slots: &[i32],
    secure: &[bool],
    possible: &[bool],
    label: &str,
) -> Result<MagnitudeHistogram> {
    let mut secure_rows = BTreeSet::new();
    let mut possible_rows = BTreeSet::new();
    for ((&slot, &sec), &poss) in slots.iter().zip(secure).zip(possible) {
        if slot < 0 {
            continue;
        }
        if sec {
            secure_rows.insert(slot as usize);
        }
        if poss {
            possible_rows.insert(slot as usize);
        }
    }

    let mag_sel: Vec<f64> = secure_rows
        .iter()
        .map(|&r| mag_catalogue[r])
        .filter(|m| m.is_finite())
        .collect();
    let mag_others: Vec<f64> = mag_catalogue
        .iter()
        .enumerate()
        .filter(|(r, m)| m.is_finite() && !possible_rows.contains(r))
        .map(|(_, &m)| m)
        .collect();
    let valid = mag_catalogue.iter().filter(|m| m.is_finite()).count();
    let top = mag_catalogue
        .iter()
        .copied()
        .filter(|m| m.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);

    info!(
        "magnitude histogram of \"{}\": {} secure matches, {} insecure matches \
         and {} secure non-matches of {} total entries ({} valid)",
        label,
        mag_sel.len(),
        possible_rows.len(),
        mag_others.len(),
        mag_catalogue.len(),
        valid
    );

    if mag_sel.len() < 2 {
        return Err(SkymatchError::Config(format!(
            "fewer than 2 selected rows for magnitude histogram \"{}\"",
            label
        )));
    }
    MagnitudeHistogram::adaptive(&mag_sel, &mag_others, top)
}

/// Quantile with linear interpolation between order statistics;
/// `sorted` must be ascending, `t` in [0, 1]
fn quantile(sorted: &[f64], t: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = t * (n - 1) as f64;
    let lo = (pos.floor() as usize).min(n - 1);
    let hi = (lo + 1).min(n - 1);
    let frac = pos - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// Density histogram over explicit edges: values on the final edge fall
/// into the last bin, values outside the edge range are dropped,
/// zero-width bins read as zero density
fn histogram_density(values: &[f64], edges: &[f64]) -> Vec<f64> {
    let nbins = edges.len() - 1;
    let lo = edges[0];
    let hi = edges[nbins];
    let mut counts = vec![0u64; nbins];
    for &v in values {
        if v.is_nan() || v < lo || v > hi {
            continue;
        }
        let bin = if v >= hi {
            nbins - 1
        } else {
            edges.partition_point(|&e| e <= v).saturating_sub(1)
        };
        counts[bin] += 1;
    }
    let total: u64 = counts.iter().sum();
    counts
        .iter()
        .enumerate()
        .map(|(k, &c)| {
            let width = edges[k + 1] - edges[k];
            if total == 0 || width <= 0.0 {
                0.0
            } else {
                c as f64 / (total as f64 * width)
            }
        })
        .collect()
}
