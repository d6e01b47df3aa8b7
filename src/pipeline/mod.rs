//! End-to-end cross-matching pipeline
//!
//! Wires the spatial join, the Bayesian scorer, the magnitude priors and
//! the flagger into a single operation from input catalogues to the
//! annotated output table.

use log::{info, warn};
use std::path::PathBuf;

use crate::bayes::{self, posterior, ScoreInputs};
use crate::coordinates::ARCSEC_PER_DEG;
use crate::flagging;
use crate::magnitudes::{self, MagnitudeHistogram};
use crate::matching::{self, join, MatchCache};
use crate::table::{Column, Table, MISSING_FLOAT};
use crate::{Result, SkymatchError};

/// Full sky in square degrees: 4π(180/π)²
pub const FULL_SKY_DEG2: f64 = 4.0 * 180.0 * 180.0 / std::f64::consts::PI;

/// Positional uncertainty of a catalogue: a per-row column or a fixed
/// scalar, both in arcseconds
#[derive(Debug, Clone, PartialEq)]
pub enum PositionError {
    /// Name of a per-row uncertainty column in the catalogue
    Column(String),
    /// One uncertainty for every row
    Fixed(f64),
}

impl PositionError {
    /// Parse a command-line error spec: `:NAME` references a column,
    /// anything else must be a fixed value in arcseconds
    pub fn parse(spec: &str) -> Result<Self> {
        if let Some(name) = spec.strip_prefix(':') {
            Ok(PositionError::Column(name.to_string()))
        } else {
            spec.parse().map(PositionError::Fixed).map_err(|_| {
                SkymatchError::Config(format!(
                    "position error \"{}\" is neither a number nor a :COLUMN reference",
                    spec
                ))
            })
        }
    }

    fn describe(&self) -> String {
        match self {
            PositionError::Column(name) => format!(":{}", name),
            PositionError::Fixed(value) => format!("{}", value),
        }
    }
}

/// One input catalogue with its positional uncertainty
pub struct Catalogue {
    pub table: Table,
    pub pos_error: PositionError,
}

impl Catalogue {
    pub fn new(table: Table, pos_error: PositionError) -> Self {
        Self { table, pos_error }
    }

    /// All-sky-equivalent source density ρ = N/A · 4π(180/π)²
    pub fn density(&self) -> Result<f64> {
        Ok(self.table.len() as f64 / self.table.skyarea()? * FULL_SKY_DEG2)
    }

    /// Density inflated for a possibly absent source, ρ⁺ = (N+1)/A · 4π(180/π)²
    pub fn density_plus(&self) -> Result<f64> {
        Ok((self.table.len() as f64 + 1.0) / self.table.skyarea()? * FULL_SKY_DEG2)
    }
}

/// Where a magnitude prior histogram comes from
#[derive(Debug, Clone, PartialEq)]
pub enum MagPriorSource {
    /// Estimate from the data within the run
    Auto,
    /// Load a previously computed four-column histogram file
    File(PathBuf),
}

/// A magnitude prior entry: which catalogue column to bias on, and how
#[derive(Debug, Clone, PartialEq)]
pub struct MagPrior {
    pub table: String,
    pub column: String,
    pub source: MagPriorSource,
}

impl MagPrior {
    /// Parse a `TABLE:COLUMN` spec plus `auto` or a histogram file path
    pub fn parse(column_spec: &str, source: &str) -> Result<Self> {
        let (table, column) = column_spec.split_once(':').ok_or_else(|| {
            SkymatchError::Config(format!(
                "magnitude column \"{}\" must have the form TABLE:COLUMN",
                column_spec
            ))
        })?;
        let source = if source == "auto" {
            MagPriorSource::Auto
        } else {
            MagPriorSource::File(PathBuf::from(source))
        };
        Ok(Self {
            table: table.to_string(),
            column: column.to_string(),
            source,
        })
    }

    fn label(&self) -> String {
        format!("{}:{}", self.table, self.column)
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Exclusive search radius in arcseconds
    pub radius_arcsec: f64,
    /// Radius for the magnitude histogram selection; when unset the
    /// astrometric posterior selects instead
    pub mag_radius: Option<f64>,
    /// Expected matching completeness of sources, in [0, 1]
    pub prior_completeness: f64,
    /// Magnitude biasing entries
    pub mag_priors: Vec<MagPrior>,
    /// Posterior distance up to which secondary solutions are flagged
    pub acceptable_prob: f64,
    /// Lowest posterior kept in the final catalogue; 0 keeps everything
    pub min_prob: f64,
    /// Directory for auto magnitude histogram dumps; None disables them
    pub fit_dir: Option<PathBuf>,
}

impl MatchConfig {
    /// Configuration with the given search radius and the defaults for
    /// everything else
    pub fn new(radius_arcsec: f64) -> Self {
        Self {
            radius_arcsec,
            mag_radius: None,
            prior_completeness: 1.0,
            mag_priors: Vec::new(),
            acceptable_prob: 0.005,
            min_prob: 0.0,
            fit_dir: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.radius_arcsec > 0.0) {
            return Err(SkymatchError::Config(
                "search radius must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.prior_completeness) {
            return Err(SkymatchError::Config(
                "prior completeness must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_prob) {
            return Err(SkymatchError::Config(
                "minimum probability must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Run the full pipeline: spatial join, join-table assembly, Bayesian
/// scoring, magnitude biasing, flagging and the optional posterior cut.
///
/// The first catalogue is the primary; every output row references one of
/// its sources. Fails with [`SkymatchError::NoMatches`] when nothing
/// survives the search radius.
pub fn cross_match_with_cache(
    catalogues: &[Catalogue],
    config: &MatchConfig,
    cache: &mut dyn MatchCache,
) -> Result<Table> {
    config.validate()?;
    if catalogues.len() < 2 {
        return Err(SkymatchError::Config(
            "need at least two catalogues to match".to_string(),
        ));
    }
    if let Some(mag_radius) = config.mag_radius {
        if mag_radius >= config.radius_arcsec {
            warn!(
                "magnitude radius is very large (>= matching radius); \
                 consider using a smaller value"
            );
        }
    }

    let ncat = catalogues.len();
    let radius_deg = config.radius_arcsec / ARCSEC_PER_DEG;
    info!("matching with {} arcsec radius", config.radius_arcsec);

    let mut densities = Vec::with_capacity(ncat);
    let mut densities_plus = Vec::with_capacity(ncat);
    for (ti, catalogue) in catalogues.iter().enumerate() {
        let density = catalogue.density()?;
        info!(
            "catalogue \"{}\" ({} rows): density is {:e}",
            catalogue.table.name(),
            catalogue.table.len(),
            density
        );
        densities.push(density);
        // the source can not be absent in the primary catalogue
        densities_plus.push(if ti == 0 {
            density
        } else {
            catalogue.density_plus()?
        });
    }

    let mut coords = Vec::with_capacity(ncat);
    for catalogue in catalogues {
        let table = &catalogue.table;
        let ra = float_column(table, &table.ra_key()?)?;
        let dec = float_column(table, &table.dec_key()?)?;
        coords.push((ra, dec));
    }
    let positions: Vec<(&[f64], &[f64])> = coords
        .iter()
        .map(|(ra, dec)| (ra.as_slice(), dec.as_slice()))
        .collect();

    let candidates = matching::enumerate_candidates(&positions, radius_deg, cache)?;
    if candidates.is_empty() {
        return Err(SkymatchError::NoMatches);
    }

    let tables: Vec<&Table> = catalogues.iter().map(|c| &c.table).collect();
    let join::JoinedTable { mut table, tuples } =
        join::assemble(&tables, &candidates, config.radius_arcsec)?;
    if table.is_empty() {
        return Err(SkymatchError::NoMatches);
    }

    let mut errors = Vec::with_capacity(ncat);
    for catalogue in catalogues {
        errors.push(resolve_errors(catalogue, &table, config.radius_arcsec)?);
    }
    let error_specs: Vec<String> = catalogues
        .iter()
        .map(|c| format!("{}_{}", c.table.name(), c.pos_error.describe()))
        .collect();
    table.header_set("COLS_ERR", &error_specs.join(" "));

    let mut sep_columns: Vec<Vec<f64>> = Vec::new();
    for i in 0..ncat {
        for j in (i + 1)..ncat {
            let name = join::separation_column(tables[i].name(), tables[j].name());
            sep_columns.push(float_column(&table, &name)?);
        }
    }
    let separations: Vec<&[f64]> = sep_columns.iter().map(|v| v.as_slice()).collect();

    info!("computing probabilities from separations");
    let inputs = ScoreInputs {
        errors,
        separations,
        densities_plus,
        primary_density: densities[0],
        completeness: config.prior_completeness,
    };
    let (log_bf, prior) = bayes::score_tuples(&tuples, &inputs)?;
    let bfpost: Vec<f64> = log_bf
        .iter()
        .zip(&prior)
        .map(|(&lbf, &p)| posterior(p, lbf))
        .collect();
    table.add_column("bf", Column::Float(log_bf.clone()))?;
    table.add_column("bfpost", Column::Float(bfpost.clone()))?;

    let mut total = log_bf;
    let mut bias_names = Vec::new();
    for mag_prior in &config.mag_priors {
        info!("magnitude bias \"{}\"", mag_prior.label());
        let weights = magnitude_weights(catalogues, config, &table, &tuples, &bfpost, mag_prior)?;
        for (t, w) in total.iter_mut().zip(&weights) {
            *t += w;
        }
        let joined_name = format!("{}_{}", mag_prior.table, mag_prior.column);
        table.add_column(
            &format!("bias_{}", joined_name),
            Column::Float(weights.iter().map(|&w| 10f64.powf(w)).collect()),
        )?;
        bias_names.push(joined_name);
    }

    let post: Vec<f64> = total
        .iter()
        .zip(&prior)
        .map(|(&t, &p)| posterior(p, t))
        .collect();
    table.add_column("post", Column::Float(post.clone()))?;

    let primary = &catalogues[0].table;
    let primary_id = format!("{}_{}", primary.name(), primary.id_key()?);
    info!("grouping by column \"{}\" for flagging", primary_id);
    let id_column = table.column(&primary_id).ok_or_else(|| {
        SkymatchError::Data(format!("primary id column \"{}\" missing from join", primary_id))
    })?;
    let groups = flagging::group_by_column(id_column);
    let flags = flagging::flag_groups(&groups, &post, &total, &prior, config.acceptable_prob);
    table.add_column("post_group_no_match", Column::Float(flags.no_match))?;
    table.add_column("post_group_this_match", Column::Float(flags.this_match))?;
    table.add_column("match_flag", Column::Int(flags.match_flag))?;
    table.header_set("COL_PRIM", &primary_id);

    if config.min_prob > 0.0 {
        let mask: Vec<bool> = post.iter().map(|&p| p >= config.min_prob).collect();
        let dropped = mask.iter().filter(|&&keep| !keep).count();
        info!("cutting away {} rows (below minimum probability)", dropped);
        table.retain(&mask);
    }

    let names: Vec<&str> = tables.iter().map(|t| t.name()).collect();
    table.header_set("METHOD", "multi-way matching");
    table.header_set("TABLES", &names.join(", "));
    table.header_set("BIASING", &bias_names.join(", "));
    table.header_set(
        "DATE",
        &chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
    );
    info!(
        "catalogue ready: {} rows, {} columns",
        table.len(),
        table.n_columns()
    );
    Ok(table)
}

/// Per-row log₁₀ weights for one magnitude prior entry
fn magnitude_weights(
    catalogues: &[Catalogue],
    config: &MatchConfig,
    table: &Table,
    tuples: &[matching::CandidateTuple],
    bfpost: &[f64],
    mag_prior: &MagPrior,
) -> Result<Vec<f64>> {
    let ti = catalogues
        .iter()
        .position(|c| c.table.name() == mag_prior.table)
        .ok_or_else(|| {
            SkymatchError::Config(format!(
                "table name specified for magnitude (\"{}\") unknown. Known tables: {}",
                mag_prior.table,
                catalogues
                    .iter()
                    .map(|c| c.table.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
    let cat_table = &catalogues[ti].table;
    let mag_column = cat_table.column(&mag_prior.column).ok_or_else(|| {
        SkymatchError::Config(format!(
            "column name specified for magnitude (\"{}\") unknown. \
             Known columns in table \"{}\": {}",
            mag_prior.label(),
            mag_prior.table,
            cat_table.column_names().collect::<Vec<_>>().join(", ")
        ))
    })?;
    let mut mag_catalogue = mag_column.to_float_vec().ok_or_else(|| {
        SkymatchError::Config(format!(
            "magnitude column \"{}\" is not numeric",
            mag_prior.label()
        ))
    })?;
    // the absence sentinel marks an undefined magnitude
    for value in &mut mag_catalogue {
        if *value == MISSING_FLOAT {
            *value = f64::NAN;
        }
    }

    let histogram = match &mag_prior.source {
        MagPriorSource::Auto => {
            let slots: Vec<i32> = tuples.iter().map(|t| t[ti]).collect();
            let (secure, possible) = selection_masks(config, table, bfpost)?;
            let histogram = magnitudes::auto_histogram(
                &mag_catalogue,
                &slots,
                &secure,
                &possible,
                &mag_prior.label(),
            )?;
            if let Some(dir) = &config.fit_dir {
                let path = dir.join(format!("{}_{}_fit.txt", mag_prior.table, mag_prior.column));
                histogram.write(&path)?;
            }
            histogram
        }
        MagPriorSource::File(path) => {
            info!(
                "magnitude histogramming: using histogram from \"{}\" for \"{}\"",
                path.display(),
                mag_prior.label()
            );
            MagnitudeHistogram::from_file(path)?
        }
    };

    let function = histogram.bias_function();
    let joined_mag = float_column(table, &format!("{}_{}", mag_prior.table, mag_prior.column))?;
    Ok(joined_mag.iter().map(|&m| function.weight(m)).collect())
}

/// The secure and vaguely-possible join-row masks for the auto histogram
fn selection_masks(
    config: &MatchConfig,
    table: &Table,
    bfpost: &[f64],
) -> Result<(Vec<bool>, Vec<bool>)> {
    match config.mag_radius {
        Some(mag_radius) => {
            let max_sep = float_column(table, "Separation_max")?;
            let secure: Vec<bool> = max_sep.iter().map(|&s| s < mag_radius).collect();
            let possible = secure.clone();
            Ok((secure, possible))
        }
        None => Ok((
            bfpost.iter().map(|&p| p > 0.9).collect(),
            bfpost.iter().map(|&p| p > 0.01).collect(),
        )),
    }
}

fn resolve_errors(catalogue: &Catalogue, joined: &Table, radius_arcsec: f64) -> Result<Vec<f64>> {
    let name = catalogue.table.name();
    match &catalogue.pos_error {
        PositionError::Column(column) => {
            let key = format!("{}_{}", name, column);
            let values = joined
                .column(&key)
                .and_then(|c| c.to_float_vec())
                .ok_or_else(|| {
                    SkymatchError::Schema(format!(
                        "position error column \"{}\" for \"{}\" not in merged table",
                        key, name
                    ))
                })?;
            // ignore the absence sentinel when judging the values
            let present: Vec<f64> = values
                .iter()
                .copied()
                .filter(|&v| v != MISSING_FLOAT)
                .collect();
            let zeros = present.iter().filter(|&&v| v <= 0.0).count();
            let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            info!(
                "position error for \"{}\": using column \"{}\", largest value {}",
                name, key, max
            );
            if zeros > 0 {
                warn!(
                    "some position errors in \"{}\" are <= 0; \
                     this will give invalid results ({} rows)",
                    key, zeros
                );
            }
            if max > radius_arcsec {
                warn!(
                    "some position errors in \"{}\" are larger than the match radius; \
                     increase the radius to well above {}",
                    key, max
                );
            }
            Ok(values)
        }
        PositionError::Fixed(value) => {
            info!("position error for \"{}\": using fixed value {}", name, value);
            if *value > radius_arcsec {
                warn!(
                    "the position error for \"{}\" is larger than the match radius; \
                     increase the radius to well above {}",
                    name, value
                );
            }
            Ok(vec![*value; joined.len()])
        }
    }
}

fn float_column(table: &Table, name: &str) -> Result<Vec<f64>> {
    table
        .column(name)
        .and_then(|c| c.to_float_vec())
        .ok_or_else(|| {
            SkymatchError::Data(format!(
                "missing numeric column \"{}\" in table \"{}\"",
                name,
                table.name()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_error_parsing() {
        assert_eq!(
            PositionError::parse(":Pos_error").unwrap(),
            PositionError::Column("Pos_error".to_string())
        );
        assert_eq!(
            PositionError::parse("0.5").unwrap(),
            PositionError::Fixed(0.5)
        );
        assert!(matches!(
            PositionError::parse("half"),
            Err(SkymatchError::Config(_))
        ));
    }

    #[test]
    fn test_mag_prior_parsing() {
        let auto = MagPrior::parse("GOODS:mag_H", "auto").unwrap();
        assert_eq!(auto.table, "GOODS");
        assert_eq!(auto.column, "mag_H");
        assert_eq!(auto.source, MagPriorSource::Auto);

        let file = MagPrior::parse("IRAC:mag_irac1", "irac_histogram.txt").unwrap();
        assert_eq!(
            file.source,
            MagPriorSource::File(PathBuf::from("irac_histogram.txt"))
        );

        assert!(matches!(
            MagPrior::parse("no_colon", "auto"),
            Err(SkymatchError::Config(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(MatchConfig::new(10.0).validate().is_ok());
        assert!(MatchConfig::new(0.0).validate().is_err());

        let mut config = MatchConfig::new(10.0);
        config.prior_completeness = 1.5;
        assert!(config.validate().is_err());

        let mut config = MatchConfig::new(10.0);
        config.min_prob = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_density_uses_sky_area() {
        let mut table = Table::new("D");
        table.header_set("SKYAREA", "41252.96124941928");
        table
            .add_column("ID", Column::Int((1..=100).collect()))
            .unwrap();
        let catalogue = Catalogue::new(table, PositionError::Fixed(1.0));

        // a full-sky catalogue has density equal to its row count
        let density = catalogue.density().unwrap();
        assert!((density - 100.0).abs() < 1e-9);
        let plus = catalogue.density_plus().unwrap();
        assert!((plus - 101.0).abs() < 1e-9);
    }
}
