//! Multiway association between astrometric catalogues
//!
//! Example:
//!   skymatch --radius 10 --prior-completeness 0.95 \
//!       --mag GOODS:mag_H auto --mag IRAC:mag_irac1 auto \
//!       cdfs_srclist.tbl :Pos_error candels_irac1.tbl 0.5 gs_short.tbl 0.1 \
//!       --out out.tbl

use clap::Parser;
use std::path::PathBuf;

use skymatch::pipeline::MagPrior;
use skymatch::{Catalogue, MatchConfig, PositionError, SkymatchError, Table};

/// Command line arguments for the cross-matching tool
#[derive(Parser)]
#[command(name = "skymatch")]
#[command(about = "Probabilistic N-way association between astrometric catalogues")]
struct Cli {
    /// Exclusive search radius in arcsec for initial matching
    #[arg(long)]
    radius: f64,

    /// Search radius in arcsec for magnitude histograms. By default, the
    /// Bayesian posterior is used
    #[arg(long)]
    mag_radius: Option<f64>,

    /// Expected matching completeness of sources (prior)
    #[arg(long, default_value_t = 1.0)]
    prior_completeness: f64,

    /// TABLE:COLUMN for magnitude biasing, and "auto" or a histogram file
    /// (repeatable)
    #[arg(long = "mag", num_args = 2, value_names = ["MAGCOLUMN", "MAGFILE"])]
    mag: Vec<String>,

    /// Posterior difference up to which secondary solutions are flagged
    #[arg(long, default_value_t = 0.005)]
    acceptable_prob: f64,

    /// Lowest probability allowed in the final catalogue; 0 keeps everything
    #[arg(long, default_value_t = 0.0)]
    min_prob: f64,

    /// Output table file (.csv for text output, binary otherwise)
    #[arg(long)]
    out: PathBuf,

    /// Input catalogue files and position errors, alternating:
    /// FILE :COLUMN|ARCSEC ...
    #[arg(required = true, num_args = 2..)]
    catalogues: Vec<String>,
}

fn main() {
    env_logger::init();
    if let Err(error) = run() {
        eprintln!("error: {}", error);
        std::process::exit(1);
    }
}

fn run() -> skymatch::Result<()> {
    let cli = Cli::parse();

    if cli.catalogues.len() % 2 != 0 {
        return Err(SkymatchError::Config(
            "catalogues must be given as FILE ERROR pairs, \
             e.g. srclist.tbl :Pos_error irac.tbl 0.5"
                .to_string(),
        ));
    }

    let mut catalogues = Vec::new();
    for pair in cli.catalogues.chunks(2) {
        let table = Table::read(&pair[0])?;
        println!(
            "catalogue \"{}\": {} rows from {}",
            table.name(),
            table.len(),
            pair[0]
        );
        let pos_error = PositionError::parse(&pair[1])?;
        catalogues.push(Catalogue::new(table, pos_error));
    }

    let mut config = MatchConfig::new(cli.radius);
    config.mag_radius = cli.mag_radius;
    config.prior_completeness = cli.prior_completeness;
    config.acceptable_prob = cli.acceptable_prob;
    config.min_prob = cli.min_prob;
    config.fit_dir = Some(PathBuf::from("."));
    for pair in cli.mag.chunks(2) {
        config.mag_priors.push(MagPrior::parse(&pair[0], &pair[1])?);
    }

    let mut result = skymatch::cross_match(&catalogues, &config)?;
    let inputs: Vec<&str> = cli.catalogues.iter().step_by(2).map(String::as_str).collect();
    result.header_set("INPUT", &inputs.join(", "));
    result.save(&cli.out)?;
    println!(
        "wrote \"{}\" ({} rows, {} columns)",
        cli.out.display(),
        result.len(),
        result.n_columns()
    );
    Ok(())
}
