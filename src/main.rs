use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tally::bands::AgeBands;
use tally::config::TallyConfig;
use tally::expiration::ExpirationStatus;
use tally::lab::{LabOptions, LabTable};
use tally::marathon::{column_defs, Gender, RunnerTable};
use tally::storage;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(version)]
#[command(about = "Aggregate race results and lab samples into dashboard tables", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG still applies)
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Race results
    Marathon(MarathonArgs),
    /// Lab samples
    Lab(LabArgs),
}

#[derive(Args, Debug)]
struct MarathonArgs {
    /// Table to print
    #[arg(value_enum)]
    report: MarathonReport,

    /// Runner CSV (overrides config)
    #[arg(short, long, value_name = "FILE")]
    data: Option<PathBuf>,

    /// Genders to include; repeat for several, none means all
    #[arg(short, long, value_parser = parse_gender)]
    gender: Vec<Gender>,

    /// Rows in top-N tables (overrides config)
    #[arg(short = 'n', long)]
    top: Option<usize>,

    /// Write the normalized table to this CSV file
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MarathonReport {
    Summary,
    Columns,
    RunnersByAge,
    PaceByAge,
    AgeGroups,
    PaceByAgeGroup,
    TopCountries,
    TopRunners,
}

#[derive(Args, Debug)]
struct LabArgs {
    /// Table to print
    #[arg(value_enum)]
    report: LabReport,

    /// Sample CSV (overrides config)
    #[arg(short, long, value_name = "FILE")]
    data: Option<PathBuf>,

    /// Date days-to-expire is measured from (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    reference_date: Option<NaiveDate>,

    /// Rows in top-N tables (overrides config)
    #[arg(short = 'n', long)]
    top: Option<usize>,

    /// Status for the expiration-risk table
    #[arg(long, value_enum, default_value = "expired")]
    status: StatusArg,

    /// Product for samples and results
    #[arg(long)]
    product: Option<String>,

    /// Sample id for results
    #[arg(long)]
    id: Option<String>,

    /// Unit for results
    #[arg(long, default_value = "ng_serving")]
    unit: String,

    /// Write the normalized table to this CSV file
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LabReport {
    TopTags,
    ExpirationRisk,
    ExpiringByTags,
    ExpiredLots,
    Lots,
    Shipments,
    Timeline,
    Products,
    Samples,
    Results,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Expired,
    Critical,
    Nearing,
    Safe,
    None,
}

impl From<StatusArg> for ExpirationStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Expired => Self::Expired,
            StatusArg::Critical => Self::Critical,
            StatusArg::Nearing => Self::NearingExpiration,
            StatusArg::Safe => Self::Safe,
            StatusArg::None => Self::NoStatus,
        }
    }
}

fn parse_gender(code: &str) -> std::result::Result<Gender, String> {
    Gender::from_code(&code.to_uppercase())
        .ok_or_else(|| format!("unknown gender {code:?}, expected M, W or X"))
}

/// Initialize tracing subscriber on stderr
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_batch(batch: &arrow::array::RecordBatch) -> Result<()> {
    print_json(&storage::batch_to_json(batch)?)
}

fn write_export(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "table exported");
    Ok(())
}

fn run_marathon(config: &TallyConfig, args: &MarathonArgs) -> Result<()> {
    let Some(path) = args.data.as_ref().or(config.marathon.path.as_ref()) else {
        bail!("no runner CSV given; pass --data or set marathon.path");
    };
    let bands = AgeBands::new(config.marathon.age_bands)?;
    let runners = RunnerTable::load_csv(path, &bands)?;
    let genders: BTreeSet<Gender> = args.gender.iter().copied().collect();

    if let Some(export) = &args.export {
        write_export(export, &runners.export_csv()?)?;
    }

    match args.report {
        MarathonReport::Summary => print_json(&runners.summary()?),
        MarathonReport::Columns => print_json(&column_defs()),
        MarathonReport::RunnersByAge => print_batch(&runners.runners_by_age(&genders)?),
        MarathonReport::PaceByAge => print_batch(&runners.avg_pace_by_age(&genders)?),
        MarathonReport::AgeGroups => print_batch(&runners.age_group_counts(&genders)?),
        MarathonReport::PaceByAgeGroup => {
            print_batch(&runners.avg_pace_by_age_group(&genders)?)
        }
        MarathonReport::TopCountries => {
            let n = args.top.unwrap_or(config.marathon.top_countries);
            print_batch(&runners.top_countries(n, &genders)?)
        }
        MarathonReport::TopRunners => {
            let n = args.top.unwrap_or(config.marathon.top_runners);
            print_batch(&runners.top_runners_by_races(n, &genders)?)
        }
    }
}

fn run_lab(config: &TallyConfig, args: &LabArgs) -> Result<()> {
    let Some(path) = args.data.as_ref().or(config.lab.path.as_ref()) else {
        bail!("no sample CSV given; pass --data or set lab.path");
    };
    let mut options = LabOptions::from_config(&config.lab);
    if let Some(date) = args.reference_date {
        options.reference_date = date;
    }
    let lab = LabTable::load_csv(path, options)?;

    if let Some(export) = &args.export {
        write_export(export, &lab.export_csv()?)?;
    }

    let product = || {
        args.product
            .as_deref()
            .context("--product is required for this report")
    };

    match args.report {
        LabReport::TopTags => {
            print_batch(&lab.top_tags(args.top.unwrap_or(config.lab.top_tags))?)
        }
        LabReport::ExpirationRisk => print_batch(&lab.expiration_risk(args.status.into())?),
        LabReport::ExpiringByTags => print_batch(&lab.expiring_by_tags()?),
        LabReport::ExpiredLots => print_batch(
            &lab.expired_lots_by_tags(args.top.unwrap_or(config.lab.top_expired_tags))?,
        ),
        LabReport::Lots => print_batch(&lab.tag_product_lot_counts()?),
        LabReport::Shipments => print_json(&lab.shipment_trends()?),
        LabReport::Timeline => print_json(&lab.product_timeline()?),
        LabReport::Products => print_json(&lab.products()?),
        LabReport::Samples => print_json(&lab.sample_ids(product()?)?),
        LabReport::Results => {
            let product = product()?;
            let id = match &args.id {
                Some(id) => id.clone(),
                None => lab
                    .sample_ids(product)?
                    .into_iter()
                    .next()
                    .with_context(|| format!("no samples for product {product:?}"))?,
            };
            print_json(&lab.test_results(product, &id, &args.unit)?)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = match &cli.config {
        Some(path) => TallyConfig::load(path)?,
        None => TallyConfig::default(),
    };

    match &cli.command {
        Command::Marathon(args) => run_marathon(&config, args),
        Command::Lab(args) => run_lab(&config, args),
    }
}
