use chrono::{DateTime, Duration, Utc};
use clap::{Args, Parser, Subcommand};
use insulin_core::export::{export_series_csv, SeriesPoint};
use insulin_core::glucose::{filter_after_calibration, momentum_preconditions};
use insulin_core::store::JsonlStore;
use insulin_core::time::TimelineValue;
use insulin_core::*;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "iobkit")]
#[command(about = "Insulin on board and glucose effect calculator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Args, Clone, Copy, Debug)]
struct RangeArgs {
    /// Start of the range (RFC 3339); defaults to the earliest record
    #[arg(long, value_parser = parse_date)]
    from: Option<DateTime<Utc>>,

    /// End of the range (RFC 3339); defaults to the latest record
    #[arg(long, value_parser = parse_date)]
    to: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the reconciled pump event timeline as JSON lines
    Reconcile {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Print doses relative to the basal schedule as JSON lines
    Normalize {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Insulin on board series
    Iob {
        #[command(flatten)]
        range: RangeArgs,

        /// Write CSV here instead of printing JSON lines
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Cumulative glucose effect of insulin
    Effects {
        #[command(flatten)]
        range: RangeArgs,

        /// Write CSV here instead of printing JSON lines
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Glucose momentum projected from the most recent samples
    Momentum {
        /// Minutes of samples before the latest one used for the fit
        #[arg(long, default_value_t = 15, value_parser = clap::value_parser!(i64).range(1..=1440))]
        window_minutes: i64,

        /// Write CSV here instead of printing JSON lines
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Glucose velocity not explained by insulin
    Counteraction {
        #[command(flatten)]
        range: RangeArgs,

        /// Write CSV here instead of printing JSON lines
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Report whether the reservoir record is complete
    CheckReservoir {
        #[command(flatten)]
        range: RangeArgs,
    },
}

fn parse_date(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {}", e))
}

fn main() -> Result<()> {
    // Initialize logging
    insulin_core::logging::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());
    let store = JsonlStore::new(data_dir);

    match cli.command {
        Commands::Reconcile { range } => cmd_reconcile(&store, range),
        Commands::Normalize { range } => cmd_normalize(&store, range, &config),
        Commands::Iob { range, csv } => cmd_iob(&store, range, csv.as_deref(), &config),
        Commands::Effects { range, csv } => cmd_effects(&store, range, csv.as_deref(), &config),
        Commands::Momentum {
            window_minutes,
            csv,
        } => cmd_momentum(&store, window_minutes, csv.as_deref(), &config),
        Commands::Counteraction { range, csv } => {
            cmd_counteraction(&store, range, csv.as_deref(), &config)
        }
        Commands::CheckReservoir { range } => cmd_check_reservoir(&store, range, &config),
    }
}

fn build_pipeline(config: &Config) -> Result<EffectsPipeline> {
    let mut pipeline = EffectsPipeline::new(config.insulin_model()?, config.effect_timing()?)
        .with_maximum_reservoir_gap(config.maximum_reservoir_gap()?);
    if let Some(schedule) = config.basal_schedule()? {
        pipeline = pipeline.with_basal_schedule(schedule);
    }
    if let Some(schedule) = config.sensitivity_schedule()? {
        pipeline = pipeline.with_sensitivity_schedule(schedule);
    }
    Ok(pipeline)
}

/// Earliest start and latest end across `records`
fn record_span<T: TimelineValue>(records: &[T]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = records.iter().map(|r| r.start_date()).min()?;
    let end = records.iter().map(|r| r.end_date()).max()?;
    Some((start, end))
}

fn merge_spans(
    a: Option<(DateTime<Utc>, DateTime<Utc>)>,
    b: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    match (a, b) {
        (Some(a), Some(b)) => Some((a.0.min(b.0), a.1.max(b.1))),
        (a, b) => a.or(b),
    }
}

/// Fill unset bounds from `span`, extending a derived end by `tail`
fn resolve_range(
    range: RangeArgs,
    span: Option<(DateTime<Utc>, DateTime<Utc>)>,
    tail: Duration,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let from = range.from.or(span.map(|(start, _)| start))?;
    let to = range.to.or(span.map(|(_, end)| end + tail))?;
    Some((from, to))
}

/// Range for dose-driven series: recorded history plus the tail of its effect
fn dose_range(
    store: &JsonlStore,
    range: RangeArgs,
    tail: Duration,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    let history = store.dose_history()?;
    let span = merge_spans(record_span(&history.events), record_span(&history.reservoir));
    Ok(resolve_range(range, span, tail))
}

fn print_json_lines<T: Serialize>(records: &[T]) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn emit_series<T: SeriesPoint + Serialize>(series: &[T], csv: Option<&Path>) -> Result<()> {
    match csv {
        Some(path) => {
            let count = export_series_csv(path, series)?;
            println!("✓ Wrote {} rows to {}", count, path.display());
            Ok(())
        }
        None => print_json_lines(series),
    }
}

fn cmd_reconcile(store: &JsonlStore, range: RangeArgs) -> Result<()> {
    let events = store.events()?;
    let events = match resolve_range(range, record_span(&events), Duration::zero()) {
        Some((from, to)) => time::filter_date_range(&events, Some(from), Some(to)),
        None => events,
    };

    print_json_lines(&reconcile(&events))
}

fn cmd_normalize(store: &JsonlStore, range: RangeArgs, config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let Some((from, to)) = dose_range(store, range, Duration::zero())? else {
        eprintln!("No dose history in {}", store.dir().display());
        return Ok(());
    };

    let doses = pipeline.normalized_doses(store, from, to)?;
    print_json_lines(&time::filter_date_range(&doses, Some(from), Some(to)))
}

fn effect_tail(pipeline: &EffectsPipeline) -> Duration {
    pipeline.model().effect_duration() + pipeline.timing().delay()
}

fn cmd_iob(
    store: &JsonlStore,
    range: RangeArgs,
    csv: Option<&Path>,
    config: &Config,
) -> Result<()> {
    let mut pipeline = build_pipeline(config)?;
    let Some((from, to)) = dose_range(store, range, effect_tail(&pipeline))? else {
        eprintln!("No dose history in {}", store.dir().display());
        return Ok(());
    };

    let values = pipeline.insulin_on_board(store, from, to)?;
    emit_series(&values, csv)
}

fn cmd_effects(
    store: &JsonlStore,
    range: RangeArgs,
    csv: Option<&Path>,
    config: &Config,
) -> Result<()> {
    let mut pipeline = build_pipeline(config)?;
    let Some((from, to)) = dose_range(store, range, effect_tail(&pipeline))? else {
        eprintln!("No dose history in {}", store.dir().display());
        return Ok(());
    };

    let effects = pipeline.glucose_effects(store, from, to)?;
    emit_series(&effects, csv)
}

fn cmd_momentum(
    store: &JsonlStore,
    window_minutes: i64,
    csv: Option<&Path>,
    config: &Config,
) -> Result<()> {
    let settings = config.momentum_settings()?;
    let samples = store.glucose()?;
    let Some(latest) = samples.last().map(|sample| sample.start_date) else {
        eprintln!("No glucose samples in {}", store.dir().display());
        return Ok(());
    };

    if let Some(sample) = samples.last() {
        eprintln!(
            "Latest glucose: {} {} at {}",
            sample.quantity,
            sample.unit.label(),
            sample.start_date
        );
    }

    let window_start = latest - Duration::minutes(window_minutes);
    let recent: Vec<GlucoseSample> = samples
        .into_iter()
        .filter(|sample| sample.start_date >= window_start)
        .collect();

    if let Err(reason) = momentum_preconditions(&recent) {
        eprintln!("No momentum effect: {}", reason);
        if filter_after_calibration(&recent).len() < recent.len() {
            eprintln!("  (a calibration was recorded in the last {} minutes)", window_minutes);
        }
    }

    let effects = linear_momentum_effect(&recent, &settings);
    emit_series(&effects, csv)
}

fn cmd_counteraction(
    store: &JsonlStore,
    range: RangeArgs,
    csv: Option<&Path>,
    config: &Config,
) -> Result<()> {
    let mut pipeline = build_pipeline(config)?;
    let samples = store.glucose()?;
    let Some((from, to)) = resolve_range(range, record_span(&samples), Duration::zero()) else {
        eprintln!("No glucose samples in {}", store.dir().display());
        return Ok(());
    };

    let velocities = pipeline.counteraction_effects(store, store, from, to)?;
    emit_series(&velocities, csv)
}

fn cmd_check_reservoir(store: &JsonlStore, range: RangeArgs, config: &Config) -> Result<()> {
    let readings = store.reservoir()?;
    let Some((from, to)) = resolve_range(range, record_span(&readings), Duration::zero()) else {
        println!("No reservoir readings in {}", store.dir().display());
        return Ok(());
    };

    let maximum_gap = config.maximum_reservoir_gap()?;
    let in_range = source::reservoir_covering(&readings, from, to);
    let doses = derive_doses(&in_range);
    let delivered = effects::total_delivery(&doses);

    if reservoir::is_continuous(&in_range, Some(from), to, maximum_gap) {
        println!("✓ Reservoir record is continuous from {} to {}", from, to);
    } else {
        println!("✗ Reservoir record is not continuous from {} to {}", from, to);
    }
    println!("  Readings: {}", in_range.len());
    println!("  Derived doses: {} ({:.2} U)", doses.len(), delivered);

    Ok(())
}
