//! CLI for the slicetree metric store.
//!
//! Provides commands for creating, writing, querying, and inspecting
//! metrics in a slicetree database.

use std::error::Error;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand, ValueEnum};
use slicetree::{CreateOptions, Database, DatabaseSettings, Retention, SliceCachingBehavior};
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn Error>>;

/// slicetree: Graphite-style metric tree over a wide-column store.
#[derive(Parser)]
#[command(name = "slicetree", version, about)]
struct Cli {
    /// Settings file (JSON object with upper-case keys, e.g. `KEYSPACE`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory used when no settings file is given.
    #[arg(long, global = true, default_value = "./slicetree-data")]
    data_dir: PathBuf,

    /// Override the slice caching behavior (none, latest, all).
    #[arg(long, global = true)]
    caching: Option<SliceCachingBehavior>,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the keyspace and tables if missing, then print the layout.
    Init,

    /// Create a metric.
    Create {
        /// Dotted metric path.
        metric: String,

        /// Archive as STEP:COUNT, finest first (repeatable).
        #[arg(long = "retention", required = true, value_parser = parse_retention)]
        retentions: Vec<Retention>,

        /// Minimum known fraction for rollup.
        #[arg(long, default_value = "0.5")]
        xff: f64,

        /// Aggregation method (average, sum, min, max, last).
        #[arg(long, default_value = "average")]
        aggregation: String,
    },

    /// Write datapoints to an existing metric.
    Write {
        /// Dotted metric path.
        metric: String,

        /// Datapoints as TIMESTAMP:VALUE.
        #[arg(required = true, value_parser = parse_datapoint)]
        datapoints: Vec<(u64, f64)>,
    },

    /// Report whether a metric exists.
    Exists {
        /// Dotted metric path.
        metric: String,
    },

    /// Read a metric from the best archive for the range.
    Fetch {
        /// Dotted metric path.
        metric: String,

        /// Time range ending at `--until` (e.g., "1h", "30m", "7d").
        #[arg(long, default_value = "1h")]
        range: String,

        /// Start timestamp; overrides `--range`.
        #[arg(long)]
        from: Option<u64>,

        /// End timestamp (defaults to now).
        #[arg(long)]
        until: Option<u64>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Read or change metric metadata.
    Meta {
        #[command(subcommand)]
        command: MetaCommands,
    },

    /// List metrics and branches matching a dotted glob pattern.
    Find {
        /// Pattern such as `servers.*.cpu` or `servers.web{01,02}.*`.
        pattern: String,
    },

    /// Display a metric's definition and slices.
    Info {
        /// Dotted metric path.
        metric: String,
    },

    /// Remove slices that fell out of retention.
    Prune {
        /// Dotted metric path.
        metric: String,
    },
}

/// Metadata subcommands.
#[derive(Subcommand)]
enum MetaCommands {
    /// Print one metadata value.
    Get {
        /// Dotted metric path.
        metric: String,
        /// Metadata key.
        key: String,
    },

    /// Set one metadata value, keeping the others.
    Set {
        /// Dotted metric path.
        metric: String,
        /// Metadata key.
        key: String,
        /// JSON value; anything that is not valid JSON is stored as a string.
        value: String,
    },
}

/// Output format for fetch results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with a data array.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = open_database(&cli).and_then(|db| match cli.command {
        Commands::Init => cmd_init(&db),
        Commands::Create {
            metric,
            retentions,
            xff,
            aggregation,
        } => cmd_create(&db, &metric, retentions, xff, &aggregation),
        Commands::Write { metric, datapoints } => cmd_write(&db, &metric, &datapoints),
        Commands::Exists { metric } => cmd_exists(&db, &metric),
        Commands::Fetch {
            metric,
            range,
            from,
            until,
            format,
        } => cmd_fetch(&db, &metric, &range, from, until, &format),
        Commands::Meta { command } => match command {
            MetaCommands::Get { metric, key } => cmd_meta_get(&db, &metric, &key),
            MetaCommands::Set { metric, key, value } => cmd_meta_set(&db, &metric, &key, &value),
        },
        Commands::Find { pattern } => cmd_find(&db, &pattern),
        Commands::Info { metric } => cmd_info(&db, &metric),
        Commands::Prune { metric } => cmd_prune(&db, &metric),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        let mut cause = e.source();
        while let Some(inner) = cause {
            eprintln!("  caused by: {inner}");
            cause = inner.source();
        }
        std::process::exit(1);
    }
}

fn open_database(cli: &Cli) -> Result<Database, Box<dyn Error>> {
    let mut settings = match &cli.config {
        Some(path) => DatabaseSettings::from_json_file(path)?,
        None => DatabaseSettings::new(&cli.data_dir, "graphite", "localhost"),
    };
    if let Some(behavior) = cli.caching {
        settings.default_slice_caching_behavior = behavior.to_string();
    }
    Ok(Database::open(settings)?)
}

/// Implements `slicetree init`.
fn cmd_init(db: &Database) -> CliResult {
    let layout = db.tree().layout();
    let settings = db.settings();

    println!("Data dir: {}", settings.local_data_dir.display());
    println!("Keyspace: {}", layout.keyspace());
    if let Some(definition) = db.tree().client().describe_keyspace()? {
        println!("Replication: {}", definition.replication);
    }
    println!("Datacenter: {}", layout.datacenter());
    println!("Tables:");
    for table in layout.tables() {
        println!("  - {table}");
    }
    Ok(())
}

/// Implements `slicetree create <metric>`.
fn cmd_create(
    db: &Database,
    metric: &str,
    retentions: Vec<Retention>,
    xff: f64,
    aggregation: &str,
) -> CliResult {
    db.create(metric, CreateOptions::new(retentions, xff, aggregation))?;
    println!("Created {metric}");
    Ok(())
}

/// Implements `slicetree write <metric> <ts:value>...`.
fn cmd_write(db: &Database, metric: &str, datapoints: &[(u64, f64)]) -> CliResult {
    db.write(metric, datapoints)?;
    println!("Wrote {} datapoints to {metric}", datapoints.len());
    Ok(())
}

/// Implements `slicetree exists <metric>`.
fn cmd_exists(db: &Database, metric: &str) -> CliResult {
    if db.exists(metric)? {
        println!("{metric} exists");
        Ok(())
    } else {
        Err(format!("{metric} does not exist").into())
    }
}

/// Implements `slicetree fetch <metric>`.
fn cmd_fetch(
    db: &Database,
    metric: &str,
    range: &str,
    from: Option<u64>,
    until: Option<u64>,
    format: &OutputFormat,
) -> CliResult {
    let now = now_secs()?;
    let until = until.unwrap_or(now);
    let from = match from {
        Some(from) => from,
        None => until.saturating_sub(parse_duration(range)?),
    };

    let data = db.fetch(metric, from, until, now)?;

    match format {
        OutputFormat::Csv => {
            println!(
                "# metric={metric}, step={}, points={}, known={}",
                data.step,
                data.values.len(),
                data.known()
            );
            println!("timestamp,value");
            for (ts, value) in data.points() {
                match value {
                    Some(value) => println!("{ts},{value}"),
                    None => println!("{ts},"),
                }
            }
        }
        OutputFormat::Json => {
            let json_data: Vec<serde_json::Value> = data
                .points()
                .map(|(ts, value)| {
                    serde_json::json!({
                        "timestamp": ts,
                        "value": value,
                    })
                })
                .collect();

            let output = serde_json::json!({
                "metric": metric,
                "from": data.from,
                "until": data.until,
                "step": data.step,
                "data": json_data,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `slicetree meta get <metric> <key>`.
fn cmd_meta_get(db: &Database, metric: &str, key: &str) -> CliResult {
    let value = db.get_metadata(metric, key)?;
    println!("{value}");
    Ok(())
}

/// Implements `slicetree meta set <metric> <key> <value>`.
fn cmd_meta_set(db: &Database, metric: &str, key: &str, raw: &str) -> CliResult {
    let value = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    db.set_metadata(metric, key, value)?;
    println!("Set {key} on {metric}");
    Ok(())
}

/// Implements `slicetree find <pattern>`.
fn cmd_find(db: &Database, pattern: &str) -> CliResult {
    for entry in db.find(pattern)? {
        let kind = if entry.is_leaf { "metric" } else { "branch" };
        println!("{kind}\t{}", entry.path);
    }
    Ok(())
}

/// Implements `slicetree info <metric>`.
fn cmd_info(db: &Database, metric: &str) -> CliResult {
    let node = db.tree().get_node(metric)?;
    let definition = node.definition();

    println!("Metric: {}", node.path());
    println!("Time step: {}", format_duration_secs(definition.time_step));
    println!("xFilesFactor: {}", definition.x_files_factor);
    println!("Aggregation: {}", definition.aggregation_method);
    println!("Archives: {}", definition.retentions.len());

    for retention in &definition.retentions {
        let slices = node.slices(retention.step)?;
        println!(
            "  {}/{}: {} slices",
            format_duration_secs(retention.step),
            format_duration_secs(retention.step.saturating_mul(retention.count)),
            slices.len()
        );
        for slice in &slices {
            println!(
                "    [{}, {}) {} points",
                slice.start,
                slice.end,
                slice.len()
            );
        }
    }

    let metadata = node.read_metadata()?;
    let extra: Vec<_> = metadata
        .iter()
        .filter(|(key, _)| {
            !matches!(
                key.as_str(),
                "timeStep" | "retentions" | "xFilesFactor" | "aggregationMethod"
            )
        })
        .collect();
    if !extra.is_empty() {
        println!("Metadata:");
        for (key, value) in extra {
            println!("  {key} = {value}");
        }
    }

    println!("Cached slices: {}", db.tree().cached_slices());
    Ok(())
}

/// Implements `slicetree prune <metric>`.
fn cmd_prune(db: &Database, metric: &str) -> CliResult {
    let removed = db.tree().apply_retention(metric, now_secs()?)?;
    println!("Removed {removed} slices from {metric}");
    Ok(())
}

fn now_secs() -> Result<u64, Box<dyn Error>> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Parses `STEP:COUNT` into a retention.
fn parse_retention(s: &str) -> Result<Retention, String> {
    let (step, count) = s
        .split_once(':')
        .ok_or_else(|| format!("expected STEP:COUNT, got '{s}'"))?;
    let step = step.trim().parse().map_err(|e| format!("invalid step '{step}': {e}"))?;
    let count = count
        .trim()
        .parse()
        .map_err(|e| format!("invalid count '{count}': {e}"))?;
    Ok(Retention::new(step, count))
}

/// Parses `TIMESTAMP:VALUE` into a datapoint.
fn parse_datapoint(s: &str) -> Result<(u64, f64), String> {
    let (ts, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected TIMESTAMP:VALUE, got '{s}'"))?;
    let ts = ts.trim().parse().map_err(|e| format!("invalid timestamp '{ts}': {e}"))?;
    let value = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value '{value}': {e}"))?;
    Ok((ts, value))
}

/// Parses a human-readable duration string (e.g., "1h", "30m", "7d") to seconds.
fn parse_duration(s: &str) -> Result<u64, Box<dyn Error>> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".into());
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str.parse()?;

    let secs = match unit {
        "s" => num,
        "m" => num * 60,
        "h" => num * 3600,
        "d" => num * 86400,
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use s, m, h, or d.").into()),
    };

    Ok(secs)
}

/// Formats seconds as a human-readable duration.
fn format_duration_secs(secs: u64) -> String {
    if secs >= 86400 && secs.is_multiple_of(86400) {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retention() {
        assert_eq!(parse_retention("60:1440").unwrap(), Retention::new(60, 1440));
        assert!(parse_retention("60").is_err());
        assert!(parse_retention("60:x").is_err());
    }

    #[test]
    fn test_parse_datapoint() {
        assert_eq!(parse_datapoint("1700000000:1.5").unwrap(), (1_700_000_000, 1.5));
        assert!(parse_datapoint("1700000000").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), 90);
        assert_eq!(parse_duration("2h").unwrap(), 7200);
        assert!(parse_duration("3w").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_format_duration_secs() {
        assert_eq!(format_duration_secs(60), "1m");
        assert_eq!(format_duration_secs(86400), "1d");
        assert_eq!(format_duration_secs(90), "90s");
    }

    #[test]
    fn test_cli_parses_create() {
        let cli = Cli::try_parse_from([
            "slicetree",
            "create",
            "a.b",
            "--retention",
            "60:1440",
            "--retention",
            "300:2016",
            "--xff",
            "0",
        ])
        .unwrap();
        match cli.command {
            Commands::Create {
                retentions, xff, ..
            } => {
                assert_eq!(retentions.len(), 2);
                assert!(xff.abs() < f64::EPSILON);
            }
            _ => panic!("expected create"),
        }
    }
}
