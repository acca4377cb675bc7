use clap::{Parser, Subcommand};
use scout_core::cache::cache_path;
use scout_core::status::{device_name, find_offline_marker, is_current, last_entry, staleness};
use scout_core::units::{
    format_fixed, round_bg_for_display, round_insulin_for_display, scale_mgdl, units_label,
};
use scout_core::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "scout")]
#[command(about = "Glucose telemetry merge and profile resolution", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a snapshot journal into the cached dataset
    Ingest {
        /// JSON Lines file of snapshots
        journal: PathBuf,

        /// Cycle time in epoch milliseconds (defaults to the current time)
        #[arg(long)]
        now: Option<i64>,

        /// Start from an empty dataset instead of the cache
        #[arg(long)]
        reset: bool,
    },

    /// Record one received snapshot: append it to the journal and apply it
    Record {
        /// JSON file holding a single snapshot document
        snapshot: PathBuf,

        /// Journal to append to (defaults to the data directory's journal)
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Cycle time in epoch milliseconds (defaults to the current time)
        #[arg(long)]
        now: Option<i64>,
    },

    /// Show resolved profile values at an instant
    Profile {
        /// Instant in epoch milliseconds (defaults to the current time)
        #[arg(long)]
        at: Option<i64>,

        /// Resolve against this named profile instead of the active one
        #[arg(long)]
        profile: Option<String>,
    },

    /// Append projected entries to a CSV file
    Export {
        csv: PathBuf,

        /// Re-project entries at this instant instead of the last cycle
        #[arg(long)]
        now: Option<i64>,
    },

    /// Print the recency-partitioned payload as JSON
    Split {
        #[arg(long)]
        now: Option<i64>,
    },

    /// Show data freshness and device status
    Status {
        #[arg(long)]
        now: Option<i64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    scout_core::logging::init(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let cache = cache_path(&data_dir);
    tracing::debug!("Using dataset cache {:?}", cache);

    match cli.command {
        Commands::Ingest {
            journal,
            now,
            reset,
        } => cmd_ingest(&cache, &journal, now.unwrap_or_else(current_mills), reset, &config),
        Commands::Record {
            snapshot,
            journal,
            now,
        } => {
            let journal = journal.unwrap_or_else(|| journal_path(&data_dir));
            cmd_record(&cache, &snapshot, &journal, now.unwrap_or_else(current_mills), &config)
        }
        Commands::Profile { at, profile } => {
            cmd_profile(&cache, at.unwrap_or_else(current_mills), profile.as_deref(), &config)
        }
        Commands::Export { csv, now } => cmd_export(&cache, &csv, now, &config),
        Commands::Split { now } => cmd_split(&cache, now.unwrap_or_else(current_mills), &config),
        Commands::Status { now } => cmd_status(&cache, now.unwrap_or_else(current_mills), &config),
    }
}

fn current_mills() -> Mills {
    chrono::Utc::now().timestamp_millis()
}

fn cmd_ingest(
    cache: &Path,
    journal: &Path,
    now: Mills,
    reset: bool,
    config: &Config,
) -> Result<()> {
    if !journal.exists() {
        return Err(Error::Snapshot(format!(
            "journal {} does not exist",
            journal.display()
        )));
    }

    let snapshots = read_snapshots(journal)?;
    let count = snapshots.len();

    let dataset = Dataset::update(cache, |dataset| {
        let start = if reset { Dataset::default() } else { dataset };
        Ok(snapshots
            .into_iter()
            .fold(start, |acc, snapshot| apply_snapshot(acc, snapshot, now, config)))
    })?;

    let summary = dataset.summary();
    println!("✓ Applied {} snapshots", count);
    println!("  sgvs: {}  mbgs: {}  cals: {}", summary.sgvs, summary.mbgs, summary.cals);
    println!(
        "  treatments: {}  (profile switches: {}, temp basals: {}, temp targets: {})",
        summary.treatments, summary.profile_switches, summary.temp_basals, summary.temporary_targets
    );
    println!("  device status: {}  food: {}", summary.devicestatus, summary.food);
    println!("  profiles: {}  entries: {}", summary.profiles, summary.entries);
    println!("  Cache: {}", cache.display());
    Ok(())
}

fn cmd_record(
    cache: &Path,
    snapshot_file: &Path,
    journal: &Path,
    now: Mills,
    config: &Config,
) -> Result<()> {
    let contents = std::fs::read_to_string(snapshot_file)?;
    let snapshot: Snapshot = serde_json::from_str(&contents).map_err(|e| {
        Error::Snapshot(format!("{} is not a snapshot: {}", snapshot_file.display(), e))
    })?;

    JsonlJournal::new(journal).append(&snapshot)?;

    let delta = snapshot.delta;
    let dataset =
        Dataset::update(cache, |dataset| Ok(apply_snapshot(dataset, snapshot, now, config)))?;

    let summary = dataset.summary();
    println!("✓ Recorded {} snapshot", if delta { "delta" } else { "full" });
    println!("  sgvs: {}  treatments: {}", summary.sgvs, summary.treatments);
    println!("  Journal: {}", journal.display());
    Ok(())
}

fn cmd_profile(cache: &Path, at: Mills, explicit: Option<&str>, config: &Config) -> Result<()> {
    let dataset = Dataset::load(cache)?;
    let mut resolver = dataset.profiles;
    resolver.set_fallback_timezone(config.display.timezone.clone());

    if !resolver.has_data() {
        println!("No profile data loaded.");
        return Ok(());
    }

    let name = resolver
        .resolve_named_profile(at, explicit)
        .unwrap_or_else(|| "unknown".into());
    println!("Profile: {}", name);
    if let Some(zone) = resolver.timezone(at, explicit) {
        println!("  timezone: {}", zone);
    }
    if explicit.is_none() {
        if let Some(ccp) = resolver.circadian_override_at(at) {
            println!("  override: {}% shifted {}h", ccp.percentage, ccp.timeshift);
        }
    }

    for field in ProfileField::ALL {
        match resolver.resolve_value(at, field, explicit) {
            Some(value) => println!("  {}: {}", field.key(), value),
            None => println!("  {}: unresolved", field.key()),
        }
    }

    if let Some(state) = resolver.temp_basal_at(at, explicit) {
        println!(
            "  tempbasal: {}  total: {}",
            format_fixed(state.tempbasal),
            round_insulin_for_display(state.totalbasal, config.display.rounding_style)
        );
    }

    if explicit.is_none() && resolver.profile_fields_missing(at) {
        println!("⚠ Profile is missing sensitivity or target values");
    }
    Ok(())
}

fn cmd_export(cache: &Path, csv: &Path, now: Option<Mills>, config: &Config) -> Result<()> {
    let dataset = Dataset::load(cache)?;
    let entries = match now {
        Some(now) => project_entries(
            &dataset.sgvs,
            &dataset.mbgs,
            now,
            config.display.history_hours,
            &config.display.theme,
            &config.thresholds,
        ),
        None => dataset.entries,
    };

    let count = append_entries_csv(&entries, csv, config.display.units)?;
    println!("✓ Exported {} entries", count);
    println!("  CSV: {}", csv.display());
    Ok(())
}

fn cmd_split(cache: &Path, now: Mills, config: &Config) -> Result<()> {
    let dataset = Dataset::load(cache)?;
    let payload = split_recent(
        &dataset,
        now,
        config.merge.recent_cutoff_ms,
        config.merge.recent_max_ms,
        config.merge.split_treatments,
    );
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn cmd_status(cache: &Path, now: Mills, config: &Config) -> Result<()> {
    let dataset = Dataset::load(cache)?;
    let units = config.display.units;

    match last_entry(&dataset.sgvs, now) {
        Some(last) => {
            let shown = round_bg_for_display(scale_mgdl(last.mgdl, units), units);
            let age_mins = (now - last.mills) / MS_PER_MINUTE;
            println!(
                "Last reading: {} {} ({} min ago{})",
                shown,
                units_label(units),
                age_mins,
                if is_current(last, now) { "" } else { ", not current" }
            );
        }
        None => println!("Last reading: none"),
    }

    let level = staleness(last_entry(&dataset.sgvs, now), now, &config.alarms);
    println!("Status: {}", serde_json::to_value(level)?.as_str().unwrap_or("unknown"));

    if find_offline_marker(&dataset.treatments, now).is_some() {
        println!("⚠ Closed loop reported offline");
    }

    let mut devices: Vec<String> = partition::recent_device_status(&dataset.devicestatus, now)
        .iter()
        .map(|s| device_name(s.device.as_deref()))
        .collect();
    devices.sort();
    devices.dedup();
    if !devices.is_empty() {
        println!("Devices: {}", devices.join(", "));
    }
    Ok(())
}
