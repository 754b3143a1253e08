// Postal History Catalog - CLI
//
// Usage:
//   postal-history init
//   postal-history export <dir>
//   postal-history import <dir> [--dry-run]
//   postal-history identity <facility-ref> [date|now]
//   postal-history jurisdiction <facility-ref> [date|now] [affiliation|as-of]
//   postal-history history <entity-kind> <id>

use anyhow::{anyhow, bail, Context, Result};
use log::error;
use rusqlite::Connection;
use std::env;
use std::path::Path;

use postal_history::config::AppConfig;
use postal_history::logging::init_logging;
use postal_history::temporal::parse_date_or_today;
use postal_history::{
    export_catalog, get_history_for_entity, import_catalog, setup_database, NamingMode,
    PostalFacility, SqliteStore, TemporalResolver, TemporalStore, VersionedKind,
};

const USAGE: &str = "Usage:
  postal-history init
  postal-history export <dir>
  postal-history import <dir> [--dry-run]
  postal-history identity <facility-ref> [date|now]
  postal-history jurisdiction <facility-ref> [date|now] [affiliation|as-of]
  postal-history history <entity-kind> <id>";

fn main() -> Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;
    let _logger = init_logging(&config.log_level, config.log_dir.as_deref())
        .context("Failed to start logging")?;

    let args: Vec<String> = env::args().skip(1).collect();
    let result = run(&config, &args);
    if let Err(e) = &result {
        error!("event=command_failed module=cli status=error error={:#}", e);
    }
    result
}

fn run(config: &AppConfig, args: &[String]) -> Result<()> {
    let command = args.first().map(String::as_str);
    let rest = args.get(1..).unwrap_or_default();

    match command {
        Some("init") => run_init(config),
        Some("export") => run_export(config, rest),
        Some("import") => run_import(config, rest),
        Some("identity") => run_identity(config, rest),
        Some("jurisdiction") => run_jurisdiction(config, rest),
        Some("history") => run_history(config, rest),
        Some("help") | Some("--help") | Some("-h") | None => {
            println!("{}", USAGE);
            Ok(())
        }
        Some(other) => bail!("Unknown command '{}'\n{}", other, USAGE),
    }
}

fn open_database(config: &AppConfig) -> Result<Connection> {
    let conn = Connection::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    setup_database(&conn).context("Failed to prepare schema")?;
    Ok(conn)
}

fn required<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing <{}>\n{}", name, USAGE))
}

fn find_facility(store: &SqliteStore<'_>, reference: &str) -> Result<PostalFacility> {
    store
        .facility_by_reference(reference)?
        .ok_or_else(|| anyhow!("No postal facility with reference code '{}'", reference))
}

// ============================================================================
// Commands
// ============================================================================

fn run_init(config: &AppConfig) -> Result<()> {
    println!("🗄️  Initializing catalog database");
    open_database(config)?;
    println!("✓ Schema ready in {} (WAL mode)", config.db_path.display());
    Ok(())
}

fn run_export(config: &AppConfig, args: &[String]) -> Result<()> {
    let dir = Path::new(required(args, 0, "dir")?);
    let conn = open_database(config)?;

    println!("📤 Exporting catalog to {}", dir.display());
    let summary = export_catalog(&conn, dir).context("Export failed")?;
    println!("{}", summary);
    println!("✓ Exported {} rows", summary.total());
    Ok(())
}

fn run_import(config: &AppConfig, args: &[String]) -> Result<()> {
    let dir = Path::new(required(args, 0, "dir")?);
    let dry_run = args.iter().skip(1).any(|a| a == "--dry-run");
    let conn = open_database(config)?;

    println!("📥 Importing catalog from {}", dir.display());
    let summary = import_catalog(&conn, dir, dry_run).context("Import failed, nothing was written")?;
    println!("{}", summary);
    if dry_run {
        println!("✓ Dry run: {} rows validated, nothing written", summary.total());
    } else {
        println!("✓ Imported {} rows", summary.total());
    }
    Ok(())
}

fn run_identity(config: &AppConfig, args: &[String]) -> Result<()> {
    let reference = required(args, 0, "facility-ref")?;
    let date = parse_date_or_today(args.get(1).map(String::as_str))?;

    let conn = open_database(config)?;
    let store = SqliteStore::new(&conn);
    let facility = find_facility(&store, reference)?;
    let resolver = TemporalResolver::new(&store);

    match resolver.facility_identity_at(facility.id, date)? {
        Some(identity) => {
            println!("✓ {} on {}: {}", facility.reference_code, date, identity);
            if let Some((lat, lon)) = identity.coordinates(&facility) {
                println!("  location: {:.5}, {:.5}", lat, lon);
            }
        }
        None => println!("✗ {} has no identity in force on {}", facility.reference_code, date),
    }

    println!("\n  Timeline:");
    for identity in resolver.facility_timeline(facility.id)? {
        println!("  - {}", identity);
    }
    Ok(())
}

fn run_jurisdiction(config: &AppConfig, args: &[String]) -> Result<()> {
    let reference = required(args, 0, "facility-ref")?;
    let date = parse_date_or_today(args.get(1).map(String::as_str))?;
    let mode = match args.get(2) {
        Some(raw) => NamingMode::parse(raw)
            .ok_or_else(|| anyhow!("Unknown naming mode '{}' (affiliation | as-of)", raw))?,
        None => NamingMode::AsOfTarget,
    };

    let conn = open_database(config)?;
    let store = SqliteStore::new(&conn);
    let facility = find_facility(&store, reference)?;
    let resolver = TemporalResolver::new(&store);

    let resolved = match resolver.facility_at(facility.id, date, mode)? {
        Some(resolved) => resolved,
        None => {
            println!("✗ {} has no identity in force on {}", facility.reference_code, date);
            return Ok(());
        }
    };

    println!("✓ {} on {}: {}", facility.reference_code, date, resolved.identity);
    match resolved.jurisdiction {
        Some(jurisdiction) => {
            let name = jurisdiction
                .unit_identity
                .as_ref()
                .map_or_else(|| "(unnamed at that date)".to_string(), |i| i.to_string());
            println!(
                "  governed by {} {} since {} [{}]",
                jurisdiction.unit.reference_code,
                name,
                jurisdiction.affiliation.interval.effective_from,
                jurisdiction.affiliation.affiliation_source
            );
            let groups = resolver.responsible_groups_at(resolved.identity.id, date)?;
            if groups.is_empty() {
                println!("  responsible groups: none");
            } else {
                let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
                println!("  responsible groups: {}", names.join(", "));
            }
        }
        None => println!("  no jurisdiction recorded on {}", date),
    }
    Ok(())
}

fn run_history(config: &AppConfig, args: &[String]) -> Result<()> {
    let raw_kind = required(args, 0, "entity-kind")?;
    let kind = VersionedKind::parse(raw_kind).ok_or_else(|| {
        let known: Vec<&str> = VersionedKind::ALL.iter().map(|k| k.as_str()).collect();
        anyhow!("Unknown entity kind '{}' (one of: {})", raw_kind, known.join(", "))
    })?;
    let raw_id = required(args, 1, "id")?;
    let id: i64 = raw_id
        .parse()
        .with_context(|| format!("Invalid id '{}'", raw_id))?;

    let conn = open_database(config)?;
    let events = get_history_for_entity(&conn, kind, id)?;

    if events.is_empty() {
        println!("✗ No history for {} {}", kind.as_str(), id);
        return Ok(());
    }

    println!("📜 History of {} {} ({} events)", kind.as_str(), id, events.len());
    for event in events {
        println!(
            "  {} {:<8} by user {}  {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.action.as_str(),
            event.actor,
            event.snapshot
        );
    }
    Ok(())
}
