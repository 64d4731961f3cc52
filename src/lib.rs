pub mod catalog;
pub mod changelog;
pub mod cli;
pub mod data;
pub mod diff;
pub mod filter;
pub mod io_utils;
pub mod merge;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod table;
pub mod tags;
pub mod validate;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    catalog::ConstraintSet,
    changelog::build_change_log,
    cli::{Cli, Commands, DiffArgs, LogArgs, PlanArgs, SnapshotPairArgs, TagsArgs, ValidateArgs},
    data::Value,
    diff::{ChangedCell, detect_changes},
    merge::{WritebackConfig, build_merge_sql, build_pending_insert_sql, build_pending_table_ddl, update_columns},
    snapshot::Snapshot,
    store::TableRef,
    tags::TagRegistry,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tabledit", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Diff(args) => handle_diff(&args),
        Commands::Validate(args) => handle_validate(&args),
        Commands::Plan(args) => handle_plan(&args),
        Commands::Log(args) => handle_log(&args),
        Commands::Tags(args) => handle_tags(&args),
    }
}

/// Loads the original and edited snapshots, tags the original, and conforms
/// the edited copy to the original's temporal typing.
fn load_pair(args: &SnapshotPairArgs) -> Result<(Snapshot, Snapshot, TagRegistry)> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let base_delimiter = io_utils::resolve_input_delimiter(&args.base, args.delimiter);
    let edited_delimiter = io_utils::resolve_input_delimiter(&args.edited, args.delimiter);

    let base = Snapshot::read_csv(&args.base, base_delimiter, encoding)
        .with_context(|| format!("Reading original snapshot {:?}", args.base))?;
    let (original, tags) = tags::annotate(base);

    let edited = Snapshot::read_csv(&args.edited, edited_delimiter, encoding)
        .with_context(|| format!("Reading edited snapshot {:?}", args.edited))?;
    let edited = tags.conform(edited);

    Ok((original, edited, tags))
}

fn detect_pair(args: &SnapshotPairArgs) -> Result<(Snapshot, Vec<ChangedCell>)> {
    let (original, edited, _) = load_pair(args)?;
    let cells = detect_changes(&edited, &original, &args.pk, args.lock_column.as_deref())?;
    Ok((original, cells))
}

fn render_cell(value: Option<&Value>) -> String {
    value.map(Value::as_display).unwrap_or_default()
}

fn render_key(key: &[(String, Option<Value>)]) -> String {
    key.iter()
        .map(|(column, value)| format!("{column}={}", render_cell(value.as_ref())))
        .collect::<Vec<_>>()
        .join(", ")
}

fn handle_diff(args: &DiffArgs) -> Result<()> {
    let (_, cells) = detect_pair(&args.snapshots)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&cells)?);
    } else if cells.is_empty() {
        println!("No changes detected.");
    } else {
        let headers = ["Row", "Key", "Column", "Old", "New"]
            .map(String::from)
            .to_vec();
        let rows = cells
            .iter()
            .map(|cell| {
                vec![
                    (cell.row + 1).to_string(),
                    render_key(&cell.key),
                    cell.column.clone(),
                    render_cell(cell.old.as_ref()),
                    render_cell(cell.new.as_ref()),
                ]
            })
            .collect::<Vec<_>>();
        table::print_table(&headers, &rows);
    }
    info!("Detected {} changed cell(s)", cells.len());
    Ok(())
}

fn handle_validate(args: &ValidateArgs) -> Result<()> {
    let (_, cells) = detect_pair(&args.snapshots)?;
    let constraints = ConstraintSet::load(&args.constraints)?;
    let violations = validate::validate_changes(&cells, &constraints.columns);
    if violations.is_empty() {
        println!(
            "OK: {} changed cell(s) pass {} declared constraint(s).",
            cells.len(),
            constraints.columns.len()
        );
        return Ok(());
    }
    println!("Validation failed. Please fix the following values:");
    for message in &violations {
        println!("- {message}");
    }
    Err(anyhow!("{} validation error(s)", violations.len()))
}

fn plan_config(args: &PlanArgs) -> Result<WritebackConfig> {
    let table = TableRef::parse(&args.table)?;
    let mut config = WritebackConfig::new(table, args.snapshots.pk.clone());
    if let Some(lock) = &args.snapshots.lock_column {
        config = config.with_lock_column(lock.clone());
    }
    if let Some(stage) = &args.stage_table {
        config.stage_table = stage.clone();
    }
    if let Some(pending) = &args.pending_table {
        config.pending_table = pending.clone();
    }
    if let Some(pending_stage) = &args.pending_stage_table {
        config.pending_stage_table = pending_stage.clone();
    }
    Ok(config)
}

fn handle_plan(args: &PlanArgs) -> Result<()> {
    let (original, cells) = detect_pair(&args.snapshots)?;
    if cells.is_empty() {
        println!("-- No changes detected; a save would not touch the store.");
        return Ok(());
    }
    let config = plan_config(args)?;
    let update_cols = update_columns(&config, &cells, &original);

    println!("-- Merge {} changed cell(s) into {}", cells.len(), config.table);
    println!("{};", build_merge_sql(&config, &update_cols));
    println!();
    println!("-- Ensure the pending-approval table exists");
    println!("{};", build_pending_table_ddl(&config));
    println!();
    println!("-- Queue one audit record per changed cell");
    println!("{};", build_pending_insert_sql(&config));
    Ok(())
}

fn handle_log(args: &LogArgs) -> Result<()> {
    let (_, cells) = detect_pair(&args.snapshots)?;
    let records = build_change_log(&cells);
    if args.json {
        let rendered = serde_json::to_string_pretty(&records)?;
        match &args.output {
            Some(path) if !io_utils::is_dash(path) => std::fs::write(path, rendered + "\n")
                .with_context(|| format!("Writing change log to {path:?}"))?,
            _ => println!("{rendered}"),
        }
    } else {
        let pk_store: Vec<String> = args
            .snapshots
            .pk
            .iter()
            .map(|c| data::store_column_name(c))
            .collect();
        let mut writer = io_utils::open_csv_writer(args.output.as_deref(), b',')?;
        let headers = pk_store
            .iter()
            .cloned()
            .chain(
                ["column_name", "old_value", "new_value", "changed_by", "approval_status"]
                    .map(String::from),
            )
            .collect::<Vec<_>>();
        writer.write_record(&headers)?;
        for record in &records {
            let mut row = pk_store
                .iter()
                .map(|pk| {
                    record
                        .key
                        .iter()
                        .find(|(column, _)| column == pk)
                        .map(|(_, value)| render_cell(value.as_ref()))
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>();
            row.push(record.column_name.clone());
            row.push(render_cell(record.old_value.as_ref()));
            row.push(render_cell(record.new_value.as_ref()));
            row.push(record.changed_by.clone().unwrap_or_default());
            row.push(record.approval_status.clone());
            writer.write_record(&row)?;
        }
        writer.flush()?;
    }
    info!("Wrote {} change record(s)", records.len());
    Ok(())
}

fn handle_tags(args: &TagsArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let snapshot = Snapshot::read_csv(&args.input, delimiter, encoding)
        .with_context(|| format!("Reading snapshot {:?}", args.input))?;
    let (snapshot, registry) = tags::annotate(snapshot);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&registry)?);
    } else {
        let headers = ["Column", "Type", "Min Date", "Max Date"]
            .map(String::from)
            .to_vec();
        let rows = snapshot
            .columns()
            .iter()
            .filter_map(|column| registry.get(column).map(|tag| (column, tag)))
            .map(|(column, tag)| {
                vec![
                    column.clone(),
                    tag.semantic.as_str().to_string(),
                    tag.min_date.map(|d| d.to_string()).unwrap_or_default(),
                    tag.max_date.map(|d| d.to_string()).unwrap_or_default(),
                ]
            })
            .collect::<Vec<_>>();
        table::print_table(&headers, &rows);
    }
    info!(
        "Tagged {} column(s) across {} row(s)",
        registry.len(),
        snapshot.row_count()
    );
    Ok(())
}
