//! pgforge - migration runner entry point.
//!
//! Applies, reverts and reports versioned SQL migrations against one
//! PostgreSQL database. Results go to stdout, logs to stderr.

use clap::Parser;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use pgforge::config::{Command, Config};
use pgforge::migrate::{MigrationRun, MigrationSource, Migrator, RollbackRun};
use pgforge::{DbError, PgAdapter};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn print_migrated(run: &MigrationRun) {
    let Some(batch) = run.batch else {
        println!("Nothing to migrate.");
        return;
    };
    let mut table = new_table(vec!["Migrated", "Batch"]);
    for name in &run.migrated {
        table.add_row(vec![name.clone(), batch.to_string()]);
    }
    println!("{table}");
}

fn print_rolled_back(run: &RollbackRun) {
    if run.rolled_back.is_empty() {
        println!("Nothing to roll back.");
        return;
    }
    let mut table = new_table(vec!["Rolled back"]);
    for name in &run.rolled_back {
        table.add_row(vec![name.clone()]);
    }
    println!("{table}");
}

async fn run(config: &Config, migrator: &Migrator) -> Result<(), DbError> {
    match &config.command {
        Command::Up => print_migrated(&migrator.up().await?),
        Command::Down { steps } => print_rolled_back(&migrator.down(*steps).await?),
        Command::Reset => print_rolled_back(&migrator.reset().await?),
        Command::Refresh => {
            let refreshed = migrator.refresh().await?;
            print_rolled_back(&refreshed.reset);
            print_migrated(&refreshed.migrated);
        }
        Command::Status => {
            let statuses = migrator.status().await?;
            if statuses.is_empty() {
                println!("No migrations found.");
                return Ok(());
            }
            let mut table = new_table(vec!["Migration", "Ran", "Batch"]);
            for status in statuses {
                table.add_row(vec![
                    status.name,
                    if status.ran { "yes" } else { "no" }.to_string(),
                    status.batch.map(|b| b.to_string()).unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let config = Config::parse();
    init_tracing(&config);

    let adapter_config = config.adapter_config()?;
    info!(
        url = %adapter_config.masked_url(),
        dir = %config.migrations_dir.display(),
        "Starting pgforge v{}",
        env!("CARGO_PKG_VERSION")
    );

    let source = MigrationSource::from_dir(&config.migrations_dir).await?;
    let adapter = match PgAdapter::connect(adapter_config).await {
        Ok(adapter) => adapter,
        Err(e) => {
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Hint: {suggestion}");
            }
            return Err(e.into());
        }
    };
    let migrator = Migrator::new(adapter.clone(), source).with_table(&config.migrations_table);

    let result = run(&config, &migrator).await;
    adapter.disconnect().await;

    if let Err(e) = result {
        error!(error = %e, "Migration command failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {suggestion}");
        }
        return Err(e.into());
    }
    Ok(())
}
