//! Sasmap CLI - scan a SAS corpus and query the dependency graph

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use sasmap::config::{self, MapperConfig};
use sasmap::output;
use sasmap::query::QueryEngine;
use sasmap::remote::LocalFs;
use sasmap::scan::Scanner;
use sasmap::storage::FactStore;

#[derive(Parser)]
#[command(name = "sasmap")]
#[command(version)]
#[command(about = "SAS program dependency mapper and impact analyzer")]
#[command(long_about = r#"
Sasmap extracts table operations, includes, macro calls and credential
findings from a corpus of SAS programs into a SQLite fact store, and
answers transitive impact queries over the resulting dependency graph.

Example usage:
  sasmap scan
  sasmap impact /sas/prod/load_customers.sas
  sasmap table LIS_DTALAB_WRKGRP_SPC_DB.DL_T1_ILS_ANALYTICS.orders
"#)]
struct Cli {
    /// Path to the configuration file (default: sasmap.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the corpus and refresh the fact store
    Scan {
        /// Full rescan, ignoring recorded modification times
        #[arg(long)]
        full: bool,
    },

    /// Show programs transitively affected by a change to a program
    Impact {
        /// Program path as stored in the database
        path: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show programs a program transitively depends on
    Upstream {
        /// Program path as stored in the database
        path: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show programs that read or create a table
    Table {
        /// Fully-qualified table name
        name: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show programs with hardcoded credential findings
    Credentials {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show statistics about the fact store
    Stats,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan { full } => {
            let db_path = PathBuf::from(&config.database);
            config::ensure_db_dir(&db_path)?;

            let mut store = FactStore::open(&db_path)?;
            let rules = config.rule_set()?;
            let mut scanner = Scanner::new(&mut store, &rules, config.scan_options());
            let mut fs = LocalFs::new();

            let stats = scanner.scan(&mut fs, full)?;
            println!("\n{}", "Scan complete".bold());
            println!("{}", output::scan_summary_table(&stats));
        }

        Commands::Impact { path, format } => {
            let store = open_store(&config)?;
            let engine = QueryEngine::new(&store);
            let rows = engine.downstream_impact(&path)?;

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No downstream impact found for {}", path);
            } else {
                println!("{} {}\n", "Downstream impact for".bold(), path);
                println!("{}", output::impact_table(&rows));
            }
        }

        Commands::Upstream { path, format } => {
            let store = open_store(&config)?;
            let engine = QueryEngine::new(&store);
            let rows = engine.upstream_dependencies(&path)?;

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No upstream dependencies found for {}", path);
            } else {
                println!("{} {}\n", "Upstream dependencies for".bold(), path);
                println!("{}", output::impact_table(&rows));
            }
        }

        Commands::Table { name, format } => {
            let store = open_store(&config)?;
            let engine = QueryEngine::new(&store);
            let rows = engine.table_impact(&name)?;

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No programs found for table {}", name);
            } else {
                println!("{} {}\n", "Programs using table".bold(), name);
                println!("{}", output::usage_table(&rows));
            }
        }

        Commands::Credentials { format } => {
            let store = open_store(&config)?;
            let engine = QueryEngine::new(&store);
            let rows = engine.credential_report()?;

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No hardcoded credentials found.");
            } else {
                println!("{}\n", "Programs with hardcoded credentials".bold());
                println!("{}", output::credential_table(&rows));
            }
        }

        Commands::Stats => {
            let store = open_store(&config)?;
            let stats = store.stats()?;
            println!("{} ({})\n", "Fact store statistics".bold(), config.database);
            println!("{}", output::stats_table(&stats));
        }
    }

    Ok(())
}

fn open_store(config: &MapperConfig) -> anyhow::Result<FactStore> {
    let db_path = Path::new(&config.database);
    if !db_path.exists() {
        anyhow::bail!(
            "database {} does not exist (run `sasmap scan` first)",
            config.database
        );
    }
    Ok(FactStore::open(db_path)?)
}
