//! SchemaHQ - declarative PostgreSQL schema reconciliation
//!
//! Keep a database's schema in one SQL file. `diff` runs that file in a
//! throwaway sandbox database, compares the result with the live database
//! and prints (or applies) the statements that close the gap.
//!
//! Data-losing statements are held back unless `--unsafe` is given.

mod cli;
mod config;
mod connection;
mod diff;
mod error;
mod introspection;
mod migration;
mod roles;
mod sandbox;
mod sql;
#[cfg(test)]
mod testing;
mod workflow;

use crate::config::Settings;
use crate::error::{exit, AppError};
use crate::workflow::DiffOptions;
use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::{debug, error};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Declarative schema management for PostgreSQL.
#[derive(Parser)]
#[command(name = "schemahq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a schema file, blank or dumped from an existing database.
    Init {
        /// Database to dump the schema from.
        #[arg(long)]
        db: Option<String>,

        /// Schema file to write.
        #[arg(long, default_value = "schema.sql")]
        schema: PathBuf,

        /// Replace the schema file if it exists.
        #[arg(long)]
        overwrite: bool,
    },

    /// Compare a schema file with a database.
    Diff {
        /// Declared schema file.
        #[arg(long)]
        schema: PathBuf,

        /// Target database URI.
        #[arg(long, env = "DATABASE_URL")]
        db: String,

        /// Allow statements that can lose data.
        #[arg(long = "unsafe")]
        allow_unsafe: bool,

        /// Apply the generated statements to the target.
        #[arg(long)]
        apply: bool,
    },

    /// Run a statement file against a database.
    Apply {
        /// File of SQL statements.
        #[arg(long)]
        statements: PathBuf,

        /// Target database URI.
        #[arg(long, env = "DATABASE_URL")]
        db: String,
    },
}

/// Initialize tracing on stderr so stdout carries only SQL
fn init_tracing(default_filter: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("schemahq=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}

async fn run(command: Commands, settings: &Settings) -> error::AppResult<i32> {
    match command {
        Commands::Init { db, schema, overwrite } => cli::init(db.as_deref(), &schema, overwrite, settings).await,
        Commands::Diff {
            schema,
            db,
            allow_unsafe,
            apply,
        } => cli::diff(&schema, &db, DiffOptions { allow_unsafe, apply }, settings).await,
        Commands::Apply { statements, db } => cli::apply(&statements, &db, settings).await,
    }
}

/// Print a fatal error and pick the exit code for it
fn report(err: &AppError) -> i32 {
    if let AppError::Database(inner) = err {
        error!("Database error: {:?}", inner);
    }
    eprintln!("{} {}", "Error:".bold().red(), err);
    err.exit_code()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load().context("Failed to load configuration")?;
    init_tracing(&settings.log_filter, cli.verbose);
    debug!(?settings, "Configuration loaded");

    let code = match run(cli.command, &settings).await {
        Ok(code) => code,
        Err(e) => report(&e),
    };

    if code != exit::OK {
        std::process::exit(code);
    }
    Ok(())
}
