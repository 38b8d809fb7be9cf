//! Command handlers
//!
//! Each handler validates its files before touching any database, runs the
//! workflow and prints the result. The returned value is the exit code for
//! a completed run; fatal conditions come back as [`AppError`].

use crate::config::Settings;
use crate::connection::{ConnectionParams, PostgresServer};
use crate::error::{exit, AppError, AppResult};
use crate::workflow::{DiffOptions, Outcome, Reconciler};
use colored::Colorize;
use std::fs;
use std::path::Path;
use tracing::info;

const BLANK_SCHEMA: &str = "";

fn read_file(path: &Path) -> AppResult<String> {
    if !path.is_file() {
        return Err(AppError::FileNotFound(path.to_path_buf()));
    }
    Ok(fs::read_to_string(path)?)
}

fn reconciler(db: &str, settings: &Settings) -> AppResult<Reconciler<PostgresServer>> {
    let params = ConnectionParams::from_connection_string(db)?;
    info!(target_db = %params.to_display_string(), "🔌 Using database");
    let server = PostgresServer::new(params, settings.admin_database.clone());
    Ok(Reconciler::new(server, settings.sandbox.clone()))
}

fn database_name(db: &str) -> String {
    ConnectionParams::from_connection_string(db)
        .map(|p| p.database)
        .unwrap_or_else(|_| db.to_string())
}

fn all_done(message: &str) {
    println!("{} {}", "All done! ✨".bold().green(), message);
}

/// Write a schema file: blank, or dumped from `db` when given
pub async fn init(db: Option<&str>, schema: &Path, overwrite: bool, settings: &Settings) -> AppResult<i32> {
    if schema.exists() && !overwrite {
        return Err(AppError::FileExists(schema.to_path_buf()));
    }

    let contents = match db {
        Some(db) => reconciler(db, settings)?.dump().await?,
        None => BLANK_SCHEMA.to_string(),
    };

    fs::write(schema, contents)?;
    all_done(&format!("Schema written to \"{}\".", schema.display()));
    Ok(exit::OK)
}

/// Diff a schema file against `db`, optionally applying the result
pub async fn diff(schema: &Path, db: &str, options: DiffOptions, settings: &Settings) -> AppResult<i32> {
    let sql = read_file(schema)?;
    let name = database_name(db);

    let reconciliation = reconciler(db, settings)?.diff(&sql, options).await?;

    if let Some(roles_sql) = &reconciliation.roles_sql {
        println!("{}", "Applying roles...".bold());
        print!("{}", roles_sql);
        println!();
    }

    match reconciliation.outcome {
        Outcome::UpToDate => {
            all_done(&format!("Database \"{}\" is up to date.", name));
            Ok(exit::OK)
        }
        Outcome::Generated { sql, applied } => {
            print!("{}", sql);
            if applied {
                println!();
                all_done(&format!("Database \"{}\" has been updated.", name));
            }
            Ok(exit::OK)
        }
        Outcome::GeneratedUnsafe { sql } => {
            print!("{}", sql);
            eprintln!();
            eprintln!("{}", "Careful: Unsafe statements generated.".bold().yellow());
            eprintln!("Run again with --unsafe");
            Ok(exit::USAGE)
        }
    }
}

/// Run a statement file against `db`
pub async fn apply(statements: &Path, db: &str, settings: &Settings) -> AppResult<i32> {
    let sql = read_file(statements)?;
    let name = database_name(db);

    reconciler(db, settings)?.apply_statements(&sql).await?;

    all_done(&format!("Database \"{}\" has been updated.", name));
    Ok(exit::OK)
}
