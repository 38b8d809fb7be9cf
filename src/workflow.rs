//! Schema reconciliation workflow
//!
//! Brings a target database in line with a declared schema document:
//!
//! 1. Roles are split out of the document and reconciled server-wide.
//! 2. The rest of the document runs inside a sandbox.
//! 3. The sandbox is diffed against the target (or an empty stand-in when
//!    the target does not exist yet).
//! 4. The resulting migration is reported, held back when it is unsafe, or
//!    applied to the target.

use crate::config::SandboxConfig;
use crate::connection::{DatabaseServer, Session};
use crate::diff::DiffEngine;
use crate::error::{AppError, AppResult};
use crate::migration::{Materialized, Migration};
use crate::roles::{self, RoleSet};
use crate::sandbox::SandboxManager;
use crate::sql::format_statements;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Accept data-losing statements
    pub allow_unsafe: bool,
    /// Run the migration against the target
    pub apply: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No object-level statements were needed
    UpToDate,
    /// Statements were generated; `applied` when they also ran on the target
    Generated { sql: String, applied: bool },
    /// Unsafe statements were generated while unsafe was not allowed.
    /// Nothing ran on the target.
    GeneratedUnsafe { sql: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Role statements executed on the server, if any
    pub roles_sql: Option<String>,
    pub outcome: Outcome,
}

/// Apply declared roles that are missing or differ from what the server has.
///
/// Only roles named in `declared` are considered; other server roles are
/// never altered or dropped. Returns the statements that were run.
pub async fn reconcile_roles<S: Session>(session: &mut S, declared: &RoleSet) -> AppResult<Option<String>> {
    if declared.is_empty() {
        return Ok(None);
    }

    let observed = session.observe_roles().await?;
    let current = observed.restricted_to(declared);
    let changes = DiffEngine::role_changes(&current, declared);

    let mut migration = Migration::new(&changes);
    migration.set_safety(true);
    if migration.is_empty() {
        debug!(roles = declared.len(), "Roles already match");
        return Ok(None);
    }

    let sql = migration.sql();
    info!(statements = migration.len(), "👤 Applying roles...");
    migration.apply(session).await?;
    session.commit().await?;

    Ok(Some(sql))
}

pub struct Reconciler<D: DatabaseServer> {
    server: D,
    sandbox: SandboxConfig,
}

impl<D: DatabaseServer> Reconciler<D> {
    pub fn new(server: D, sandbox: SandboxConfig) -> Self {
        Self { server, sandbox }
    }

    fn sandboxes(&self) -> SandboxManager<'_, D> {
        SandboxManager::new(&self.server, &self.sandbox)
    }

    fn target(&self) -> String {
        self.server.target_database().to_string()
    }

    /// Diff the declared schema `sql` against the target
    pub async fn diff(&self, sql: &str, options: DiffOptions) -> AppResult<Reconciliation> {
        let document = roles::extract(sql);
        let target = self.target();

        let target_exists = self.server.database_exists(&target).await?;
        if !target_exists && options.apply {
            return Err(AppError::TargetMissing(target));
        }

        let sandboxes = self.sandboxes();
        sandboxes
            .scope(async |temp| {
                let roles_sql = reconcile_roles(&mut temp.session, &document.roles).await?;

                let outcome = if target_exists {
                    let mut current = self.server.open_session(&target).await?;
                    let result = self
                        .compare(&mut current, &mut temp.session, &document.remainder, options)
                        .await;
                    let closed = current.close().await;
                    let outcome = result?;
                    closed?;
                    outcome
                } else {
                    info!(database = %target, "Target does not exist, comparing against an empty database");
                    sandboxes
                        .scope(async |stand_in| {
                            self.compare(&mut stand_in.session, &mut temp.session, &document.remainder, options)
                                .await
                        })
                        .await?
                };

                Ok(Reconciliation { roles_sql, outcome })
            })
            .await
    }

    async fn compare(
        &self,
        current: &mut D::Session,
        declared: &mut D::Session,
        remainder: &str,
        options: DiffOptions,
    ) -> AppResult<Outcome> {
        if !remainder.trim().is_empty() {
            declared
                .execute(remainder)
                .await
                .map_err(|e| AppError::syntax(e.detail()))?;
            declared.commit().await?;
        }

        let from = current.observe_schema().await?;
        let to = declared.observe_schema().await?;
        debug!(from = %from.checksum, to = %to.checksum, "Comparing snapshots");

        let changes = DiffEngine::schema_changes(&from, &to);
        let mut migration = Migration::new(&changes);
        migration.set_safety(!options.allow_unsafe);

        if migration.is_empty() {
            info!(database = current.database(), "✅ Up to date");
            return Ok(Outcome::UpToDate);
        }

        match migration.materialize() {
            Materialized::RequiresUnsafe(statements) => {
                warn!(statements = statements.len(), "⚠️  Unsafe statements generated");
                Ok(Outcome::GeneratedUnsafe {
                    sql: format_statements(&statements),
                })
            }
            Materialized::Ready(statements) => {
                let sql = format_statements(&statements);
                if options.apply {
                    migration.apply(current).await?;
                }
                Ok(Outcome::Generated {
                    sql,
                    applied: options.apply,
                })
            }
        }
    }

    /// Statements that recreate the target's objects in an empty database
    pub async fn dump(&self) -> AppResult<String> {
        let target = self.target();
        if !self.server.database_exists(&target).await? {
            return Err(AppError::TargetMissing(target));
        }

        self.sandboxes()
            .scope(async |empty| {
                let mut current = self.server.open_session(&target).await?;
                let observed = current.observe_schema().await;
                let closed = current.close().await;
                let to = observed?;
                closed?;

                let from = empty.session.observe_schema().await?;
                let mut migration = Migration::new(&DiffEngine::schema_changes(&from, &to));
                migration.set_safety(false);
                info!(statements = migration.len(), "📋 Dumped schema");
                Ok(migration.sql())
            })
            .await
    }

    /// Run a raw statement file against the target and commit it
    pub async fn apply_statements(&self, sql: &str) -> AppResult<()> {
        let target = self.target();
        if !self.server.database_exists(&target).await? {
            return Err(AppError::TargetMissing(target));
        }

        let mut session = self.server.open_session(&target).await?;
        let executed = match session.execute(sql).await {
            Ok(()) => session.commit().await,
            Err(e) => Err(AppError::syntax(e.detail())),
        };
        let closed = session.close().await;
        executed?;
        closed?;

        info!(database = %target, "✅ Statements applied");
        Ok(())
    }
}
