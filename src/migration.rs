//! Migration assembly
//!
//! Wraps an ordered change list with a safety mode. With safety on, a
//! migration containing any data-losing statement refuses to materialize
//! and reports what it would have run instead.

use crate::connection::Session;
use crate::diff::Change;
use crate::error::{AppError, AppResult};
use crate::sql::format_statements;
use tracing::{debug, info, warn};

/// One generated statement and its safety class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub safe: bool,
}

impl From<&Change> for Statement {
    fn from(change: &Change) -> Self {
        Self {
            sql: change.to_sql(),
            safe: change.is_safe(),
        }
    }
}

/// Result of materializing a migration under its safety mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    /// Every statement may run
    Ready(Vec<String>),
    /// Safety is on and unsafe statements are present; carries the full list
    RequiresUnsafe(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Migration {
    statements: Vec<Statement>,
    safety: bool,
}

impl Migration {
    /// New migration with safety on
    pub fn new(changes: &[Change]) -> Self {
        Self {
            statements: changes.iter().map(Statement::from).collect(),
            safety: true,
        }
    }

    pub fn set_safety(&mut self, enabled: bool) {
        self.safety = enabled;
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn has_unsafe(&self) -> bool {
        self.statements.iter().any(|s| !s.safe)
    }

    pub fn materialize(&self) -> Materialized {
        let sql: Vec<String> = self.statements.iter().map(|s| s.sql.clone()).collect();
        if self.safety && self.has_unsafe() {
            Materialized::RequiresUnsafe(sql)
        } else {
            Materialized::Ready(sql)
        }
    }

    /// The complete script regardless of safety mode
    pub fn sql(&self) -> String {
        format_statements(
            &self
                .statements
                .iter()
                .map(|s| s.sql.as_str())
                .collect::<Vec<_>>(),
        )
    }

    /// Run every statement against `session`, committing after each one.
    ///
    /// Statements already committed stay applied when a later one fails.
    pub async fn apply<S: Session>(&self, session: &mut S) -> AppResult<usize> {
        if self.safety && self.has_unsafe() {
            return Err(AppError::UnsafeRefused);
        }

        for (i, statement) in self.statements.iter().enumerate() {
            debug!(database = session.database(), sql = %statement.sql, "Executing");

            let executed = match session.execute(&statement.sql).await {
                Ok(()) => session.commit().await,
                Err(e) => Err(e),
            };

            if let Err(e) = executed {
                warn!(applied = i, "Statement failed, rolling back");
                if let Err(rollback) = session.rollback().await {
                    warn!("Rollback failed: {}", rollback.detail());
                }
                return Err(AppError::ApplyFailed {
                    statement: statement.sql.clone(),
                    message: e.detail(),
                });
            }
        }

        info!(
            database = session.database(),
            statements = self.statements.len(),
            "Applied migration"
        );
        Ok(self.statements.len())
    }
}
