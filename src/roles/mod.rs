//! Role extraction
//!
//! Splits a declared schema document into the roles it creates and the
//! remaining SQL. Roles are reconciled separately from object-level schema,
//! so `CREATE ROLE` statements never reach the sandbox verbatim.

pub mod lexer;
pub mod model;
pub mod parser;

pub use model::{Attribute, RoleRecord, RoleSet};

use tracing::debug;

const ROLE_PREFIX: &str = "CREATE ROLE";

/// A declared schema document split into roles and everything else
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDocument {
    pub roles: RoleSet,
    /// Non-role statements in input order, each followed by a newline
    pub remainder: String,
}

/// Separate `CREATE ROLE` statements from the rest of `raw`
pub fn extract(raw: &str) -> ParsedDocument {
    let mut document = ParsedDocument::default();

    for statement in lexer::split_statements(raw) {
        if statement.starts_with(ROLE_PREFIX) {
            match parser::parse_role(statement) {
                Some(role) => document.roles.insert(role),
                None => debug!(statement, "Skipping CREATE ROLE without a name"),
            }
        } else {
            document.remainder.push_str(statement);
            document.remainder.push('\n');
        }
    }

    debug!(
        roles = document.roles.len(),
        remainder_bytes = document.remainder.len(),
        "Extracted roles from schema"
    );

    document
}
