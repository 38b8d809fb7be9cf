//! Schema Introspection Module
//!
//! Reads the object catalog of a live database into a [`SchemaSnapshot`]
//! and the server's roles into a [`RoleSet`]. Both sides of every diff
//! come from here, so sandbox and target are always described the same way.

use crate::error::AppError;
use crate::roles::{RoleRecord, RoleSet};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_postgres::Client;
use tracing::debug;

/// Complete schema snapshot at a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub database: String,
    pub captured_at: DateTime<Utc>,
    pub schemas: Vec<String>,
    pub sequences: Vec<Sequence>,
    pub tables: Vec<Table>,
    pub constraints: Vec<Constraint>,
    pub indexes: Vec<Index>,
    pub views: Vec<View>,
    pub privileges: Vec<Privilege>,
    pub checksum: String,
}

impl SchemaSnapshot {
    /// A snapshot of a freshly created database: only `public`
    pub fn empty(database: impl Into<String>) -> Self {
        let mut snapshot = Self {
            database: database.into(),
            captured_at: Utc::now(),
            schemas: vec!["public".to_string()],
            sequences: vec![],
            tables: vec![],
            constraints: vec![],
            indexes: vec![],
            views: vec![],
            privileges: vec![],
            checksum: String::new(),
        };
        snapshot.checksum = snapshot.compute_checksum();
        snapshot
    }

    /// SHA-256 over the catalog content. Database name and capture time
    /// are excluded, so identical schemas hash identically.
    pub fn compute_checksum(&self) -> String {
        let content = (
            &self.schemas,
            &self.sequences,
            &self.tables,
            &self.constraints,
            &self.indexes,
            &self.views,
            &self.privileges,
        );
        let bytes = serde_json::to_vec(&content).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sequence {
    pub schema: String,
    pub name: String,
    /// Table and column of the `serial` column that owns the sequence.
    /// The server drops owned sequences together with their owner.
    pub owned_by: Option<(String, String)>,
}

/// Table representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
}

/// Column representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    /// Full type as printed by `format_type`, modifiers included
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    pub ordinal_position: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Identity {
    Always,
    ByDefault,
}

impl Identity {
    fn from_catalog(code: &str) -> Option<Self> {
        match code {
            "a" => Some(Identity::Always),
            "d" => Some(Identity::ByDefault),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    Check,
    ForeignKey,
    Exclusion,
}

impl ConstraintKind {
    fn from_catalog(code: &str) -> Option<Self> {
        match code {
            "p" => Some(ConstraintKind::PrimaryKey),
            "u" => Some(ConstraintKind::Unique),
            "c" => Some(ConstraintKind::Check),
            "f" => Some(ConstraintKind::ForeignKey),
            "x" => Some(ConstraintKind::Exclusion),
            _ => None,
        }
    }
}

/// Table constraint, keyed by schema, table and name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Constraint {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub kind: ConstraintKind,
    /// Body as printed by `pg_get_constraintdef`
    pub definition: String,
}

/// Standalone index. Indexes backing a constraint are covered by the
/// constraint itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Index {
    pub schema: String,
    pub table: String,
    pub name: String,
    /// Full `CREATE INDEX` statement from `pg_get_indexdef`
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct View {
    pub schema: String,
    pub name: String,
    pub definition: String,
}

/// One privilege granted on a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Privilege {
    pub schema: String,
    pub table: String,
    pub grantee: String,
    pub privilege: String,
}

const USER_NAMESPACES: &str =
    "NOT IN ('pg_catalog', 'information_schema') AND {col} NOT LIKE 'pg\\_%'";

fn user_namespaces(column: &str) -> String {
    format!("{} {}", column, USER_NAMESPACES.replace("{col}", column))
}

/// Schema introspector for PostgreSQL
pub struct PostgresIntrospector;

impl PostgresIntrospector {
    /// Introspect the complete object catalog of the connected database
    pub async fn snapshot(client: &Client, database: &str) -> Result<SchemaSnapshot, AppError> {
        let mut snapshot = SchemaSnapshot::empty(database);

        snapshot.schemas = Self::get_schemas(client).await?;
        snapshot.sequences = Self::get_sequences(client).await?;
        snapshot.tables = Self::get_tables(client).await?;
        snapshot.constraints = Self::get_constraints(client).await?;
        snapshot.indexes = Self::get_indexes(client).await?;
        snapshot.views = Self::get_views(client).await?;
        snapshot.privileges = Self::get_privileges(client).await?;
        snapshot.captured_at = Utc::now();
        snapshot.checksum = snapshot.compute_checksum();

        debug!(
            database,
            tables = snapshot.tables.len(),
            constraints = snapshot.constraints.len(),
            indexes = snapshot.indexes.len(),
            views = snapshot.views.len(),
            checksum = %snapshot.checksum,
            "Introspected schema"
        );

        Ok(snapshot)
    }

    /// Server roles, excluding the built-in `pg_*` ones
    pub async fn roles(client: &Client) -> Result<RoleSet, AppError> {
        let query = r#"
            SELECT
                rolname,
                rolsuper,
                rolcreatedb,
                rolinherit,
                rolcanlogin,
                rolreplication,
                rolbypassrls,
                rolconnlimit,
                rolvaliduntil::date::text AS valid_until
            FROM pg_roles
            WHERE rolname NOT LIKE 'pg\_%'
            ORDER BY rolname
        "#;

        let rows = client.query(query, &[]).await?;

        let roles: RoleSet = rows
            .iter()
            .map(|row| {
                let mut role = RoleRecord::new(row.get::<_, String>("rolname"));
                role.superuser = row.get("rolsuper");
                role.createdb = row.get("rolcreatedb");
                role.inherit = row.get("rolinherit");
                role.login = row.get("rolcanlogin");
                role.replication = row.get("rolreplication");
                role.bypassrls = row.get("rolbypassrls");
                role.connection_limit = row.get("rolconnlimit");
                role.valid_until = row.get("valid_until");
                role
            })
            .collect();

        debug!(count = roles.len(), "Observed server roles");
        Ok(roles)
    }

    async fn get_schemas(client: &Client) -> Result<Vec<String>, AppError> {
        let query = format!(
            "SELECT nspname FROM pg_namespace WHERE {} ORDER BY nspname",
            user_namespaces("nspname")
        );

        let rows = client.query(query.as_str(), &[]).await?;
        Ok(rows.iter().map(|row| row.get("nspname")).collect())
    }

    /// Sequences, skipping those generated for identity columns.
    /// `serial` sequences are kept and carry their owning column.
    async fn get_sequences(client: &Client) -> Result<Vec<Sequence>, AppError> {
        let query = format!(
            r#"
            SELECT
                n.nspname AS schema_name,
                c.relname AS sequence_name,
                t.relname AS owner_table,
                a.attname AS owner_column
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_depend o ON o.objid = c.oid
                AND o.classid = 'pg_class'::regclass
                AND o.refclassid = 'pg_class'::regclass
                AND o.deptype = 'a'
            LEFT JOIN pg_class t ON t.oid = o.refobjid
            LEFT JOIN pg_attribute a ON a.attrelid = o.refobjid AND a.attnum = o.refobjsubid
            WHERE c.relkind = 'S'
              AND {}
              AND NOT EXISTS (
                  SELECT 1 FROM pg_depend d
                  WHERE d.objid = c.oid AND d.deptype = 'i'
              )
            ORDER BY n.nspname, c.relname
            "#,
            user_namespaces("n.nspname")
        );

        let rows = client.query(query.as_str(), &[]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let table: Option<String> = row.get("owner_table");
                let column: Option<String> = row.get("owner_column");
                Sequence {
                    schema: row.get("schema_name"),
                    name: row.get("sequence_name"),
                    owned_by: table.zip(column),
                }
            })
            .collect())
    }

    /// Get all tables with columns
    async fn get_tables(client: &Client) -> Result<Vec<Table>, AppError> {
        let table_query = format!(
            r#"
            SELECT n.nspname AS table_schema, c.relname AS table_name
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind IN ('r', 'p')
              AND NOT c.relispartition
              AND {}
            ORDER BY n.nspname, c.relname
            "#,
            user_namespaces("n.nspname")
        );

        let table_rows = client.query(table_query.as_str(), &[]).await?;

        let mut tables = Vec::new();

        for row in table_rows {
            let schema: String = row.get("table_schema");
            let name: String = row.get("table_name");

            let columns = Self::get_columns(client, &schema, &name).await?;

            tables.push(Table {
                schema,
                name,
                columns,
            });
        }

        Ok(tables)
    }

    /// Get columns for a table
    async fn get_columns(client: &Client, schema: &str, table: &str) -> Result<Vec<Column>, AppError> {
        let query = r#"
            SELECT
                a.attname AS column_name,
                format_type(a.atttypid, a.atttypmod) AS data_type,
                NOT a.attnotnull AS nullable,
                pg_get_expr(d.adbin, d.adrelid) AS column_default,
                a.attidentity::text AS identity,
                a.attnum::int4 AS ordinal_position
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
            WHERE n.nspname = $1
              AND c.relname = $2
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY a.attnum
        "#;

        let rows = client.query(query, &[&schema, &table]).await?;

        let columns = rows
            .iter()
            .map(|row| Column {
                name: row.get("column_name"),
                data_type: row.get("data_type"),
                nullable: row.get("nullable"),
                default_value: row.get("column_default"),
                identity: Identity::from_catalog(&row.get::<_, String>("identity")),
                ordinal_position: row.get("ordinal_position"),
            })
            .collect();

        Ok(columns)
    }

    async fn get_constraints(client: &Client) -> Result<Vec<Constraint>, AppError> {
        let query = format!(
            r#"
            SELECT
                n.nspname AS schema_name,
                c.relname AS table_name,
                con.conname AS constraint_name,
                con.contype::text AS kind,
                pg_get_constraintdef(con.oid) AS definition
            FROM pg_constraint con
            JOIN pg_class c ON c.oid = con.conrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE con.contype IN ('p', 'u', 'c', 'f', 'x')
              AND con.conislocal
              AND {}
            ORDER BY n.nspname, c.relname, con.conname
            "#,
            user_namespaces("n.nspname")
        );

        let rows = client.query(query.as_str(), &[]).await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let kind = ConstraintKind::from_catalog(&row.get::<_, String>("kind"))?;
                Some(Constraint {
                    schema: row.get("schema_name"),
                    table: row.get("table_name"),
                    name: row.get("constraint_name"),
                    kind,
                    definition: row.get("definition"),
                })
            })
            .collect())
    }

    /// Get all standalone indexes
    async fn get_indexes(client: &Client) -> Result<Vec<Index>, AppError> {
        let query = format!(
            r#"
            SELECT
                n.nspname AS schema_name,
                t.relname AS table_name,
                i.relname AS index_name,
                pg_get_indexdef(i.oid) AS definition
            FROM pg_index ix
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            WHERE t.relkind IN ('r', 'p', 'm')
              AND {}
              AND NOT EXISTS (
                  SELECT 1 FROM pg_constraint con
                  WHERE con.conindid = ix.indexrelid
                    AND con.contype IN ('p', 'u', 'x')
              )
            ORDER BY n.nspname, t.relname, i.relname
            "#,
            user_namespaces("n.nspname")
        );

        let rows = client.query(query.as_str(), &[]).await?;

        Ok(rows
            .iter()
            .map(|row| Index {
                schema: row.get("schema_name"),
                table: row.get("table_name"),
                name: row.get("index_name"),
                definition: row.get("definition"),
            })
            .collect())
    }

    async fn get_views(client: &Client) -> Result<Vec<View>, AppError> {
        let query = format!(
            r#"
            SELECT schemaname, viewname, definition
            FROM pg_views
            WHERE {}
            ORDER BY schemaname, viewname
            "#,
            user_namespaces("schemaname")
        );

        let rows = client.query(query.as_str(), &[]).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let definition: String = row.get("definition");
                View {
                    schema: row.get("schemaname"),
                    name: row.get("viewname"),
                    definition: definition.trim().trim_end_matches(';').trim_end().to_string(),
                }
            })
            .collect())
    }

    /// Table grants, excluding the owner's implicit privileges
    async fn get_privileges(client: &Client) -> Result<Vec<Privilege>, AppError> {
        let query = format!(
            r#"
            SELECT
                g.table_schema::text AS table_schema,
                g.table_name::text AS table_name,
                g.grantee::text AS grantee,
                g.privilege_type::text AS privilege_type
            FROM information_schema.table_privileges g
            JOIN pg_namespace n ON n.nspname = g.table_schema
            JOIN pg_class c ON c.relnamespace = n.oid AND c.relname = g.table_name
            WHERE {}
              AND g.grantee <> pg_get_userbyid(c.relowner)
            ORDER BY 1, 2, 3, 4
            "#,
            user_namespaces("g.table_schema")
        );

        let rows = client.query(query.as_str(), &[]).await?;

        Ok(rows
            .iter()
            .map(|row| Privilege {
                schema: row.get("table_schema"),
                table: row.get("table_name"),
                grantee: row.get("grantee"),
                privilege: row.get("privilege_type"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn films() -> Table {
        Table {
            schema: "public".to_string(),
            name: "films".to_string(),
            columns: vec![Column {
                name: "code".to_string(),
                data_type: "character(5)".to_string(),
                nullable: false,
                default_value: None,
                identity: None,
                ordinal_position: 1,
            }],
        }
    }

    #[test]
    fn test_checksum_consistency() {
        let mut a = SchemaSnapshot::empty("a");
        a.tables.push(films());
        let mut b = SchemaSnapshot::empty("b");
        b.tables.push(films());

        assert_eq!(a.compute_checksum(), b.compute_checksum());
    }

    #[test]
    fn test_checksum_tracks_content() {
        let empty = SchemaSnapshot::empty("app");
        let mut with_table = empty.clone();
        with_table.tables.push(films());

        assert_ne!(empty.checksum, with_table.compute_checksum());
    }

    #[test]
    fn test_catalog_codes() {
        assert_eq!(ConstraintKind::from_catalog("f"), Some(ConstraintKind::ForeignKey));
        assert_eq!(ConstraintKind::from_catalog("n"), None);
        assert_eq!(Identity::from_catalog("a"), Some(Identity::Always));
        assert_eq!(Identity::from_catalog(""), None);
    }

    #[test]
    fn test_user_namespace_filter() {
        assert_eq!(
            user_namespaces("n.nspname"),
            "n.nspname NOT IN ('pg_catalog', 'information_schema') AND n.nspname NOT LIKE 'pg\\_%'"
        );
    }
}
