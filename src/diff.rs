//! Schema Diff Engine
//!
//! Compares two observed states and produces the ordered list of changes
//! that turns the first into the second. Every change knows its SQL, its
//! safety class and the phase it must run in.

use crate::introspection::{
    Column, Constraint, ConstraintKind, Identity, Index, Privilege, SchemaSnapshot, Sequence,
    Table, View,
};
use crate::roles::{Attribute, RoleRecord, RoleSet};
use crate::sql::{qualified, quote_ident, quote_literal};
use std::collections::{BTreeMap, BTreeSet};

/// A single DDL change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    CreateRole(RoleRecord),
    AlterRole(RoleRecord),
    DropRole(String),

    CreateSchema(String),
    DropSchema(String),

    CreateSequence(Sequence),
    DropSequence(Sequence),

    CreateTable(Table),
    DropTable { schema: String, name: String },

    AddColumn { schema: String, table: String, column: Column },
    DropColumn { schema: String, table: String, column: String },
    AlterColumnType { schema: String, table: String, column: String, data_type: String },
    SetNullable { schema: String, table: String, column: String, nullable: bool },
    SetDefault { schema: String, table: String, column: String, default: Option<String> },

    AddConstraint(Constraint),
    DropConstraint(Constraint),

    CreateIndex(Index),
    DropIndex(Index),

    CreateView(View),
    DropView(View),

    Grant(Privilege),
    Revoke(Privilege),
}

impl Change {
    /// False for changes that can lose data
    pub fn is_safe(&self) -> bool {
        !matches!(
            self,
            Change::DropRole(_)
                | Change::DropSchema(_)
                | Change::DropSequence(_)
                | Change::DropTable { .. }
                | Change::DropColumn { .. }
                | Change::AlterColumnType { .. }
        )
    }

    /// Execution order; lower phases run first
    pub fn phase(&self) -> u8 {
        match self {
            Change::CreateRole(_) | Change::AlterRole(_) => 0,
            Change::Revoke(_) => 10,
            Change::DropView(_) => 20,
            Change::DropConstraint(c) if c.kind == ConstraintKind::ForeignKey => 30,
            Change::DropConstraint(_) => 31,
            Change::DropIndex(_) => 35,
            Change::CreateSchema(_) => 40,
            Change::CreateSequence(_) => 45,
            Change::CreateTable(_) => 50,
            Change::AddColumn { .. } => 55,
            Change::AlterColumnType { .. }
            | Change::SetNullable { .. }
            | Change::SetDefault { .. } => 60,
            Change::DropColumn { .. } => 65,
            Change::DropTable { .. } => 70,
            Change::DropSequence(_) => 75,
            Change::AddConstraint(c) if c.kind == ConstraintKind::ForeignKey => 81,
            Change::AddConstraint(_) => 80,
            Change::CreateIndex(_) => 85,
            Change::CreateView(_) => 90,
            Change::Grant(_) => 95,
            Change::DropSchema(_) => 98,
            Change::DropRole(_) => 99,
        }
    }

    /// The statement text, without a terminating semicolon
    pub fn to_sql(&self) -> String {
        match self {
            Change::CreateRole(role) => {
                let mut sql = format!("CREATE ROLE {} WITH {}", quote_ident(&role.name), role_options(role));
                if let Some(until) = &role.valid_until {
                    sql.push_str(&format!(" VALID UNTIL {}", quote_literal(until)));
                }
                if let Some(password) = &role.password {
                    sql.push_str(&format!(" PASSWORD {}", quote_literal(password)));
                }
                sql
            }
            Change::AlterRole(role) => format!(
                "ALTER ROLE {} WITH {} VALID UNTIL {}",
                quote_ident(&role.name),
                role_options(role),
                quote_literal(role.valid_until.as_deref().unwrap_or("infinity"))
            ),
            Change::DropRole(name) => format!("DROP ROLE {}", quote_ident(name)),

            Change::CreateSchema(name) => format!("CREATE SCHEMA {}", quote_ident(name)),
            Change::DropSchema(name) => format!("DROP SCHEMA {}", quote_ident(name)),

            Change::CreateSequence(seq) => format!("CREATE SEQUENCE {}", qualified(&seq.schema, &seq.name)),
            Change::DropSequence(seq) => format!("DROP SEQUENCE {}", qualified(&seq.schema, &seq.name)),

            Change::CreateTable(table) => {
                let columns: Vec<String> = table
                    .columns
                    .iter()
                    .map(|c| format!("    {}", column_definition(c)))
                    .collect();
                if columns.is_empty() {
                    format!("CREATE TABLE {} ()", qualified(&table.schema, &table.name))
                } else {
                    format!(
                        "CREATE TABLE {} (\n{}\n)",
                        qualified(&table.schema, &table.name),
                        columns.join(",\n")
                    )
                }
            }
            Change::DropTable { schema, name } => format!("DROP TABLE {}", qualified(schema, name)),

            Change::AddColumn { schema, table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                qualified(schema, table),
                column_definition(column)
            ),
            Change::DropColumn { schema, table, column } => format!(
                "ALTER TABLE {} DROP COLUMN {}",
                qualified(schema, table),
                quote_ident(column)
            ),
            Change::AlterColumnType { schema, table, column, data_type } => format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                qualified(schema, table),
                quote_ident(column),
                data_type,
                quote_ident(column),
                data_type
            ),
            Change::SetNullable { schema, table, column, nullable } => format!(
                "ALTER TABLE {} ALTER COLUMN {} {}",
                qualified(schema, table),
                quote_ident(column),
                if *nullable { "DROP NOT NULL" } else { "SET NOT NULL" }
            ),
            Change::SetDefault { schema, table, column, default } => match default {
                Some(expr) => format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    qualified(schema, table),
                    quote_ident(column),
                    expr
                ),
                None => format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                    qualified(schema, table),
                    quote_ident(column)
                ),
            },

            Change::AddConstraint(c) => format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {}",
                qualified(&c.schema, &c.table),
                quote_ident(&c.name),
                c.definition
            ),
            Change::DropConstraint(c) => format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                qualified(&c.schema, &c.table),
                quote_ident(&c.name)
            ),

            Change::CreateIndex(index) => index.definition.clone(),
            Change::DropIndex(index) => format!("DROP INDEX {}", qualified(&index.schema, &index.name)),

            Change::CreateView(view) => format!(
                "CREATE OR REPLACE VIEW {} AS\n{}",
                qualified(&view.schema, &view.name),
                view.definition
            ),
            Change::DropView(view) => format!("DROP VIEW {}", qualified(&view.schema, &view.name)),

            Change::Grant(p) => format!(
                "GRANT {} ON TABLE {} TO {}",
                p.privilege,
                qualified(&p.schema, &p.table),
                grantee(&p.grantee)
            ),
            Change::Revoke(p) => format!(
                "REVOKE {} ON TABLE {} FROM {}",
                p.privilege,
                qualified(&p.schema, &p.table),
                grantee(&p.grantee)
            ),
        }
    }
}

fn role_options(role: &RoleRecord) -> String {
    let mut options: Vec<String> = Attribute::ALL
        .iter()
        .map(|attr| role.token(*attr).to_string())
        .collect();
    options.push(format!("CONNECTION LIMIT {}", role.connection_limit));
    options.join(" ")
}

fn column_definition(column: &Column) -> String {
    let mut def = format!("{} {}", quote_ident(&column.name), column.data_type);
    match column.identity {
        Some(Identity::Always) => def.push_str(" GENERATED ALWAYS AS IDENTITY"),
        Some(Identity::ByDefault) => def.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
        None => {}
    }
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if column.identity.is_none() {
        if let Some(default) = &column.default_value {
            def.push_str(&format!(" DEFAULT {}", default));
        }
    }
    def
}

fn grantee(name: &str) -> String {
    if name == "PUBLIC" {
        name.to_string()
    } else {
        quote_ident(name)
    }
}

/// The diff engine that compares observed states
pub struct DiffEngine;

impl DiffEngine {
    /// Role changes turning `current` into `declared`.
    ///
    /// `current` is expected to be already restricted to declared names, so
    /// in practice only creations and alterations come out of here.
    pub fn role_changes(current: &RoleSet, declared: &RoleSet) -> Vec<Change> {
        let mut changes = Vec::new();

        for role in declared.iter() {
            match current.get(&role.name) {
                None => changes.push(Change::CreateRole(role.clone())),
                Some(existing) if !existing.same_attributes(role) => {
                    changes.push(Change::AlterRole(role.clone()))
                }
                Some(_) => {}
            }
        }

        for role in current.iter() {
            if !declared.contains(&role.name) {
                changes.push(Change::DropRole(role.name.clone()));
            }
        }

        changes
    }

    /// Object changes turning `from` into `to`, sorted into execution order
    pub fn schema_changes(from: &SchemaSnapshot, to: &SchemaSnapshot) -> Vec<Change> {
        let mut changes = Vec::new();

        Self::diff_schemas(&from.schemas, &to.schemas, &mut changes);
        let dropped_tables = Self::diff_tables(&from.tables, &to.tables, &mut changes);
        Self::diff_sequences(&from.sequences, &to.sequences, &dropped_tables, &mut changes);
        Self::diff_constraints(&from.constraints, &to.constraints, &dropped_tables, &mut changes);
        Self::diff_indexes(&from.indexes, &to.indexes, &dropped_tables, &mut changes);
        Self::diff_views(&from.views, &to.views, &mut changes);
        Self::diff_privileges(&from.privileges, &to.privileges, &dropped_tables, &mut changes);

        changes.sort_by_key(Change::phase);
        changes
    }

    fn diff_schemas(from: &[String], to: &[String], changes: &mut Vec<Change>) {
        let from_set: BTreeSet<&String> = from.iter().collect();
        let to_set: BTreeSet<&String> = to.iter().collect();

        for name in to_set.difference(&from_set) {
            changes.push(Change::CreateSchema((*name).clone()));
        }
        for name in from_set.difference(&to_set) {
            changes.push(Change::DropSchema((*name).clone()));
        }
    }

    /// Sequences owned by a dropped table or column are left to the server
    fn diff_sequences(
        from: &[Sequence],
        to: &[Sequence],
        dropped_tables: &BTreeSet<(String, String)>,
        changes: &mut Vec<Change>,
    ) {
        let dropped_columns: BTreeSet<(&str, &str, &str)> = changes
            .iter()
            .filter_map(|c| match c {
                Change::DropColumn { schema, table, column } => {
                    Some((schema.as_str(), table.as_str(), column.as_str()))
                }
                _ => None,
            })
            .collect();

        let key = |s: &Sequence| (s.schema.clone(), s.name.clone());
        let from_keys: BTreeSet<(String, String)> = from.iter().map(key).collect();
        let to_keys: BTreeSet<(String, String)> = to.iter().map(key).collect();

        let mut found = Vec::new();
        for seq in to.iter().filter(|s| !from_keys.contains(&key(*s))) {
            found.push(Change::CreateSequence(seq.clone()));
        }
        for seq in from.iter().filter(|s| !to_keys.contains(&key(*s))) {
            let owner_dropped = seq.owned_by.as_ref().is_some_and(|(table, column)| {
                dropped_tables.contains(&(seq.schema.clone(), table.clone()))
                    || dropped_columns.contains(&(seq.schema.as_str(), table.as_str(), column.as_str()))
            });
            if !owner_dropped {
                found.push(Change::DropSequence(seq.clone()));
            }
        }
        changes.extend(found);
    }

    /// Returns the keys of dropped tables; their dependents go with them
    fn diff_tables(from: &[Table], to: &[Table], changes: &mut Vec<Change>) -> BTreeSet<(String, String)> {
        let from_map: BTreeMap<(&str, &str), &Table> = from
            .iter()
            .map(|t| ((t.schema.as_str(), t.name.as_str()), t))
            .collect();
        let to_map: BTreeMap<(&str, &str), &Table> = to
            .iter()
            .map(|t| ((t.schema.as_str(), t.name.as_str()), t))
            .collect();

        let mut dropped = BTreeSet::new();

        for (key, table) in &to_map {
            match from_map.get(key) {
                None => changes.push(Change::CreateTable((*table).clone())),
                Some(existing) => Self::diff_columns(existing, table, changes),
            }
        }

        for (key, table) in &from_map {
            if !to_map.contains_key(key) {
                dropped.insert((table.schema.clone(), table.name.clone()));
                changes.push(Change::DropTable {
                    schema: table.schema.clone(),
                    name: table.name.clone(),
                });
            }
        }

        dropped
    }

    fn diff_columns(from_table: &Table, to_table: &Table, changes: &mut Vec<Change>) {
        let schema = &to_table.schema;
        let table = &to_table.name;

        let from_cols: BTreeMap<&str, &Column> = from_table
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c))
            .collect();
        let to_names: BTreeSet<&str> = to_table.columns.iter().map(|c| c.name.as_str()).collect();

        // Added columns keep their declared order
        for to_col in &to_table.columns {
            let Some(from_col) = from_cols.get(to_col.name.as_str()) else {
                changes.push(Change::AddColumn {
                    schema: schema.clone(),
                    table: table.clone(),
                    column: to_col.clone(),
                });
                continue;
            };

            if from_col.data_type != to_col.data_type {
                changes.push(Change::AlterColumnType {
                    schema: schema.clone(),
                    table: table.clone(),
                    column: to_col.name.clone(),
                    data_type: to_col.data_type.clone(),
                });
            }

            if from_col.nullable != to_col.nullable {
                changes.push(Change::SetNullable {
                    schema: schema.clone(),
                    table: table.clone(),
                    column: to_col.name.clone(),
                    nullable: to_col.nullable,
                });
            }

            if from_col.default_value != to_col.default_value && to_col.identity.is_none() {
                changes.push(Change::SetDefault {
                    schema: schema.clone(),
                    table: table.clone(),
                    column: to_col.name.clone(),
                    default: to_col.default_value.clone(),
                });
            }
        }

        for from_col in &from_table.columns {
            if !to_names.contains(from_col.name.as_str()) {
                changes.push(Change::DropColumn {
                    schema: schema.clone(),
                    table: table.clone(),
                    column: from_col.name.clone(),
                });
            }
        }
    }

    fn diff_constraints(
        from: &[Constraint],
        to: &[Constraint],
        dropped_tables: &BTreeSet<(String, String)>,
        changes: &mut Vec<Change>,
    ) {
        let key = |c: &Constraint| (c.schema.clone(), c.table.clone(), c.name.clone());
        let from_map: BTreeMap<_, &Constraint> = from.iter().map(|c| (key(c), c)).collect();
        let to_map: BTreeMap<_, &Constraint> = to.iter().map(|c| (key(c), c)).collect();

        for (k, constraint) in &from_map {
            let modified = match to_map.get(k) {
                None => true,
                Some(target) => target.definition != constraint.definition,
            };
            let table_dropped = dropped_tables.contains(&(k.0.clone(), k.1.clone()));
            if modified && !table_dropped {
                changes.push(Change::DropConstraint((*constraint).clone()));
            }
        }

        for (k, constraint) in &to_map {
            let needed = match from_map.get(k) {
                None => true,
                Some(existing) => existing.definition != constraint.definition,
            };
            if needed {
                changes.push(Change::AddConstraint((*constraint).clone()));
            }
        }
    }

    fn diff_indexes(
        from: &[Index],
        to: &[Index],
        dropped_tables: &BTreeSet<(String, String)>,
        changes: &mut Vec<Change>,
    ) {
        let from_map: BTreeMap<(&str, &str), &Index> = from
            .iter()
            .map(|i| ((i.schema.as_str(), i.name.as_str()), i))
            .collect();
        let to_map: BTreeMap<(&str, &str), &Index> = to
            .iter()
            .map(|i| ((i.schema.as_str(), i.name.as_str()), i))
            .collect();

        for (key, index) in &from_map {
            let modified = to_map.get(key).is_none_or(|t| t.definition != index.definition);
            let table_dropped = dropped_tables.contains(&(index.schema.clone(), index.table.clone()));
            if modified && !table_dropped {
                changes.push(Change::DropIndex((*index).clone()));
            }
        }

        for (key, index) in &to_map {
            if from_map.get(key).is_none_or(|f| f.definition != index.definition) {
                changes.push(Change::CreateIndex((*index).clone()));
            }
        }
    }

    fn diff_views(from: &[View], to: &[View], changes: &mut Vec<Change>) {
        let from_map: BTreeMap<(&str, &str), &View> = from
            .iter()
            .map(|v| ((v.schema.as_str(), v.name.as_str()), v))
            .collect();
        let to_map: BTreeMap<(&str, &str), &View> = to
            .iter()
            .map(|v| ((v.schema.as_str(), v.name.as_str()), v))
            .collect();

        for (key, view) in &from_map {
            match to_map.get(key) {
                None => changes.push(Change::DropView((*view).clone())),
                // Redefined views are dropped first: OR REPLACE cannot change columns
                Some(target) if target.definition != view.definition => {
                    changes.push(Change::DropView((*view).clone()))
                }
                Some(_) => {}
            }
        }

        for (key, view) in &to_map {
            if from_map.get(key).is_none_or(|f| f.definition != view.definition) {
                changes.push(Change::CreateView((*view).clone()));
            }
        }
    }

    fn diff_privileges(
        from: &[Privilege],
        to: &[Privilege],
        dropped_tables: &BTreeSet<(String, String)>,
        changes: &mut Vec<Change>,
    ) {
        for privilege in to.iter().filter(|p| !from.contains(p)) {
            changes.push(Change::Grant(privilege.clone()));
        }
        for privilege in from.iter().filter(|p| !to.contains(p)) {
            if !dropped_tables.contains(&(privilege.schema.clone(), privilege.table.clone())) {
                changes.push(Change::Revoke(privilege.clone()));
            }
        }
    }
}
