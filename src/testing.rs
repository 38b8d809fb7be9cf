//! In-memory server for exercising the workflow without PostgreSQL

use crate::connection::{DatabaseServer, Session};
use crate::error::{AppError, AppResult};
use crate::introspection::SchemaSnapshot;
use crate::roles::{parser, RoleSet};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

#[derive(Debug)]
struct State {
    databases: BTreeSet<String>,
    created: Vec<String>,
    dropped: Vec<String>,
    /// (database, statement) in commit order
    committed: Vec<(String, String)>,
    roles: RoleSet,
    target_schema: SchemaSnapshot,
    /// What a sandbox looks like once the declared schema has run in it
    declared_schema: SchemaSnapshot,
    fail_on: Option<String>,
    fail_drop: bool,
    /// Databases with an open session, one entry per session
    open: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FakeServer {
    target: String,
    state: Rc<RefCell<State>>,
}

impl FakeServer {
    /// A server where `target` exists and is empty
    pub fn new(target: &str) -> Self {
        let state = State {
            databases: BTreeSet::from([target.to_string()]),
            created: vec![],
            dropped: vec![],
            committed: vec![],
            roles: RoleSet::new(),
            target_schema: SchemaSnapshot::empty(target),
            declared_schema: SchemaSnapshot::empty("sandbox"),
            fail_on: None,
            fail_drop: false,
            open: vec![],
        };
        Self {
            target: target.to_string(),
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn without_target(self) -> Self {
        self.state.borrow_mut().databases.remove(&self.target);
        self
    }

    pub fn with_target_schema(self, schema: SchemaSnapshot) -> Self {
        self.state.borrow_mut().target_schema = schema;
        self
    }

    pub fn with_declared_schema(self, schema: SchemaSnapshot) -> Self {
        self.state.borrow_mut().declared_schema = schema;
        self
    }

    pub fn with_roles(self, roles: RoleSet) -> Self {
        self.state.borrow_mut().roles = roles;
        self
    }

    /// Make any statement containing `needle` fail
    pub fn fail_on(&self, needle: &str) {
        self.state.borrow_mut().fail_on = Some(needle.to_string());
    }

    pub fn fail_drops(&self) {
        self.state.borrow_mut().fail_drop = true;
    }

    pub fn created(&self) -> Vec<String> {
        self.state.borrow().created.clone()
    }

    pub fn dropped(&self) -> Vec<String> {
        self.state.borrow().dropped.clone()
    }

    pub fn databases(&self) -> Vec<String> {
        self.state.borrow().databases.iter().cloned().collect()
    }

    pub fn open_sessions(&self) -> usize {
        self.state.borrow().open.len()
    }

    pub fn roles(&self) -> RoleSet {
        self.state.borrow().roles.clone()
    }

    pub fn committed_on(&self, database: &str) -> Vec<String> {
        self.state
            .borrow()
            .committed
            .iter()
            .filter(|(db, _)| db == database)
            .map(|(_, sql)| sql.clone())
            .collect()
    }
}

impl DatabaseServer for FakeServer {
    type Session = FakeSession;

    fn target_database(&self) -> &str {
        &self.target
    }

    async fn database_exists(&self, name: &str) -> AppResult<bool> {
        Ok(self.state.borrow().databases.contains(name))
    }

    async fn create_database(&self, name: &str) -> AppResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.databases.insert(name.to_string()) {
            return Err(AppError::Sandbox(format!("database \"{}\" already exists", name)));
        }
        state.created.push(name.to_string());
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> AppResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_drop {
            return Err(AppError::Sandbox(format!("could not drop \"{}\"", name)));
        }
        if state.open.iter().any(|db| db == name) {
            return Err(AppError::Sandbox(format!("\"{}\" is still in use", name)));
        }
        state.databases.remove(name);
        state.dropped.push(name.to_string());
        Ok(())
    }

    async fn open_session(&self, name: &str) -> AppResult<FakeSession> {
        let mut state = self.state.borrow_mut();
        if !state.databases.contains(name) {
            return Err(AppError::Sandbox(format!("database \"{}\" does not exist", name)));
        }
        state.open.push(name.to_string());
        Ok(FakeSession {
            database: name.to_string(),
            target: self.target.clone(),
            state: Rc::clone(&self.state),
            pending: vec![],
        })
    }
}

#[derive(Debug)]
pub struct FakeSession {
    database: String,
    target: String,
    state: Rc<RefCell<State>>,
    pending: Vec<String>,
}

fn is_role_statement(sql: &str) -> bool {
    sql.starts_with("CREATE ROLE") || sql.starts_with("ALTER ROLE")
}

impl Session for FakeSession {
    fn database(&self) -> &str {
        &self.database
    }

    async fn execute(&mut self, sql: &str) -> AppResult<()> {
        if let Some(needle) = &self.state.borrow().fail_on {
            if sql.contains(needle.as_str()) {
                return Err(AppError::syntax(format!("ERROR: syntax error at or near \"{}\"", needle)));
            }
        }
        self.pending.push(sql.to_string());
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        let mut state = self.state.borrow_mut();
        for sql in self.pending.drain(..) {
            if is_role_statement(&sql) {
                if let Some(role) = parser::parse_role(&sql.replacen("ALTER", "CREATE", 1)) {
                    state.roles.insert(role);
                }
            }
            state.committed.push((self.database.clone(), sql));
        }
        Ok(())
    }

    async fn rollback(&mut self) -> AppResult<()> {
        self.pending.clear();
        Ok(())
    }

    async fn close(mut self) -> AppResult<()> {
        self.rollback().await?;
        let mut state = self.state.borrow_mut();
        if let Some(pos) = state.open.iter().position(|db| db == &self.database) {
            state.open.remove(pos);
        }
        Ok(())
    }

    async fn observe_roles(&mut self) -> AppResult<RoleSet> {
        Ok(self.state.borrow().roles.clone())
    }

    async fn observe_schema(&mut self) -> AppResult<SchemaSnapshot> {
        let state = self.state.borrow();
        if self.database == self.target {
            return Ok(state.target_schema.clone());
        }
        let declared_ran = state
            .committed
            .iter()
            .any(|(db, sql)| db == &self.database && !is_role_statement(sql));
        if declared_ran {
            let mut snapshot = state.declared_schema.clone();
            snapshot.database = self.database.clone();
            Ok(snapshot)
        } else {
            Ok(SchemaSnapshot::empty(&self.database))
        }
    }
}
