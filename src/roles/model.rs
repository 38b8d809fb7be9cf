//! Declared and observed PostgreSQL roles

use indexmap::IndexMap;

/// Boolean role attributes tracked by the reconciler.
///
/// `CREATEROLE` is accepted by the grammar but deliberately not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Superuser,
    CreateDb,
    Inherit,
    Login,
    Replication,
    BypassRls,
}

impl Attribute {
    pub const ALL: [Attribute; 6] = [
        Attribute::Superuser,
        Attribute::CreateDb,
        Attribute::Inherit,
        Attribute::Login,
        Attribute::Replication,
        Attribute::BypassRls,
    ];

    /// Positive keyword, e.g. `LOGIN`
    pub fn keyword(self) -> &'static str {
        match self {
            Attribute::Superuser => "SUPERUSER",
            Attribute::CreateDb => "CREATEDB",
            Attribute::Inherit => "INHERIT",
            Attribute::Login => "LOGIN",
            Attribute::Replication => "REPLICATION",
            Attribute::BypassRls => "BYPASSRLS",
        }
    }

    /// Negative keyword, e.g. `NOLOGIN`
    pub fn negated_keyword(self) -> &'static str {
        match self {
            Attribute::Superuser => "NOSUPERUSER",
            Attribute::CreateDb => "NOCREATEDB",
            Attribute::Inherit => "NOINHERIT",
            Attribute::Login => "NOLOGIN",
            Attribute::Replication => "NOREPLICATION",
            Attribute::BypassRls => "NOBYPASSRLS",
        }
    }

    /// Resolve a keyword (either form, any case) to its attribute and value
    pub fn from_keyword(word: &str) -> Option<(Attribute, bool)> {
        Self::ALL.into_iter().find_map(|attr| {
            if word.eq_ignore_ascii_case(attr.keyword()) {
                Some((attr, true))
            } else if word.eq_ignore_ascii_case(attr.negated_keyword()) {
                Some((attr, false))
            } else {
                None
            }
        })
    }
}

/// One PostgreSQL role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRecord {
    pub name: String,
    pub superuser: bool,
    pub createdb: bool,
    pub inherit: bool,
    pub login: bool,
    pub replication: bool,
    pub bypassrls: bool,
    /// `-1` means unlimited
    pub connection_limit: i32,
    pub valid_until: Option<String>,
    pub password: Option<String>,
}

impl RoleRecord {
    /// A role carrying PostgreSQL's defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superuser: false,
            createdb: false,
            inherit: true,
            login: false,
            replication: false,
            bypassrls: false,
            connection_limit: -1,
            valid_until: None,
            password: None,
        }
    }

    pub fn get(&self, attr: Attribute) -> bool {
        match attr {
            Attribute::Superuser => self.superuser,
            Attribute::CreateDb => self.createdb,
            Attribute::Inherit => self.inherit,
            Attribute::Login => self.login,
            Attribute::Replication => self.replication,
            Attribute::BypassRls => self.bypassrls,
        }
    }

    pub fn set(&mut self, attr: Attribute, enabled: bool) {
        let slot = match attr {
            Attribute::Superuser => &mut self.superuser,
            Attribute::CreateDb => &mut self.createdb,
            Attribute::Inherit => &mut self.inherit,
            Attribute::Login => &mut self.login,
            Attribute::Replication => &mut self.replication,
            Attribute::BypassRls => &mut self.bypassrls,
        };
        *slot = enabled;
    }

    /// Canonical token for an attribute: `LOGIN` or `NOLOGIN`, never both
    pub fn token(&self, attr: Attribute) -> &'static str {
        if self.get(attr) {
            attr.keyword()
        } else {
            attr.negated_keyword()
        }
    }

    /// Expiry date, `None` when the role never expires
    pub fn expiry(&self) -> Option<&str> {
        self.valid_until
            .as_deref()
            .filter(|until| !until.eq_ignore_ascii_case("infinity"))
    }

    /// True when every attribute the reconciler manages matches.
    /// Passwords are excluded: the server never reveals them.
    pub fn same_attributes(&self, other: &RoleRecord) -> bool {
        Attribute::ALL.iter().all(|a| self.get(*a) == other.get(*a))
            && self.connection_limit == other.connection_limit
            && self.expiry() == other.expiry()
    }
}

/// Roles keyed by name, ordered by first occurrence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet {
    roles: IndexMap<String, RoleRecord>,
}

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or fully replace a role; a replaced role keeps its position
    pub fn insert(&mut self, role: RoleRecord) {
        self.roles.insert(role.name.clone(), role);
    }

    pub fn get(&self, name: &str) -> Option<&RoleRecord> {
        self.roles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoleRecord> {
        self.roles.values()
    }

    /// New set holding only the roles whose names appear in `declared`
    pub fn restricted_to(&self, declared: &RoleSet) -> RoleSet {
        self.iter()
            .filter(|role| declared.contains(&role.name))
            .cloned()
            .collect()
    }
}

impl FromIterator<RoleRecord> for RoleSet {
    fn from_iter<I: IntoIterator<Item = RoleRecord>>(iter: I) -> Self {
        let mut set = RoleSet::new();
        for role in iter {
            set.insert(role);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let role = RoleRecord::new("admin");
        assert_eq!(role.token(Attribute::Superuser), "NOSUPERUSER");
        assert_eq!(role.token(Attribute::CreateDb), "NOCREATEDB");
        assert_eq!(role.token(Attribute::Inherit), "INHERIT");
        assert_eq!(role.token(Attribute::Login), "NOLOGIN");
        assert_eq!(role.token(Attribute::Replication), "NOREPLICATION");
        assert_eq!(role.token(Attribute::BypassRls), "NOBYPASSRLS");
        assert_eq!(role.connection_limit, -1);
        assert_eq!(role.valid_until, None);
        assert_eq!(role.password, None);
    }

    #[test]
    fn test_from_keyword() {
        assert_eq!(Attribute::from_keyword("login"), Some((Attribute::Login, true)));
        assert_eq!(Attribute::from_keyword("NOINHERIT"), Some((Attribute::Inherit, false)));
        assert_eq!(Attribute::from_keyword("CREATEROLE"), None);
    }

    #[test]
    fn test_replacement_keeps_position() {
        let mut set = RoleSet::new();
        set.insert(RoleRecord::new("a"));
        set.insert(RoleRecord::new("b"));

        let mut replaced = RoleRecord::new("a");
        replaced.login = true;
        set.insert(replaced);

        assert_eq!(set.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(set.get("a").unwrap().login);
    }

    #[test]
    fn test_restricted_to_leaves_source_untouched() {
        let observed: RoleSet = ["postgres", "app", "reporting"]
            .into_iter()
            .map(RoleRecord::new)
            .collect();
        let declared: RoleSet = ["app", "new_role"].into_iter().map(RoleRecord::new).collect();

        let restricted = observed.restricted_to(&declared);

        assert_eq!(restricted.names().collect::<Vec<_>>(), vec!["app"]);
        assert_eq!(observed.len(), 3);
    }

    #[test]
    fn test_same_attributes_ignores_password() {
        let mut a = RoleRecord::new("x");
        let mut b = RoleRecord::new("x");
        a.password = Some("secret".into());
        assert!(a.same_attributes(&b));

        b.connection_limit = 3;
        assert!(!a.same_attributes(&b));
    }
}
