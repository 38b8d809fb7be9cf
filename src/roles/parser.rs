//! `CREATE ROLE` option parsing
//!
//! The tokens following the role name are turned into a stream of typed
//! [`OptionEvent`]s. Clauses that span several words (`PASSWORD x`,
//! `VALID UNTIL x`, `CONNECTION LIMIT n`) consume their trailing words so the
//! consumer only ever sees whole options.

use super::lexer::{words, Token};
use super::model::{Attribute, RoleRecord};
use std::slice::Iter;

/// A single recognised role option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionEvent {
    Flag(Attribute, bool),
    Password(Option<String>),
    ValidUntil(String),
    ConnectionLimit(i32),
}

/// Iterator over the options of one `CREATE ROLE` statement
pub struct OptionEvents<'a> {
    tokens: Iter<'a, Token>,
}

impl<'a> OptionEvents<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens: tokens.iter(),
        }
    }
}

impl Iterator for OptionEvents<'_> {
    type Item = OptionEvent;

    fn next(&mut self) -> Option<OptionEvent> {
        loop {
            let token = self.tokens.next()?;

            if token.is_keyword("PASSWORD") {
                let value = self.tokens.next().and_then(password_value);
                return Some(OptionEvent::Password(value));
            }

            // VALID UNTIL '<date>': the value sits two words after VALID
            if token.is_keyword("VALID") {
                let value = self.tokens.nth(1)?;
                return Some(OptionEvent::ValidUntil(value.text().to_string()));
            }

            // CONNECTION LIMIT <n>
            if token.is_keyword("CONNECTION") {
                let value = self.tokens.nth(1)?;
                match value.text().parse::<i32>() {
                    Ok(limit) => return Some(OptionEvent::ConnectionLimit(limit)),
                    Err(_) => continue,
                }
            }

            if let Token::Word(word) = token {
                if let Some((attr, enabled)) = Attribute::from_keyword(word) {
                    return Some(OptionEvent::Flag(attr, enabled));
                }
            }

            // WITH, ENCRYPTED, CREATEROLE, IN ROLE ... are not modelled
        }
    }
}

fn password_value(token: &Token) -> Option<String> {
    let text = token.text();
    let is_null = match token {
        Token::Word(w) => w.eq_ignore_ascii_case("NULL"),
        _ => text == "NULL",
    };
    if is_null || text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Parse one `CREATE ROLE` statement.
///
/// Returns `None` only when the statement carries no role name at all.
/// Unquoted names fold to lower case the way the server folds them.
pub fn parse_role(statement: &str) -> Option<RoleRecord> {
    let tokens = words(statement);

    // [CREATE] [ROLE] <name> <options...>
    let (name, options) = match tokens.get(2..) {
        Some([name, options @ ..]) => (name, options),
        _ => return None,
    };

    let name = match name {
        Token::Word(w) => w.to_lowercase(),
        other => other.text().to_string(),
    };

    let mut role = RoleRecord::new(name);
    for event in OptionEvents::new(options) {
        match event {
            OptionEvent::Flag(attr, enabled) => role.set(attr, enabled),
            OptionEvent::Password(password) => role.password = password,
            OptionEvent::ValidUntil(date) => role.valid_until = Some(date),
            OptionEvent::ConnectionLimit(limit) => role.connection_limit = limit,
        }
    }

    Some(role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn events(sql: &str) -> Vec<OptionEvent> {
        let tokens = words(sql);
        OptionEvents::new(&tokens).collect()
    }

    #[test]
    fn test_no_options_yields_defaults() {
        let role = parse_role("CREATE ROLE admin;").unwrap();
        assert_eq!(role, RoleRecord::new("admin"));
    }

    #[test]
    fn test_all_flags() {
        let role = parse_role(
            "CREATE ROLE george SUPERUSER CREATEDB INHERIT LOGIN REPLICATION BYPASSRLS CONNECTION LIMIT 3;",
        )
        .unwrap();

        assert_eq!(role.name, "george");
        assert_eq!(role.token(Attribute::Superuser), "SUPERUSER");
        assert_eq!(role.token(Attribute::CreateDb), "CREATEDB");
        assert_eq!(role.token(Attribute::Inherit), "INHERIT");
        assert_eq!(role.token(Attribute::Login), "LOGIN");
        assert_eq!(role.token(Attribute::Replication), "REPLICATION");
        assert_eq!(role.token(Attribute::BypassRls), "BYPASSRLS");
        assert_eq!(role.connection_limit, 3);
    }

    #[test]
    fn test_negative_flags() {
        let role = parse_role("CREATE ROLE r WITH LOGIN NOINHERIT NOLOGIN;").unwrap();
        assert_eq!(role.token(Attribute::Inherit), "NOINHERIT");
        assert_eq!(role.token(Attribute::Login), "NOLOGIN");
    }

    #[test]
    fn test_password_forms() {
        let role = parse_role("CREATE ROLE davide WITH PASSWORD 'jw8s0F4';").unwrap();
        assert_eq!(role.password.as_deref(), Some("jw8s0F4"));

        let role = parse_role("CREATE ROLE davide WITH PASSWORD '';").unwrap();
        assert_eq!(role.password, None);

        let role = parse_role("CREATE ROLE davide WITH PASSWORD NULL;").unwrap();
        assert_eq!(role.password, None);

        let role = parse_role("CREATE ROLE davide;").unwrap();
        assert_eq!(role.password, None);
    }

    #[test]
    fn test_encrypted_password_is_skipped_then_read() {
        let role = parse_role("CREATE ROLE davide2 WITH ENCRYPTED PASSWORD 'jw8s0F4';").unwrap();
        assert_eq!(role.name, "davide2");
        assert_eq!(role.password.as_deref(), Some("jw8s0F4"));
    }

    #[test]
    fn test_valid_until() {
        let role =
            parse_role("CREATE ROLE miriam WITH LOGIN PASSWORD 'jw8s0F4' VALID UNTIL '2005-01-01';")
                .unwrap();
        assert_eq!(role.name, "miriam");
        assert!(role.login);
        assert_eq!(role.valid_until.as_deref(), Some("2005-01-01"));
    }

    #[test]
    fn test_unknown_options_are_ignored() {
        let role = parse_role("CREATE ROLE admin WITH CREATEDB CREATEROLE;").unwrap();
        assert!(role.createdb);
        assert_eq!(role.token(Attribute::Login), "NOLOGIN");
    }

    #[test]
    fn test_quoted_and_unquoted_names() {
        assert_eq!(parse_role("CREATE ROLE Admin;").unwrap().name, "admin");
        assert_eq!(parse_role("CREATE ROLE \"Admin Team\";").unwrap().name, "Admin Team");
    }

    #[test]
    fn test_missing_name() {
        assert_eq!(parse_role("CREATE ROLE;"), None);
    }

    #[test]
    fn test_event_stream() {
        assert_eq!(
            events("LOGIN PASSWORD 'x' VALID UNTIL 'infinity' CONNECTION LIMIT 10 NOINHERIT"),
            vec![
                OptionEvent::Flag(Attribute::Login, true),
                OptionEvent::Password(Some("x".into())),
                OptionEvent::ValidUntil("infinity".into()),
                OptionEvent::ConnectionLimit(10),
                OptionEvent::Flag(Attribute::Inherit, false),
            ]
        );
    }

    #[test]
    fn test_bad_connection_limit_is_skipped() {
        assert_eq!(
            events("CONNECTION LIMIT lots LOGIN"),
            vec![OptionEvent::Flag(Attribute::Login, true)]
        );
    }
}
