//! SQL text helpers shared by the diff engine and the admin connection

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Schema-qualified, quoted object name
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Quote a string literal, doubling embedded quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render statements as a script: one `;`-terminated statement per
/// paragraph, blank line in between, trailing newline.
pub fn format_statements<S: AsRef<str>>(statements: &[S]) -> String {
    statements
        .iter()
        .map(|s| {
            let s = s.as_ref().trim_end();
            if s.ends_with(';') {
                format!("{}\n", s)
            } else {
                format!("{};\n", s)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
