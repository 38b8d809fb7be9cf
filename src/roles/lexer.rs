//! SQL statement splitter and word tokenizer
//!
//! Only understands enough PostgreSQL lexical structure to find statement
//! boundaries and to break a single statement into words: string literals,
//! quoted identifiers, dollar-quoted bodies and comments are honoured so a
//! `;` inside any of them never ends a statement.

/// A lexical word of a single statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare word: keyword, unquoted identifier or number
    Word(String),
    /// Contents of a single-quoted string literal, escapes resolved
    Literal(String),
    /// Contents of a double-quoted identifier, escapes resolved
    Ident(String),
}

impl Token {
    /// Text of the token with surrounding quotes stripped
    pub fn text(&self) -> &str {
        match self {
            Token::Word(s) | Token::Literal(s) | Token::Ident(s) => s,
        }
    }

    /// Case-insensitive keyword comparison, bare words only
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

/// Split raw SQL into top-level statements.
///
/// Each statement is a slice of `input` running from its first
/// non-whitespace character through its terminating `;`. Trailing text
/// without a delimiter is returned as a final statement, trimmed.
pub fn split_statements(input: &str) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut statements = Vec::new();
    let mut start: Option<usize> = None;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if start.is_none() {
            if c.is_ascii_whitespace() {
                i += 1;
                continue;
            }
            start = Some(i);
        }

        i = match c {
            b'\'' => skip_quoted(bytes, i, b'\'', is_escape_string(bytes, i)),
            b'"' => skip_quoted(bytes, i, b'"', false),
            b'-' if bytes.get(i + 1) == Some(&b'-') => skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => skip_block_comment(bytes, i),
            b'$' => match dollar_tag(input, i) {
                Some(tag) => skip_dollar_quoted(input, i, tag).0,
                None => i + 1,
            },
            b';' => {
                if let Some(s) = start.take() {
                    statements.push(&input[s..=i]);
                }
                i + 1
            }
            _ => i + 1,
        };
    }

    if let Some(s) = start {
        let tail = input[s..].trim_end();
        if !tail.is_empty() {
            statements.push(tail);
        }
    }

    statements
}

/// Break one statement into words, dropping whitespace, comments and `;`
pub fn words(statement: &str) -> Vec<Token> {
    let bytes = statement.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if c.is_ascii_whitespace() || c == b';' {
            i += 1;
            continue;
        }
        if c == b'-' && bytes.get(i + 1) == Some(&b'-') {
            i = skip_line_comment(bytes, i);
            continue;
        }
        if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i = skip_block_comment(bytes, i);
            continue;
        }

        // E'...' escape string
        if (c == b'E' || c == b'e') && bytes.get(i + 1) == Some(&b'\'') {
            let end = skip_quoted(bytes, i + 1, b'\'', true);
            tokens.push(Token::Literal(unquote(&statement[i + 1..end], '\'', true)));
            i = end;
            continue;
        }

        match c {
            b'\'' => {
                let end = skip_quoted(bytes, i, b'\'', false);
                tokens.push(Token::Literal(unquote(&statement[i..end], '\'', false)));
                i = end;
            }
            b'"' => {
                let end = skip_quoted(bytes, i, b'"', false);
                tokens.push(Token::Ident(unquote(&statement[i..end], '"', false)));
                i = end;
            }
            b'$' if dollar_tag(statement, i).is_some() => {
                let tag = dollar_tag(statement, i).unwrap_or("$$");
                let (end, closed) = skip_dollar_quoted(statement, i, tag);
                let body_end = if closed { end - tag.len() } else { end };
                tokens.push(Token::Literal(statement[i + tag.len()..body_end].to_string()));
                i = end;
            }
            _ => {
                let start = i;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && !matches!(bytes[i], b';' | b'\'' | b'"')
                {
                    i += 1;
                }
                tokens.push(Token::Word(statement[start..i].to_string()));
            }
        }
    }

    tokens
}

/// Position just past a quoted run starting at `start` (which holds `quote`)
fn skip_quoted(bytes: &[u8], start: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        let c = bytes[i];
        if backslash_escapes && c == b'\\' {
            i += 2;
            continue;
        }
        if c == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

/// Block comments nest in PostgreSQL
fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// `'` preceded by a standalone `E` starts an escape string
fn is_escape_string(bytes: &[u8], quote_pos: usize) -> bool {
    if quote_pos == 0 || !matches!(bytes[quote_pos - 1], b'E' | b'e') {
        return false;
    }
    quote_pos < 2 || !is_ident_byte(bytes[quote_pos - 2])
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// The `$tag$` opening a dollar-quoted body at `start`, if any
fn dollar_tag(input: &str, start: usize) -> Option<&str> {
    let bytes = input.as_bytes();
    if start > 0 && is_ident_byte(bytes[start - 1]) {
        return None;
    }
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'$' => return Some(&input[start..=i]),
            b'0'..=b'9' if i == start + 1 => return None,
            b if b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80 => i += 1,
            _ => return None,
        }
    }
    None
}

/// Position just past the closing tag, and whether one was found.
/// An unterminated body runs to the end of `input`.
fn skip_dollar_quoted(input: &str, start: usize, tag: &str) -> (usize, bool) {
    let body = start + tag.len();
    match input[body..].find(tag) {
        Some(offset) => (body + offset + tag.len(), true),
        None => (input.len(), false),
    }
}

/// Strip surrounding quotes from a quoted run and resolve doubled quotes
fn unquote(quoted: &str, quote: char, backslash_escapes: bool) -> String {
    let inner = quoted.strip_prefix(quote).unwrap_or(quoted);
    let inner = inner.strip_suffix(quote).unwrap_or(inner);

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == quote && chars.peek() == Some(&quote) {
            chars.next();
            out.push(quote);
        } else if backslash_escapes && c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_simple() {
        let stmts = split_statements("CREATE ROLE admin;\nSELECT 1;  \n");
        assert_eq!(stmts, vec!["CREATE ROLE admin;", "SELECT 1;"]);
    }

    #[test]
    fn test_split_keeps_multiline_statement_verbatim() {
        let sql = "CREATE TABLE films (\n    code char(5),\n    title varchar(40)\n);\nSELECT 2;";
        let stmts = split_statements(sql);
        assert_eq!(
            stmts,
            vec!["CREATE TABLE films (\n    code char(5),\n    title varchar(40)\n);", "SELECT 2;"]
        );
    }

    #[test]
    fn test_split_ignores_semicolons_in_literals_and_comments() {
        let sql = "INSERT INTO t VALUES ('a;b', 'it''s;');\n\
                   -- comment; with semicolon\n\
                   SELECT \"odd;name\" FROM t /* block; /* nested; */ still */;\n\
                   CREATE FUNCTION f() RETURNS int AS $body$ SELECT 1; $body$ LANGUAGE sql;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[0], "INSERT INTO t VALUES ('a;b', 'it''s;');");
        assert!(stmts[1].starts_with("-- comment; with semicolon"));
        assert!(stmts[1].ends_with("still */;"));
        assert!(stmts[2].ends_with("$body$ LANGUAGE sql;"));
    }

    #[test]
    fn test_split_escape_string() {
        let stmts = split_statements(r"SELECT E'a\';b'; SELECT 2;");
        assert_eq!(stmts, vec![r"SELECT E'a\';b';", "SELECT 2;"]);
    }

    #[test]
    fn test_split_trailing_statement_without_delimiter() {
        let stmts = split_statements("SELECT 1; SELECT 2  \n");
        assert_eq!(stmts, vec!["SELECT 1;", "SELECT 2"]);
    }

    #[test]
    fn test_split_positional_parameter_is_not_dollar_quote() {
        let stmts = split_statements("PREPARE p AS SELECT $1; SELECT 2;");
        assert_eq!(stmts, vec!["PREPARE p AS SELECT $1;", "SELECT 2;"]);
    }

    #[test]
    fn test_words() {
        let tokens = words("CREATE ROLE \"My Role\" WITH PASSWORD 'it''s' VALID UNTIL '2005-01-01';");
        assert_eq!(
            tokens,
            vec![
                Token::Word("CREATE".into()),
                Token::Word("ROLE".into()),
                Token::Ident("My Role".into()),
                Token::Word("WITH".into()),
                Token::Word("PASSWORD".into()),
                Token::Literal("it's".into()),
                Token::Word("VALID".into()),
                Token::Word("UNTIL".into()),
                Token::Literal("2005-01-01".into()),
            ]
        );
    }

    #[test]
    fn test_words_negative_number_and_comments() {
        let tokens = words("CREATE ROLE x /* hi */ CONNECTION LIMIT -1 -- trailing\n;");
        let texts: Vec<&str> = tokens.iter().map(Token::text).collect();
        assert_eq!(texts, vec!["CREATE", "ROLE", "x", "CONNECTION", "LIMIT", "-1"]);
    }

    #[test]
    fn test_words_dollar_quoted() {
        let tokens = words("PASSWORD $pw$it's;$pw$ LOGIN");
        assert_eq!(
            tokens,
            vec![
                Token::Word("PASSWORD".into()),
                Token::Literal("it's;".into()),
                Token::Word("LOGIN".into()),
            ]
        );
    }

    #[test]
    fn test_words_unterminated_dollar_quote_with_multibyte_text() {
        let tokens = words("CREATE ROLE x PASSWORD $$éa");
        assert_eq!(tokens.last(), Some(&Token::Literal("éa".into())));

        let tokens = words("PASSWORD $$é");
        assert_eq!(tokens.last(), Some(&Token::Literal("é".into())));
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        assert!(Token::Word("login".into()).is_keyword("LOGIN"));
        assert!(!Token::Literal("LOGIN".into()).is_keyword("LOGIN"));
    }
}
