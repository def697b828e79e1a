//! Lexer for SQL text: finds placeholder tokens while tracking quote,
//! comment and dollar-quote state so literals are never mis-rewritten.

#[derive(Clone)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

/// A placeholder occurrence in the statement text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    /// Byte offset of the first character of the placeholder.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
    pub kind: TokenKind,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    /// `%s`
    Percent,
    /// `?` or `?3`
    Question(Option<u32>),
    /// `$2`
    Dollar(u32),
    /// `:4` (numeric colon style)
    ColonNumbered(u32),
    /// `:name`
    ColonNamed(String),
    /// `$name`
    DollarNamed(String),
    /// `%(name)s`
    PercentNamed(String),
}

impl TokenKind {
    pub(crate) fn is_named(&self) -> bool {
        matches!(
            self,
            TokenKind::ColonNamed(_) | TokenKind::DollarNamed(_) | TokenKind::PercentNamed(_)
        )
    }
}

fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn scan_digits(bytes: &[u8], start: usize) -> Option<(usize, u32)> {
    let mut idx = start;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx == start {
        return None;
    }
    std::str::from_utf8(&bytes[start..idx])
        .ok()
        .and_then(|digits| digits.parse().ok())
        .map(|n| (idx, n))
}

fn scan_ident(bytes: &[u8], start: usize) -> Option<(usize, String)> {
    if start >= bytes.len() || !is_ident_start(bytes[start]) {
        return None;
    }
    let mut idx = start + 1;
    while idx < bytes.len() && is_ident_char(bytes[idx]) {
        idx += 1;
    }
    String::from_utf8(bytes[start..idx].to_vec())
        .ok()
        .map(|name| (idx, name))
}

/// Try to recognize a dollar-quote opener (`$tag$` or `$$`) at `start`.
/// Returns the tag and the index of the closing `$` of the opener.
fn try_start_dollar_quote(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let mut idx = start + 1;
    while idx < bytes.len() && bytes[idx] != b'$' {
        if !is_ident_char(bytes[idx]) {
            return None;
        }
        idx += 1;
    }
    if idx < bytes.len() && bytes[idx] == b'$' {
        let tag = String::from_utf8(bytes[start + 1..idx].to_vec()).ok()?;
        Some((tag, idx))
    } else {
        None
    }
}

fn matches_tag(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let end = idx + 1 + tag.len();
    end < bytes.len()
        && bytes[idx + 1..=end].starts_with(tag.as_bytes())
        && bytes.get(end) == Some(&b'$')
}

/// Scan the statement and collect every placeholder token in textual order.
pub(crate) fn scan(sql: &str) -> Vec<Token> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => {
                    state = State::SingleQuoted;
                }
                b'"' => {
                    state = State::DoubleQuoted;
                }
                _ if is_line_comment_start(bytes, idx) => {
                    state = State::LineComment;
                    idx += 1;
                }
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'%' => {
                    if bytes.get(idx + 1) == Some(&b's') {
                        tokens.push(Token {
                            start: idx,
                            end: idx + 2,
                            kind: TokenKind::Percent,
                        });
                        idx += 1;
                    } else if bytes.get(idx + 1) == Some(&b'(')
                        && let Some((close, name)) = scan_ident(bytes, idx + 2)
                        && bytes.get(close) == Some(&b')')
                        && bytes.get(close + 1) == Some(&b's')
                    {
                        tokens.push(Token {
                            start: idx,
                            end: close + 2,
                            kind: TokenKind::PercentNamed(name),
                        });
                        idx = close + 1;
                    }
                }
                b'?' => {
                    let (end, number) = match scan_digits(bytes, idx + 1) {
                        Some((digits_end, n)) => (digits_end, Some(n)),
                        None => (idx + 1, None),
                    };
                    tokens.push(Token {
                        start: idx,
                        end,
                        kind: TokenKind::Question(number),
                    });
                    idx = end - 1;
                }
                b':' => {
                    // `::type` casts are not placeholders
                    if bytes.get(idx + 1) == Some(&b':') {
                        idx += 1;
                    } else if idx > 0 && bytes[idx - 1] == b':' {
                        // second colon of a cast already consumed
                    } else if let Some((end, n)) = scan_digits(bytes, idx + 1) {
                        tokens.push(Token {
                            start: idx,
                            end,
                            kind: TokenKind::ColonNumbered(n),
                        });
                        idx = end - 1;
                    } else if let Some((end, name)) = scan_ident(bytes, idx + 1) {
                        tokens.push(Token {
                            start: idx,
                            end,
                            kind: TokenKind::ColonNamed(name),
                        });
                        idx = end - 1;
                    }
                }
                b'$' => {
                    if let Some((tag, close)) = try_start_dollar_quote(bytes, idx) {
                        state = State::DollarQuoted(tag);
                        idx = close;
                    } else if let Some((end, n)) = scan_digits(bytes, idx + 1) {
                        tokens.push(Token {
                            start: idx,
                            end,
                            kind: TokenKind::Dollar(n),
                        });
                        idx = end - 1;
                    } else if let Some((end, name)) = scan_ident(bytes, idx + 1) {
                        tokens.push(Token {
                            start: idx,
                            end,
                            kind: TokenKind::DollarNamed(name),
                        });
                        idx = end - 1;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1; // skip escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_block_comment_end(bytes, idx) {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && matches_tag(bytes, idx, tag) {
                    let tag_len = tag.len();
                    state = State::Normal;
                    idx += tag_len + 1;
                }
            }
        }
        idx += 1;
    }

    tokens
}

/// Split a script into statements at top-level semicolons, using the same
/// state machine so semicolons inside literals, comments and dollar-quoted
/// bodies never split.
pub(crate) fn split_statements(script: &str) -> Vec<String> {
    let bytes = script.as_bytes();
    let mut statements = Vec::new();
    let mut state = State::Normal;
    let mut stmt_start = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                _ if is_line_comment_start(bytes, idx) => {
                    state = State::LineComment;
                    idx += 1;
                }
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'$' => {
                    if let Some((tag, close)) = try_start_dollar_quote(bytes, idx) {
                        state = State::DollarQuoted(tag);
                        idx = close;
                    }
                }
                b';' => {
                    let stmt = script[stmt_start..idx].trim();
                    if !stmt.is_empty() {
                        statements.push(stmt.to_string());
                    }
                    stmt_start = idx + 1;
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(idx + 1) == Some(&b'"') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_block_comment_end(bytes, idx) {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && matches_tag(bytes, idx, tag) {
                    let tag_len = tag.len();
                    state = State::Normal;
                    idx += tag_len + 1;
                }
            }
        }
        idx += 1;
    }

    let tail = script[stmt_start..].trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_tokens_outside_literals() {
        let tokens = scan("select '?1', $1 -- $2\n/* ?3 */ from t where a = :name");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].kind, TokenKind::Dollar(1));
        assert_eq!(tokens[1].kind, TokenKind::ColonNamed("name".into()));
    }

    #[test]
    fn skips_casts_and_dollar_quotes() {
        let tokens = scan("select a::text, $fn$ body $1 $fn$ from t where b = $2");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Dollar(2));
    }

    #[test]
    fn recognizes_percent_styles() {
        let tokens = scan("insert into t values (%s, %(name)s)");
        assert_eq!(tokens[0].kind, TokenKind::Percent);
        assert_eq!(tokens[1].kind, TokenKind::PercentNamed("name".into()));
    }

    #[test]
    fn splits_statements_at_top_level_only() {
        let stmts = split_statements(
            "create table t (id int); insert into t values (';'); -- trailing; comment\nselect * from t",
        );
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[1], "insert into t values (';')");
    }
}
