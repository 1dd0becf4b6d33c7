//! Statement splitting. The scanner walks raw SQL text and cuts it into
//! spans at top-level semicolons, honoring single-quoted strings, dollar
//! quoting, and both comment forms so a `;` inside a function body never
//! ends a statement.

/// One statement's text plus its position in the source file.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementSpan {
    pub sql: String,
    /// 1-based line of the first non-whitespace character.
    pub line: usize,
    /// Byte offset of the span start within the file.
    pub offset: usize,
}

#[derive(Debug, PartialEq)]
enum ScanState {
    Normal,
    LineComment,
    BlockComment(usize),
    SingleQuote,
    DollarQuote(Vec<u8>),
}

pub fn split_statements(source: &str) -> Vec<StatementSpan> {
    let bytes = source.as_bytes();
    let mut spans = Vec::new();
    let mut state = ScanState::Normal;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match &state {
            ScanState::Normal => {
                if bytes[i..].starts_with(b"--") {
                    state = ScanState::LineComment;
                    i += 2;
                } else if bytes[i..].starts_with(b"/*") {
                    state = ScanState::BlockComment(1);
                    i += 2;
                } else if bytes[i] == b'\'' {
                    state = ScanState::SingleQuote;
                    i += 1;
                } else if bytes[i] == b'$' {
                    match dollar_tag(&bytes[i..]) {
                        Some(tag) => {
                            i += tag.len();
                            state = ScanState::DollarQuote(tag);
                        }
                        None => i += 1,
                    }
                } else if bytes[i] == b';' {
                    push_span(source, start, i + 1, &mut spans);
                    start = i + 1;
                    i += 1;
                } else {
                    i += 1;
                }
            }
            ScanState::LineComment => {
                if bytes[i] == b'\n' {
                    state = ScanState::Normal;
                }
                i += 1;
            }
            ScanState::BlockComment(depth) => {
                if bytes[i..].starts_with(b"*/") {
                    let depth = depth - 1;
                    state = if depth == 0 {
                        ScanState::Normal
                    } else {
                        ScanState::BlockComment(depth)
                    };
                    i += 2;
                } else if bytes[i..].starts_with(b"/*") {
                    state = ScanState::BlockComment(depth + 1);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            ScanState::SingleQuote => {
                if bytes[i] == b'\'' {
                    // '' is an escaped quote, not a terminator
                    if bytes.get(i + 1) == Some(&b'\'') {
                        i += 2;
                    } else {
                        state = ScanState::Normal;
                        i += 1;
                    }
                } else {
                    i += 1;
                }
            }
            ScanState::DollarQuote(tag) => {
                if bytes[i..].starts_with(tag) {
                    i += tag.len();
                    state = ScanState::Normal;
                } else {
                    i += 1;
                }
            }
        }
    }
    push_span(source, start, source.len(), &mut spans);
    spans
}

/// Recognize a `$tag$` opener at the start of `rest`. Tags are empty or
/// identifier-like; a digit first means a positional parameter instead.
fn dollar_tag(rest: &[u8]) -> Option<Vec<u8>> {
    for (i, byte) in rest.iter().enumerate().skip(1) {
        match byte {
            b'$' => return Some(rest[..i + 1].to_vec()),
            b if i == 1 && b.is_ascii_digit() => return None,
            b if b.is_ascii_alphanumeric() || *b == b'_' => {}
            _ => return None,
        }
    }
    None
}

fn push_span(source: &str, start: usize, end: usize, spans: &mut Vec<StatementSpan>) {
    let raw = &source[start..end];
    let skip = leading_trivia(raw);
    let sql = raw[skip..].trim_end();
    if sql.is_empty() || sql == ";" {
        return;
    }
    let offset = start + skip;
    let line = source[..offset].matches('\n').count() + 1;
    spans.push(StatementSpan {
        sql: sql.to_string(),
        line,
        offset,
    });
}

/// Byte length of the whitespace and comments preceding the statement text.
fn leading_trivia(raw: &str) -> usize {
    let mut skip = 0usize;
    loop {
        let rest = &raw[skip..];
        let trimmed = rest.trim_start();
        if trimmed.len() != rest.len() {
            skip += rest.len() - trimmed.len();
            continue;
        }
        if let Some(comment) = rest.strip_prefix("--") {
            skip += 2 + comment.find('\n').map(|p| p + 1).unwrap_or(comment.len());
            continue;
        }
        if let Some(comment) = rest.strip_prefix("/*") {
            match comment.find("*/") {
                Some(p) => skip += 2 + p + 2,
                None => skip = raw.len(),
            }
            continue;
        }
        return skip;
    }
}

#[cfg(test)]
mod test {
    use super::split_statements;

    #[test]
    fn split_should_cut_at_top_level_semicolons() {
        let spans = split_statements("CREATE TABLE a (id int);\nCREATE TABLE b (id int);\n");
        assert_eq!(2, spans.len());
        assert_eq!("CREATE TABLE a (id int);", spans[0].sql);
        assert_eq!(1, spans[0].line);
        assert_eq!(2, spans[1].line);
    }

    #[test]
    fn split_should_ignore_semicolons_in_strings_and_comments() {
        let source = "INSERT INTO t VALUES ('a;b'); -- trailing; comment\nSELECT 1;";
        let spans = split_statements(source);
        assert_eq!(2, spans.len());
        assert_eq!("INSERT INTO t VALUES ('a;b');", spans[0].sql);
    }

    #[test]
    fn split_should_keep_dollar_quoted_bodies_whole() {
        let source = "CREATE FUNCTION f() RETURNS int LANGUAGE plpgsql AS $body$\nBEGIN\n  RETURN 1;\nEND;\n$body$;\nSELECT 1;";
        let spans = split_statements(source);
        assert_eq!(2, spans.len());
        assert!(spans[0].sql.contains("RETURN 1;"));
        assert_eq!("SELECT 1;", spans[1].sql);
    }

    #[test]
    fn split_should_handle_escaped_quotes() {
        let spans = split_statements("SELECT 'it''s; fine'; SELECT 2;");
        assert_eq!(2, spans.len());
    }

    #[test]
    fn split_should_keep_final_unterminated_statement() {
        let spans = split_statements("SELECT 1;\nSELECT 2");
        assert_eq!(2, spans.len());
        assert_eq!("SELECT 2", spans[1].sql);
    }

    #[test]
    fn split_should_track_lines_through_block_comments() {
        let source = "/* multi\nline\ncomment */\nSELECT 1;";
        let spans = split_statements(source);
        assert_eq!(1, spans.len());
        assert_eq!(4, spans[0].line);
        assert_eq!("SELECT 1;", spans[0].sql);
    }

    #[test]
    fn split_should_survive_multibyte_text() {
        let spans = split_statements("SELECT 'héllo – wörld'; SELECT 'ok';");
        assert_eq!(2, spans.len());
    }

    #[test]
    fn positional_params_should_not_open_dollar_quotes() {
        let spans = split_statements("SELECT $1, $2; SELECT 3;");
        assert_eq!(2, spans.len());
    }
}
