//! Minimal RFC 4180 reader/writer for the ledger sheet.
//!
//! Quoted fields may hold commas, newlines and doubled quotes. A quote only
//! opens a quoted field at the start of the field; elsewhere it is literal.
//! A quoted field still open at end of input is confined to its own line:
//! that line is re-read with the rest of the field taken literally.
//! Unquoted fields are trimmed.

use std::borrow::Cow;

/// Parse `text` into records. Every line yields one record, including blank
/// lines (a single empty field).
pub fn parse(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let (record, consumed) = match read_record(rest, false) {
            Some(read) => read,
            None => {
                let line_end = rest.find('\n').map_or(rest.len(), |i| i + 1);
                let line = rest[..line_end].trim_end_matches(['\r', '\n']);
                tracing::warn!(line, "unterminated quote in csv; reading line literally");
                let (record, _) = read_record(line, true).unwrap_or_default();
                (record, line_end)
            }
        };
        records.push(record);
        rest = &rest[consumed..];
    }
    records
}

/// Read one record from the start of `text`. Returns the fields and the
/// number of bytes consumed, including the line terminator.
///
/// A quoted field left open at end of input yields `None`, unless
/// `lenient` is set, in which case the field keeps what was read.
fn read_record(text: &str, lenient: bool) -> Option<(Vec<String>, usize)> {
    let mut record = Vec::new();
    let mut field = String::new();
    let mut at_start = true;
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek().map(|&(_, c)| c) == Some('"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' if at_start => {
                field.clear();
                quoted = true;
                in_quotes = true;
                at_start = false;
            }
            ',' => {
                record.push(finish(&mut field, quoted));
                at_start = true;
                quoted = false;
            }
            '\r' if chars.peek().map(|&(_, c)| c) == Some('\n') => {}
            '\n' => {
                record.push(finish(&mut field, quoted));
                return Some((record, idx + 1));
            }
            ' ' | '\t' if at_start => field.push(ch),
            _ => {
                field.push(ch);
                at_start = false;
            }
        }
    }

    if in_quotes && !lenient {
        return None;
    }
    record.push(finish(&mut field, quoted));
    Some((record, text.len()))
}

fn finish(field: &mut String, quoted: bool) -> String {
    let value = std::mem::take(field);
    if quoted {
        value
    } else {
        value.trim().to_string()
    }
}

/// Quote `value` if it contains a comma, quote, CR or LF.
pub fn escape(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Render one row followed by `\n`. Column 0 is written verbatim when
/// `raw_first` is set.
pub fn write_row(out: &mut String, row: &[String], raw_first: bool) {
    for (idx, value) in row.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        if idx == 0 && raw_first {
            out.push_str(value);
        } else {
            out.push_str(&escape(value));
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_line(line: &str) -> Vec<String> {
        parse(line).into_iter().next().unwrap_or_default()
    }

    #[test]
    fn test_plain_fields() {
        assert_eq!(split_line("1,12,Ada"), vec!["1", "12", "Ada"]);
        assert_eq!(split_line("a,,"), vec!["a", "", ""]);
        assert!(parse("").is_empty());
    }

    #[test]
    fn test_quoted_comma_and_doubled_quote() {
        assert_eq!(
            split_line(r#"1,"Bo ""Jr"", III",x"#),
            vec!["1", r#"Bo "Jr", III"#, "x"]
        );
    }

    #[test]
    fn test_quoted_newline_spans_lines() {
        let records = parse("a,\"line1\nline2\",c\nd,e\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], vec!["a", "line1\nline2", "c"]);
        assert_eq!(records[1], vec!["d", "e"]);
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let records = parse("h1,h2\r\n\r\nx,y");
        assert_eq!(records, vec![vec!["h1", "h2"], vec![""], vec!["x", "y"]]);
    }

    #[test]
    fn test_unmatched_quote_taken_literally() {
        assert_eq!(split_line("1,\"open,rest"), vec!["1", "open,rest"]);
    }

    #[test]
    fn test_mid_field_quote_is_literal() {
        let records = parse("1,1,Ada\",P,100\n2,2,Bo,P,100\n3,3,Cy,P,100\n");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], vec!["1", "1", "Ada\"", "P", "100"]);
        assert_eq!(records[1], vec!["2", "2", "Bo", "P", "100"]);
        assert_eq!(records[2], vec!["3", "3", "Cy", "P", "100"]);
    }

    #[test]
    fn test_unterminated_quote_stays_on_its_line() {
        let records = parse("1,1,\"Ada,P,100\r\n2,2,Bo,P,100\n3,3,Cy,A,0\n");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], vec!["1", "1", "Ada,P,100"]);
        assert_eq!(records[1], vec!["2", "2", "Bo", "P", "100"]);
        assert_eq!(records[2], vec!["3", "3", "Cy", "A", "0"]);
    }

    #[test]
    fn test_unquoted_fields_are_trimmed() {
        assert_eq!(split_line(" 1 , Ada ,\tP"), vec!["1", "Ada", "P"]);
        assert_eq!(split_line(r#"1, " Ada, Jr ",P"#), vec!["1", " Ada, Jr ", "P"]);
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_escaped_name_reparses() {
        let name = r#"O"Brien, "Pat""#;
        let mut out = String::new();
        write_row(&mut out, &["1".into(), "9".into(), name.into()], true);
        let parsed = parse(&out);
        assert_eq!(parsed, vec![vec!["1".to_string(), "9".into(), name.into()]]);
    }

    #[test]
    fn test_write_row_raw_first() {
        let mut out = String::new();
        write_row(&mut out, &["a,b".into(), "c,d".into()], true);
        assert_eq!(out, "a,b,\"c,d\"\n");
    }
}
