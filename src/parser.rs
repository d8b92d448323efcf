// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Statement parser
//!
//! Classifies one fragment by its leading keywords and pulls out the
//! pieces the writer needs. This is not a SQL parser: only the handful of
//! statement shapes a dump contains are understood, anything else is
//! reported as [`ParseError::Unsupported`] so the caller can skip it.

use log::debug;
use std::borrow::Cow;
use thiserror::Error;

use super::ast::*;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty statement")]
    Empty,
    #[error("unsupported statement: {0}")]
    Unsupported(String),
    #[error("missing object name after {0}")]
    MissingObjectName(&'static str),
    #[error("malformed object name: {0}")]
    MalformedObjectName(String),
    #[error("unterminated column list")]
    UnterminatedColumnList,
    #[error("unterminated partition list")]
    UnterminatedPartitionList,
    #[error("unterminated value row")]
    UnterminatedValues,
    #[error("expected {expected}, found: {found}")]
    Expected {
        expected: &'static str,
        found: String,
    },
}

type ParseResult<T> = Result<T, ParseError>;

const INSERT_MODIFIERS: [&str; 6] = [
    "insert",
    "delayed",
    "low_priority",
    "high_priority",
    "ignore",
    "into",
];

/// Parse one fragment into a [`Statement`].
///
/// Leading whitespace, a trailing `;` and leading comments are ignored.
pub fn parse(fragment: &[u8]) -> ParseResult<Statement<'_>> {
    let line = strip_leading_comments(trim(fragment));
    let line = trim(line.strip_suffix(b";").unwrap_or(line));
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    if has_keyword(line, b"insert") {
        return parse_insert(line).map(Statement::Insert);
    }
    if has_keyword(line, b"drop") {
        let rest = skip_keyword(line, b"drop");
        if has_keyword(rest, b"database") || has_keyword(rest, b"schema") {
            return parse_database_name(rest).map(|database| Statement::DropDatabase { database });
        }
        if !names_table(rest) {
            return Err(ParseError::Unsupported(preview(line)));
        }
        return parse_drop_table(rest);
    }
    if has_keyword(line, b"create") {
        let rest = skip_keyword(line, b"create");
        if has_keyword(rest, b"database") || has_keyword(rest, b"schema") {
            return parse_database_name(rest)
                .map(|database| Statement::CreateDatabase { database });
        }
        if !names_table(rest) {
            return Err(ParseError::Unsupported(preview(line)));
        }
        return parse_create_table(rest);
    }
    if has_keyword(line, b"use") {
        let (name, _) = next_field(skip_keyword(line, b"use"));
        if name.is_empty() {
            return Err(ParseError::MissingObjectName("USE"));
        }
        return Ok(Statement::Use {
            database: unquote_ident(name),
        });
    }
    Err(ParseError::Unsupported(preview(line)))
}

/// `INSERT [modifiers] [INTO] name [PARTITION (p, ...)] [(cols)] VALUES row, ...`
fn parse_insert(line: &[u8]) -> ParseResult<Insert<'_>> {
    let mut line = line;
    loop {
        let before = line.len();
        for keyword in INSERT_MODIFIERS.iter() {
            line = skip_keyword(line, keyword.as_bytes());
        }
        if line.len() == before {
            break;
        }
    }

    let (name, mut line) = next_field(line);
    let table = parse_object_name(name, "INSERT")?;
    debug!("parse_insert {:?}", table);

    let mut partitions = vec![];
    if has_keyword(line, b"partition") {
        line = skip_keyword(line, b"partition");
        let (list, rest) = parse_partitions(line)?;
        partitions = list;
        line = rest;
    }

    let mut columns = None;
    if line.first() == Some(&b'(') {
        let close = line
            .iter()
            .position(|b| *b == b')')
            .ok_or(ParseError::UnterminatedColumnList)?;
        columns = Some(&line[..=close]);
        line = trim(&line[close + 1..]);
    }

    line = skip_keyword(line, b"values");
    line = skip_keyword(line, b"value");
    if line.first() != Some(&b'(') {
        return Err(ParseError::Expected {
            expected: "VALUES",
            found: preview(line),
        });
    }

    Ok(Insert {
        table,
        partitions,
        columns,
        rows: split_rows(line)?,
    })
}

/// `[TEMPORARY] TABLE [IF EXISTS] name`, after `DROP`.
fn parse_drop_table(line: &[u8]) -> ParseResult<Statement<'_>> {
    let (temporary, line) = parse_temporary(line);
    let line = expect_keyword(line, b"table", "TABLE")?;
    let line = skip_keywords(line, &["if", "exists"]);
    let (name, rest) = next_field(line);
    // only single-table drops are supported
    if rest.first() == Some(&b',') {
        return Err(ParseError::MalformedObjectName(preview(line)));
    }
    Ok(Statement::DropTable {
        table: parse_object_name(name, "DROP TABLE")?,
        temporary,
    })
}

/// `[TEMPORARY] TABLE ...` after `DROP` or `CREATE`. Views, indexes,
/// routines and the like are not table statements.
fn names_table(line: &[u8]) -> bool {
    let (_, line) = parse_temporary(line);
    has_keyword(line, b"table")
}

/// `[TEMPORARY] TABLE [IF NOT EXISTS] name (LIKE source | (definition...))`, after `CREATE`.
fn parse_create_table(line: &[u8]) -> ParseResult<Statement<'_>> {
    let (temporary, line) = parse_temporary(line);
    let line = expect_keyword(line, b"table", "TABLE")?;
    let line = skip_keywords(line, &["if", "not", "exists"]);
    let (name, line) = next_field(line);
    let table = parse_object_name(name, "CREATE TABLE")?;

    // `CREATE TABLE a (LIKE b)` is accepted too
    let like = if line.first() == Some(&b'(') {
        trim(&line[1..])
    } else {
        line
    };
    if has_keyword(like, b"like") {
        let (source, _) = next_field(skip_keyword(like, b"like"));
        let source = source.strip_suffix(b")").unwrap_or(source);
        return Ok(Statement::CreateTableLike {
            table,
            source: parse_object_name(source, "LIKE")?,
            temporary,
        });
    }
    if line.is_empty() {
        return Err(ParseError::Expected {
            expected: "LIKE or a table definition",
            found: String::new(),
        });
    }
    Ok(Statement::CreateTable {
        table,
        temporary,
        definition: line,
    })
}

/// `DATABASE|SCHEMA [IF [NOT] EXISTS] name ...`
///
/// mysqldump wraps the `IF NOT EXISTS` in a versioned comment, so any
/// comment before the name is skipped here.
fn parse_database_name(line: &[u8]) -> ParseResult<Cow<'_, str>> {
    let line = skip_keyword(skip_keyword(line, b"database"), b"schema");
    let line = skip_inline_comments(line);
    let line = skip_keywords(line, &["if", "not", "exists"]);
    let line = skip_keywords(line, &["if", "exists"]);
    let (name, _) = next_field(line);
    if name.is_empty() {
        return Err(ParseError::MissingObjectName("DATABASE"));
    }
    Ok(unquote_ident(name))
}

fn parse_temporary(line: &[u8]) -> (bool, &[u8]) {
    if has_keyword(line, b"temporary") {
        (true, skip_keyword(line, b"temporary"))
    } else {
        (false, line)
    }
}

/// Split `db.table` (each part optionally backtick-quoted) into an [`ObjectName`].
pub fn parse_object_name<'a>(field: &'a [u8], after: &'static str) -> ParseResult<ObjectName<'a>> {
    if field.is_empty() {
        return Err(ParseError::MissingObjectName(after));
    }
    if split_outside_backticks(field, b',').len() > 1 {
        return Err(ParseError::MalformedObjectName(preview(field)));
    }
    let parts = split_outside_backticks(field, b'.');
    let name = match parts.as_slice() {
        [table] => ObjectName::new(unquote_ident(*table)),
        [db, table] => ObjectName::qualified(unquote_ident(*db), unquote_ident(*table)),
        _ => return Err(ParseError::MalformedObjectName(preview(field))),
    };
    if name.name.is_empty() || name.database.as_ref().map_or(false, |db| db.is_empty()) {
        return Err(ParseError::MalformedObjectName(preview(field)));
    }
    Ok(name)
}

/// `(p0, p1)` or a bare `p0`
fn parse_partitions(line: &[u8]) -> ParseResult<(Vec<Cow<'_, str>>, &[u8])> {
    let (list, rest) = if line.first() == Some(&b'(') {
        let close = line
            .iter()
            .position(|b| *b == b')')
            .ok_or(ParseError::UnterminatedPartitionList)?;
        (&line[1..close], trim(&line[close + 1..]))
    } else {
        next_field(line)
    };
    let partitions: Vec<Cow<'_, str>> = split_outside_backticks(list, b',')
        .into_iter()
        .map(trim)
        .filter(|p| !p.is_empty())
        .map(unquote_ident)
        .collect();
    if partitions.is_empty() {
        return Err(ParseError::MissingObjectName("PARTITION"));
    }
    Ok((partitions, rest))
}

/// Split a `VALUES` list into raw row spans.
///
/// Commas are only split on outside parentheses and outside quoted
/// literals ('...', "..." with backslash or doubled-quote escapes).
pub fn split_rows(values: &[u8]) -> ParseResult<Vec<&[u8]>> {
    let mut rows = vec![];
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;
    while i < values.len() {
        let b = values[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    if values.get(i + 1) == Some(&q) {
                        i += 1;
                    } else {
                        quote = None;
                    }
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b',' if depth == 0 => {
                    rows.push(trim(&values[start..i]));
                    start = i + 1;
                }
                _ => {}
            },
        }
        i += 1;
    }
    if quote.is_some() || depth > 0 {
        return Err(ParseError::UnterminatedValues);
    }
    let last = trim(&values[start..]);
    if !last.is_empty() || !rows.is_empty() {
        rows.push(last);
    }
    if rows.iter().any(|r| r.is_empty()) {
        return Err(ParseError::Expected {
            expected: "a value row",
            found: preview(values),
        });
    }
    Ok(rows)
}

/// Skip whitespace, `-- `/`#` line comments and plain `/* */` block comments.
///
/// `/*! ... */` is executable in MySQL and is left in place.
pub fn strip_leading_comments(mut line: &[u8]) -> &[u8] {
    loop {
        line = trim(line);
        if line.starts_with(b"--") || line.starts_with(b"#") {
            line = match line.iter().position(|b| *b == b'\n') {
                Some(eol) => &line[eol + 1..],
                None => &[],
            };
        } else if line.starts_with(b"/*") && !line.starts_with(b"/*!") {
            line = match find(&line[2..], b"*/") {
                Some(end) => &line[end + 4..],
                None => &[],
            };
        } else {
            return line;
        }
    }
}

fn skip_inline_comments(mut line: &[u8]) -> &[u8] {
    while line.starts_with(b"/*") {
        line = match find(&line[2..], b"*/") {
            Some(end) => trim(&line[end + 4..]),
            None => return line,
        };
    }
    line
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    memchr::memmem::find(haystack, needle)
}

fn split_outside_backticks(field: &[u8], sep: u8) -> Vec<&[u8]> {
    let mut parts = vec![];
    let mut quoted = false;
    let mut start = 0;
    for (i, b) in field.iter().enumerate() {
        if *b == b'`' {
            quoted = !quoted;
        } else if *b == sep && !quoted {
            parts.push(&field[start..i]);
            start = i + 1;
        }
    }
    parts.push(&field[start..]);
    parts
}

/// First whitespace-delimited field and the trimmed remainder.
///
/// The field also ends at `(` outside backticks so `t(a,b)` splits after `t`.
fn next_field(line: &[u8]) -> (&[u8], &[u8]) {
    let line = trim(line);
    let mut quoted = false;
    for (i, b) in line.iter().enumerate() {
        if *b == b'`' {
            quoted = !quoted;
        } else if !quoted && (b.is_ascii_whitespace() || (*b == b'(' && i > 0)) {
            return (&line[..i], trim(&line[i..]));
        }
    }
    (line, &[])
}

/// Case-insensitive keyword at the head of `line`, followed by a non-word byte.
fn has_keyword(line: &[u8], keyword: &[u8]) -> bool {
    line.len() >= keyword.len()
        && line[..keyword.len()].eq_ignore_ascii_case(keyword)
        && line
            .get(keyword.len())
            .map_or(true, |b| !(b.is_ascii_alphanumeric() || *b == b'_'))
}

fn skip_keyword<'a>(line: &'a [u8], keyword: &[u8]) -> &'a [u8] {
    if has_keyword(line, keyword) {
        trim(&line[keyword.len()..])
    } else {
        line
    }
}

/// Skip a keyword sequence only if all of it is present.
fn skip_keywords<'a>(line: &'a [u8], keywords: &[&str]) -> &'a [u8] {
    let mut rest = line;
    for keyword in keywords {
        if !has_keyword(rest, keyword.as_bytes()) {
            return line;
        }
        rest = skip_keyword(rest, keyword.as_bytes());
    }
    rest
}

fn expect_keyword<'a>(
    line: &'a [u8],
    keyword: &[u8],
    expected: &'static str,
) -> ParseResult<&'a [u8]> {
    if has_keyword(line, keyword) {
        Ok(skip_keyword(line, keyword))
    } else {
        Err(ParseError::Expected {
            expected,
            found: preview(line),
        })
    }
}

fn trim(s: &[u8]) -> &[u8] {
    let start = s
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(s.len());
    let end = s
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &s[start..end]
}

fn preview(s: &[u8]) -> String {
    const MAX: usize = 40;
    let cut = &s[..s.len().min(MAX)];
    let mut text = String::from_utf8_lossy(cut).into_owned();
    if s.len() > MAX {
        text.push_str("...");
    }
    text
}
