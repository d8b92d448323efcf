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

//! Statement rendering
//!
//! Turns parsed statements back into SQL according to the option flags and
//! writes them, one statement per line, into an [`OutputHandle`]. Statements
//! whose gating flag is off render to nothing.

use log::trace;

use crate::ast::{quote_ident, Insert, ObjectName, Statement};
use crate::config::{CreateLikeGate, Options};
use crate::error::Result;
use crate::pool::OutputHandle;

/// Which sink a rendered statement goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Data,
    Schema,
}

/// Rendered statements, without line endings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub target: Target,
    pub lines: Vec<Vec<u8>>,
}

impl Rendered {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatementWriter {
    create_like_gate: CreateLikeGate,
}

impl StatementWriter {
    pub fn new(create_like_gate: CreateLikeGate) -> Self {
        StatementWriter { create_like_gate }
    }

    /// Render `statement` under `options`. `USE` and gated-off statements
    /// produce no lines.
    pub fn render(&self, options: Options, statement: &Statement) -> Rendered {
        let target = if statement.is_schema() {
            Target::Schema
        } else {
            Target::Data
        };
        let lines = match statement {
            Statement::Insert(insert) => insert
                .rows
                .iter()
                .map(|row| render_insert(options, insert, row))
                .collect(),
            Statement::DropTable { table, temporary } => {
                if options.contains(Options::DROP_TABLE) {
                    vec![render_drop_table(options, table, *temporary)]
                } else {
                    vec![]
                }
            }
            Statement::CreateTableLike {
                table,
                source,
                temporary,
            } => {
                if options.contains(self.create_like_gate.flag()) {
                    let mut line = create_table_head(options, table, *temporary);
                    line.extend_from_slice(b" LIKE ");
                    push_name(&mut line, options, source);
                    line.push(b';');
                    vec![line]
                } else {
                    vec![]
                }
            }
            Statement::CreateTable {
                table,
                temporary,
                definition,
            } => {
                if options.contains(Options::CREATE_TABLE) {
                    let mut line = create_table_head(options, table, *temporary);
                    line.push(b' ');
                    line.extend_from_slice(definition);
                    line.push(b';');
                    vec![line]
                } else {
                    vec![]
                }
            }
            Statement::DropDatabase { database } => {
                if options.contains(Options::DROP_DATABASE) {
                    vec![format!("DROP DATABASE IF EXISTS {};", quote_ident(database)).into_bytes()]
                } else {
                    vec![]
                }
            }
            Statement::CreateDatabase { database } => {
                if options.contains(Options::CREATE_DATABASE) {
                    vec![format!("CREATE DATABASE IF NOT EXISTS {};", quote_ident(database))
                        .into_bytes()]
                } else {
                    vec![]
                }
            }
            Statement::Use { .. } => vec![],
        };
        Rendered { target, lines }
    }

    /// Write already rendered lines. Returns the number of statements written.
    pub fn write_rendered(&self, handle: &mut OutputHandle, rendered: &Rendered) -> Result<usize> {
        for line in &rendered.lines {
            trace!("{} <- {}", handle.key(), String::from_utf8_lossy(line));
            let mut framed = Vec::with_capacity(line.len() + 1);
            framed.extend_from_slice(line);
            framed.push(b'\n');
            match rendered.target {
                Target::Data => handle.write_data(&framed)?,
                Target::Schema => handle.write_schema(&framed)?,
            }
        }
        Ok(rendered.len())
    }

    /// Render with the handle's options and write.
    pub fn write(&self, handle: &mut OutputHandle, statement: &Statement) -> Result<usize> {
        let rendered = self.render(handle.options(), statement);
        self.write_rendered(handle, &rendered)
    }
}

fn push_name(out: &mut Vec<u8>, options: Options, name: &ObjectName) {
    let display = name.display(options.contains(Options::STATIC_DATABASE));
    out.extend_from_slice(display.to_string().as_bytes());
}

fn render_insert(options: Options, insert: &Insert, row: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(row.len() + 64);
    if options.contains(Options::INSERT_OVERWRITE) {
        line.extend_from_slice(b"REPLACE INTO ");
    } else if options.contains(Options::INSERT_IGNORE) {
        line.extend_from_slice(b"INSERT IGNORE INTO ");
    } else {
        line.extend_from_slice(b"INSERT INTO ");
    }
    push_name(&mut line, options, &insert.table);
    if !insert.partitions.is_empty() {
        let partitions: Vec<String> = insert
            .partitions
            .iter()
            .map(|p| quote_ident(p).to_string())
            .collect();
        line.extend_from_slice(format!(" PARTITION ({})", partitions.join(", ")).as_bytes());
    }
    if let Some(columns) = insert.columns {
        line.push(b' ');
        line.extend_from_slice(columns);
    }
    line.extend_from_slice(b" VALUES ");
    line.extend_from_slice(row);
    line.push(b';');
    line
}

fn render_drop_table(options: Options, table: &ObjectName, temporary: bool) -> Vec<u8> {
    let mut line = Vec::with_capacity(64);
    line.extend_from_slice(if temporary {
        &b"DROP TEMPORARY TABLE "[..]
    } else {
        &b"DROP TABLE "[..]
    });
    if options.contains(Options::DROP_TABLE_IF_EXISTS) {
        line.extend_from_slice(b"IF EXISTS ");
    }
    push_name(&mut line, options, table);
    line.push(b';');
    line
}

fn create_table_head(options: Options, table: &ObjectName, temporary: bool) -> Vec<u8> {
    let mut line = Vec::with_capacity(64);
    line.extend_from_slice(if temporary {
        &b"CREATE TEMPORARY TABLE "[..]
    } else {
        &b"CREATE TABLE "[..]
    });
    if options.contains(Options::CREATE_TABLE_IF_NOT_EXISTS) {
        line.extend_from_slice(b"IF NOT EXISTS ");
    }
    push_name(&mut line, options, table);
    line
}
