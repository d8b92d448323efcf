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

//! Statement model
//!
//! Statements borrow from the fragment they were parsed from. Names are
//! already de-quoted; value rows and column lists are kept verbatim.

mod ident;

pub use self::ident::{quote_ident, unquote_ident, QuotedIdent};

use std::borrow::Cow;
use std::fmt;

/// A possibly database-qualified table name, e.g. `` `db`.`users` ``
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectName<'a> {
    pub database: Option<Cow<'a, str>>,
    pub name: Cow<'a, str>,
}

impl<'a> ObjectName<'a> {
    pub fn new<N: Into<Cow<'a, str>>>(name: N) -> Self {
        ObjectName {
            database: None,
            name: name.into(),
        }
    }

    pub fn qualified<D, N>(database: D, name: N) -> Self
    where
        D: Into<Cow<'a, str>>,
        N: Into<Cow<'a, str>>,
    {
        ObjectName {
            database: Some(database.into()),
            name: name.into(),
        }
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Fill in the database for an unqualified name.
    pub fn default_database(&mut self, database: &str) {
        if self.database.is_none() {
            self.database = Some(Cow::Owned(database.to_string()));
        }
    }

    /// Display form, with or without the database prefix.
    pub fn display(&self, with_database: bool) -> DisplayObjectName<'_> {
        DisplayObjectName {
            database: if with_database {
                self.database.as_deref()
            } else {
                None
            },
            name: &self.name,
        }
    }
}

pub struct DisplayObjectName<'a> {
    database: Option<&'a str>,
    name: &'a str,
}

impl<'a> fmt::Display for DisplayObjectName<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(db) = self.database {
            write!(f, "{}.", quote_ident(db))?;
        }
        write!(f, "{}", quote_ident(self.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert<'a> {
    pub table: ObjectName<'a>,
    /// `PARTITION (p0, p1)` names, empty when absent.
    pub partitions: Vec<Cow<'a, str>>,
    /// Raw `(a,b)` text including the parentheses.
    pub columns: Option<&'a [u8]>,
    /// Raw `(1,2)` spans, one per row.
    pub rows: Vec<&'a [u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    DropTable,
    CreateTableLike,
    CreateTable,
    DropDatabase,
    CreateDatabase,
    Use,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            StatementKind::Insert => "INSERT",
            StatementKind::DropTable => "DROP TABLE",
            StatementKind::CreateTableLike => "CREATE TABLE LIKE",
            StatementKind::CreateTable => "CREATE TABLE",
            StatementKind::DropDatabase => "DROP DATABASE",
            StatementKind::CreateDatabase => "CREATE DATABASE",
            StatementKind::Use => "USE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement<'a> {
    Insert(Insert<'a>),
    DropTable {
        table: ObjectName<'a>,
        temporary: bool,
    },
    CreateTableLike {
        table: ObjectName<'a>,
        source: ObjectName<'a>,
        temporary: bool,
    },
    /// `CREATE TABLE name (...)`, the definition is kept raw.
    CreateTable {
        table: ObjectName<'a>,
        temporary: bool,
        definition: &'a [u8],
    },
    DropDatabase {
        database: Cow<'a, str>,
    },
    CreateDatabase {
        database: Cow<'a, str>,
    },
    Use {
        database: Cow<'a, str>,
    },
}

impl<'a> Statement<'a> {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::Insert(_) => StatementKind::Insert,
            Statement::DropTable { .. } => StatementKind::DropTable,
            Statement::CreateTableLike { .. } => StatementKind::CreateTableLike,
            Statement::CreateTable { .. } => StatementKind::CreateTable,
            Statement::DropDatabase { .. } => StatementKind::DropDatabase,
            Statement::CreateDatabase { .. } => StatementKind::CreateDatabase,
            Statement::Use { .. } => StatementKind::Use,
        }
    }

    /// The table this statement writes to, if it is table-level.
    pub fn table(&self) -> Option<&ObjectName<'a>> {
        match self {
            Statement::Insert(insert) => Some(&insert.table),
            Statement::DropTable { table, .. }
            | Statement::CreateTableLike { table, .. }
            | Statement::CreateTable { table, .. } => Some(table),
            _ => None,
        }
    }

    /// The database this statement belongs to, when known.
    pub fn database(&self) -> Option<&str> {
        match self {
            Statement::DropDatabase { database }
            | Statement::CreateDatabase { database }
            | Statement::Use { database } => Some(&**database),
            _ => self.table().and_then(|t| t.database()),
        }
    }

    /// Qualify unqualified table references with `database`.
    pub fn default_database(&mut self, database: &str) {
        match self {
            Statement::Insert(insert) => insert.table.default_database(database),
            Statement::DropTable { table, .. } | Statement::CreateTable { table, .. } => {
                table.default_database(database)
            }
            Statement::CreateTableLike { table, source, .. } => {
                table.default_database(database);
                source.default_database(database);
            }
            _ => {}
        }
    }

    /// True for statements that belong in a schema file.
    pub fn is_schema(&self) -> bool {
        !matches!(self, Statement::Insert(_) | Statement::Use { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_name_display() {
        let name = ObjectName::qualified("db", "users");
        assert_eq!(name.display(true).to_string(), "`db`.`users`");
        assert_eq!(name.display(false).to_string(), "`users`");
        assert_eq!(ObjectName::new("users").display(true).to_string(), "`users`");
    }

    #[test]
    fn default_database_only_fills_missing() {
        let mut stmt = Statement::CreateTableLike {
            table: ObjectName::new("copy"),
            source: ObjectName::qualified("other", "orig"),
            temporary: false,
        };
        stmt.default_database("main");
        match &stmt {
            Statement::CreateTableLike { table, source, .. } => {
                assert_eq!(table.database(), Some("main"));
                assert_eq!(source.database(), Some("other"));
            }
            _ => unreachable!(),
        }
        assert_eq!(stmt.database(), Some("main"));
        assert_eq!(stmt.kind(), StatementKind::CreateTableLike);
        assert!(stmt.is_schema());
    }
}
