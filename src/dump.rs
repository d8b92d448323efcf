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

//! Dump splitting driver
//!
//! Splits the input into fragments, parses each one, works out which
//! database and table it belongs to, and writes the rendered statements
//! through the output pool.

use log::{debug, info, warn};
use std::io::Read;

use crate::ast::Statement;
use crate::config::{Config, ErrorPolicy, Options};
use crate::error::{Error, Result};
use crate::parser::{self, ParseError};
use crate::pool::{FileOpener, OutputFilePool, PoolKey, PoolStats, SinkOpener};
use crate::splitter::StatementSplitter;
use crate::writer::StatementWriter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Fragments read from the input.
    pub fragments: u64,
    /// Statements written to an output.
    pub statements: u64,
    /// INSERT rows seen.
    pub rows: u64,
    /// Fragments that were not recognised, or were gated off.
    pub ignored: u64,
    /// Fragments dropped because of an error under [`ErrorPolicy::Skip`].
    pub skipped: u64,
    pub pool: PoolStats,
}

pub struct DumpSplitter {
    config: Config,
    pool: OutputFilePool,
    writer: StatementWriter,
    current_database: Option<String>,
    stats: RunStats,
}

impl DumpSplitter {
    pub fn new(config: Config) -> Result<Self> {
        let opener = FileOpener {
            mode: config.file_mode,
        };
        Self::with_opener(config, Box::new(opener))
    }

    /// Write through `opener` instead of the file system.
    pub fn with_opener(config: Config, opener: Box<dyn SinkOpener>) -> Result<Self> {
        config.validate()?;
        let pool = OutputFilePool::with_opener(
            &config.output_root,
            config.options,
            config.max_open_files,
            opener,
        )?;
        info!(
            "splitting into {} with options {}",
            config.output_root.display(),
            config.options
        );
        Ok(DumpSplitter {
            writer: StatementWriter::new(config.create_like_gate),
            current_database: config.default_database.clone(),
            config,
            pool,
            stats: RunStats::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &OutputFilePool {
        &self.pool
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            pool: self.pool.stats(),
            ..self.stats
        }
    }

    /// Database selected by the last `USE`, or the configured default.
    pub fn current_database(&self) -> Option<&str> {
        self.current_database.as_deref()
    }

    /// Split everything `reader` yields.
    pub fn process<R: Read>(&mut self, reader: R) -> Result<()> {
        let splitter = StatementSplitter::new(reader, &self.config.terminators)?;
        for fragment in splitter {
            let fragment = fragment?;
            self.stats.fragments += 1;
            let index = self.stats.fragments;
            if let Err(e) = self.process_fragment(index, &fragment) {
                match self.config.on_error {
                    ErrorPolicy::Skip if e.is_parse() => {
                        warn!("skipping {}", e);
                        self.stats.skipped += 1;
                    }
                    _ => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Handle one fragment. `index` is only used for error reporting.
    pub fn process_fragment(&mut self, index: u64, fragment: &[u8]) -> Result<()> {
        let mut statement = match parser::parse(fragment) {
            Ok(statement) => statement,
            Err(ParseError::Empty) => return Ok(()),
            Err(ParseError::Unsupported(what)) => {
                debug!("ignoring statement {}: {}", index, what);
                self.stats.ignored += 1;
                return Ok(());
            }
            Err(e) => {
                return Err(Error::Statement {
                    index,
                    destination: "unparsed".to_string(),
                    source: Box::new(e.into()),
                })
            }
        };

        if let Statement::Use { database } = &statement {
            debug!("switching to database {}", database);
            self.current_database = Some(database.to_string());
            return Ok(());
        }

        if let Some(database) = self.current_database.as_deref() {
            statement.default_database(database);
        }
        let (database, table) = self.route(&statement).map_err(|e| Error::Statement {
            index,
            destination: describe(&statement),
            source: Box::new(e),
        })?;

        let rendered = self.writer.render(self.config.options, &statement);
        if let Statement::Insert(insert) = &statement {
            self.stats.rows += insert.rows.len() as u64;
        }
        if rendered.is_empty() {
            debug!("statement {} ({}) produced no output", index, statement.kind());
            self.stats.ignored += 1;
            return Ok(());
        }

        let writer = self.writer;
        let written = self
            .pool
            .get(&database, &table)
            .and_then(|handle| writer.write_rendered(handle, &rendered))
            .map_err(|e| Error::Statement {
                index,
                destination: PoolKey::new(&database, &table).to_string(),
                source: Box::new(e),
            })?;
        self.stats.statements += written as u64;
        Ok(())
    }

    /// The pool key for a statement.
    fn route(&self, statement: &Statement) -> Result<(String, String)> {
        let database = statement
            .database()
            .ok_or_else(|| Error::UnknownDatabase(describe(statement)))?
            .to_string();
        let table = match statement.table() {
            Some(table) if self.config.options.contains(Options::PER_TABLE) => {
                table.name.to_string()
            }
            _ => String::new(),
        };
        Ok((database, table))
    }

    /// Close every output. Returns the final counters.
    pub fn finish(mut self) -> Result<RunStats> {
        let stats = self.stats();
        self.pool.close_all()?;
        info!(
            "{} fragments, {} statements ({} rows) written, {} ignored, {} skipped, {} files opened, {} evicted",
            stats.fragments,
            stats.statements,
            stats.rows,
            stats.ignored,
            stats.skipped,
            stats.pool.opened,
            stats.pool.evicted
        );
        Ok(stats)
    }
}

fn describe(statement: &Statement) -> String {
    match statement.table() {
        Some(table) => format!("{} {}", statement.kind(), table.display(true)),
        None => statement.kind().to_string(),
    }
}

/// Split `reader` according to `config` in one go.
pub fn split_dump<R: Read>(config: Config, reader: R) -> Result<RunStats> {
    let mut splitter = DumpSplitter::new(config)?;
    splitter.process(reader)?;
    splitter.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CreateLikeGate;
    use crate::pool::tests::MemoryOpener;
    use crate::pool::{CLOSING_FRAMING, OPENING_FRAMING};
    use matches::assert_matches;

    fn splitter(options: Options) -> (DumpSplitter, MemoryOpener) {
        let opener = MemoryOpener::default();
        let config = Config::new("out", options);
        let splitter = DumpSplitter::with_opener(config, Box::new(opener.clone())).unwrap();
        (splitter, opener)
    }

    fn framed(body: &str) -> String {
        format!(
            "{}{}{}",
            String::from_utf8_lossy(OPENING_FRAMING),
            body,
            String::from_utf8_lossy(CLOSING_FRAMING)
        )
    }

    const DUMP: &str = "-- MySQL dump\n\
        USE `shop`;\n\
        DROP TABLE IF EXISTS `users`;\n\
        CREATE TABLE `users` (\n  `id` int NOT NULL\n) ENGINE=InnoDB;\n\
        /*!40000 ALTER TABLE `users` DISABLE KEYS */;\n\
        INSERT INTO `users` VALUES (1,'ann'),(2,'bob');\n\
        INSERT INTO `orders` VALUES (7);\n\
        INSERT INTO `users` VALUES (3,'cy');\n";

    #[test]
    fn per_table_split() {
        let (mut splitter, opener) =
            splitter(Options::PER_TABLE | Options::DROP_TABLE | Options::CREATE_TABLE);
        splitter.process(DUMP.as_bytes()).unwrap();
        let stats = splitter.finish().unwrap();

        assert_eq!(
            opener.contents("out/shop/users.sql"),
            framed(
                "INSERT INTO `users` VALUES (1,'ann');\n\
                 INSERT INTO `users` VALUES (2,'bob');\n\
                 INSERT INTO `users` VALUES (3,'cy');\n"
            )
        );
        assert_eq!(
            opener.contents("out/shop/users-schema.sql"),
            "DROP TABLE `users`;\nCREATE TABLE `users` (\n  `id` int NOT NULL\n) ENGINE=InnoDB;\n"
        );
        assert_eq!(
            opener.contents("out/shop/orders.sql"),
            framed("INSERT INTO `orders` VALUES (7);\n")
        );
        assert_eq!(stats.statements, 6);
        assert_eq!(stats.rows, 4);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.pool.opened, 2);
    }

    #[test]
    fn per_database_split_keeps_order() {
        let (mut splitter, opener) = splitter(Options::DROP_TABLE | Options::STATIC_DATABASE);
        splitter.process(DUMP.as_bytes()).unwrap();
        splitter.finish().unwrap();
        assert_eq!(
            opener.contents("out/shop.sql"),
            framed(
                "DROP TABLE `shop`.`users`;\n\
                 INSERT INTO `shop`.`users` VALUES (1,'ann');\n\
                 INSERT INTO `shop`.`users` VALUES (2,'bob');\n\
                 INSERT INTO `shop`.`orders` VALUES (7);\n\
                 INSERT INTO `shop`.`users` VALUES (3,'cy');\n"
            )
        );
    }

    #[test]
    fn qualified_names_route_by_their_database() {
        let (mut splitter, opener) = splitter(Options::PER_TABLE);
        splitter
            .process(&b"insert into `a`.`t` values (1);\ninsert into b.t values (2);\n"[..])
            .unwrap();
        splitter.finish().unwrap();
        assert!(opener.contents("out/a/t.sql").contains("VALUES (1);"));
        assert!(opener.contents("out/b/t.sql").contains("VALUES (2);"));
    }

    #[test]
    fn unknown_database_is_an_error() {
        let (mut splitter, _) = splitter(Options::PER_TABLE);
        let err = splitter.process(&b"insert into t values (1);\n"[..]).unwrap_err();
        assert!(err.is_parse());
        match err {
            Error::Statement { index, source, .. } => {
                assert_eq!(index, 1);
                assert_matches!(*source, Error::UnknownDatabase(_));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn default_database_applies_before_use() {
        let opener = MemoryOpener::default();
        let mut config = Config::new("out", Options::PER_TABLE);
        config.default_database = Some("fallback".to_string());
        let mut splitter = DumpSplitter::with_opener(config, Box::new(opener.clone())).unwrap();
        splitter
            .process(&b"insert into t values (1);\nuse other;\ninsert into t values (2);\n"[..])
            .unwrap();
        assert_eq!(splitter.current_database(), Some("other"));
        splitter.finish().unwrap();
        assert!(opener.contents("out/fallback/t.sql").contains("VALUES (1);"));
        assert!(opener.contents("out/other/t.sql").contains("VALUES (2);"));
    }

    #[test]
    fn skip_policy_only_skips_parse_errors() {
        let opener = MemoryOpener::default();
        let mut config = Config::new("out", Options::PER_TABLE);
        config.on_error = ErrorPolicy::Skip;
        config.default_database = Some("d".to_string());
        let mut splitter = DumpSplitter::with_opener(config, Box::new(opener.clone())).unwrap();
        splitter
            .process(&b"insert into t values (1;\ninsert into t values (2);\n"[..])
            .unwrap();
        let stats = splitter.finish().unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.statements, 1);
    }

    #[test]
    fn abort_policy_stops_at_first_error() {
        let (mut splitter, opener) = splitter(Options::PER_TABLE);
        let err = splitter
            .process(&b"use d;\ninsert into t values (1;\ninsert into t values (2);\n"[..])
            .unwrap_err();
        assert_matches!(err, Error::Statement { index: 2, .. });
        splitter.finish().unwrap();
        assert_eq!(opener.contents("out/d/t.sql"), "");
    }

    #[test]
    fn database_statements_go_to_database_key() {
        let options = Options::PER_TABLE
            | Options::DROP_DATABASE
            | Options::CREATE_DATABASE
            | Options::CREATE_TABLE;
        let (mut splitter, opener) = splitter(options);
        splitter
            .process(&b"DROP DATABASE IF EXISTS `shop`;\nCREATE DATABASE `shop`;\n"[..])
            .unwrap();
        splitter.finish().unwrap();
        assert_eq!(
            opener.contents("out/shop-schema.sql"),
            "DROP DATABASE IF EXISTS `shop`;\nCREATE DATABASE IF NOT EXISTS `shop`;\n"
        );
        assert_eq!(opener.contents("out/shop.sql"), framed(""));
    }

    #[test]
    fn create_like_follows_the_configured_gate() {
        let opener = MemoryOpener::default();
        let mut config = Config::new("out", Options::CREATE_TABLE);
        config.create_like_gate = CreateLikeGate::CreateTable;
        config.default_database = Some("d".to_string());
        let mut splitter = DumpSplitter::with_opener(config, Box::new(opener.clone())).unwrap();
        splitter.process(&b"create table t2 like t1;\n"[..]).unwrap();
        splitter.finish().unwrap();
        assert!(opener.contents("out/d.sql").contains("CREATE TABLE `t2` LIKE `t1`;\n"));
    }

    #[test]
    fn gated_statements_open_nothing() {
        let (mut splitter, opener) = splitter(Options::PER_TABLE);
        splitter
            .process(&b"use d;\ndrop table t;\ncreate table t like u;\n"[..])
            .unwrap();
        let stats = splitter.finish().unwrap();
        assert_eq!(stats.ignored, 2);
        assert!(opener.opens.lock().is_empty());
    }

    #[test]
    fn non_table_ddl_does_not_stop_the_run() {
        let (mut splitter, opener) = splitter(Options::PER_TABLE | Options::DROP_TABLE);
        splitter
            .process(
                &b"USE d;\n\
                   INSERT INTO t VALUES (1);\n\
                   CREATE INDEX i ON t (a);\n\
                   CREATE DEFINER=`root`@`localhost` PROCEDURE p() SELECT 1;\n\
                   DROP VIEW IF EXISTS v;\n\
                   INSERT INTO t VALUES (2);\n"[..],
            )
            .unwrap();
        let stats = splitter.finish().unwrap();
        assert_eq!(stats.ignored, 3);
        assert_eq!(stats.statements, 2);
        assert_eq!(
            opener.contents("out/d/t.sql"),
            framed("INSERT INTO `t` VALUES (1);\nINSERT INTO `t` VALUES (2);\n")
        );
    }

    #[test]
    fn multi_table_drop_is_a_parse_error() {
        let (mut splitter, opener) = splitter(Options::PER_TABLE | Options::DROP_TABLE);
        let err = splitter
            .process(&b"use d;\ndrop table if exists a, b;\n"[..])
            .unwrap_err();
        assert!(err.is_parse());
        splitter.finish().unwrap();
        assert!(opener.opens.lock().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = Config::new("out", Options::empty());
        config.max_open_files = 0;
        assert_matches!(
            DumpSplitter::with_opener(config, Box::new(MemoryOpener::default())).err(),
            Some(Error::Config(_))
        );
    }
}
