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

use clap::{ArgAction, Parser, ValueEnum};
use log::{error, info, Level};
use std::io;
use std::path::PathBuf;
use std::process;

use mysqldump_splitter::{
    file_pipeline, Config, CreateLikeGate, DumpSplitter, Error, ErrorPolicy, Options, Result,
    DEFAULT_MAX_OPEN_FILES, DEFAULT_PIPE_CAPACITY,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Gate {
    DropTable,
    CreateTable,
}

/// Split a mysqldump into per-database or per-table SQL files
#[derive(Debug, Parser)]
#[command(name = "mysqldump-splitter", version)]
struct Cli {
    /// Dump to read, `-` for stdin
    #[arg(value_name = "DUMP", default_value = "-")]
    input: PathBuf,

    /// Output directory
    #[arg(short, long, value_name = "DIR", default_value = "./")]
    output: PathBuf,

    /// Raw option bits, combined with the flags below
    #[arg(long, value_name = "BITS", default_value_t = 0)]
    options: u32,

    /// One file per table instead of per database
    #[arg(long)]
    per_table: bool,
    #[arg(long)]
    drop_database: bool,
    #[arg(long)]
    create_database: bool,
    #[arg(long)]
    drop_table: bool,
    /// Emit DROP TABLE IF EXISTS
    #[arg(long)]
    drop_table_if_exists: bool,
    /// Keep CREATE TABLE statements (and write schema files in per-table mode)
    #[arg(long)]
    create_table: bool,
    #[arg(long)]
    create_table_if_not_exists: bool,
    /// Rewrite INSERT as REPLACE
    #[arg(long)]
    insert_overwrite: bool,
    #[arg(long)]
    insert_ignore: bool,
    /// Qualify table names with their database
    #[arg(long)]
    static_database: bool,

    /// Which flag lets CREATE TABLE ... LIKE through
    #[arg(long, value_enum, default_value = "drop-table")]
    create_like_gate: Gate,

    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_OPEN_FILES)]
    max_open_files: usize,

    /// Statement terminator, may be repeated. Understands \n \r \t \\ and \xNN
    #[arg(long = "terminator", value_name = "BYTES", action = ArgAction::Append)]
    terminators: Vec<String>,

    /// Read buffer between the input and the splitter, 0 for unbounded
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_PIPE_CAPACITY)]
    pipe_capacity: usize,

    /// Database for statements that come before any USE
    #[arg(long, value_name = "NAME")]
    default_database: Option<String>,

    /// Permissions of created files, in octal
    #[arg(long, value_name = "MODE", default_value = "644", value_parser = parse_mode)]
    file_mode: u32,

    /// Skip statements that cannot be parsed or routed instead of stopping
    #[arg(long)]
    skip_errors: bool,

    /// More output, repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn log_level(&self) -> Level {
        if self.quiet {
            return Level::Error;
        }
        match self.verbose {
            0 => Level::Warn,
            1 => Level::Info,
            2 => Level::Debug,
            _ => Level::Trace,
        }
    }

    /// Raw bits plus every flag given by name. Named flags only ever add.
    fn options(&self) -> Result<Options> {
        let mut options = Options::from_bits(self.options)?;
        let flags = [
            (self.per_table, Options::PER_TABLE),
            (self.drop_database, Options::DROP_DATABASE),
            (self.create_database, Options::CREATE_DATABASE),
            (self.drop_table, Options::DROP_TABLE),
            (self.drop_table_if_exists, Options::DROP_TABLE_IF_EXISTS),
            (self.create_table, Options::CREATE_TABLE),
            (self.create_table_if_not_exists, Options::CREATE_TABLE_IF_NOT_EXISTS),
            (self.insert_overwrite, Options::INSERT_OVERWRITE),
            (self.insert_ignore, Options::INSERT_IGNORE),
            (self.static_database, Options::STATIC_DATABASE),
        ];
        for &(enabled, flag) in flags.iter() {
            if enabled {
                options |= flag;
            }
        }
        Ok(options)
    }

    fn config(&self) -> Result<Config> {
        let mut config = Config::new(&self.output, self.options()?);
        config.max_open_files = self.max_open_files;
        config.pipe_capacity = self.pipe_capacity;
        config.default_database = self.default_database.clone();
        config.file_mode = self.file_mode;
        config.create_like_gate = match self.create_like_gate {
            Gate::DropTable => CreateLikeGate::DropTable,
            Gate::CreateTable => CreateLikeGate::CreateTable,
        };
        if self.skip_errors {
            config.on_error = ErrorPolicy::Skip;
        }
        if !self.terminators.is_empty() {
            config.terminators = self
                .terminators
                .iter()
                .map(|t| unescape(t))
                .collect::<Result<_>>()?;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_mode(mode: &str) -> std::result::Result<u32, String> {
    u32::from_str_radix(mode, 8).map_err(|e| format!("invalid octal mode {:?}: {}", mode, e))
}

/// Decode the escapes accepted in `--terminator`.
fn unescape(text: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    let mut bytes = text.bytes();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b't') => out.push(b'\t'),
            Some(b'0') => out.push(0),
            Some(b'\\') => out.push(b'\\'),
            Some(b'x') => {
                let hex: Vec<u8> = bytes.by_ref().take(2).collect();
                let byte = std::str::from_utf8(&hex)
                    .ok()
                    .filter(|h| h.len() == 2)
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| Error::Config(format!("bad \\x escape in {:?}", text)))?;
                out.push(byte);
            }
            _ => {
                return Err(Error::Config(format!(
                    "unknown escape in terminator {:?}",
                    text
                )))
            }
        }
    }
    Ok(out)
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.config()?;
    let pipe_capacity = config.pipe_capacity;
    let mut splitter = DumpSplitter::new(config)?;

    if cli.input.as_os_str() == "-" {
        info!("reading from stdin");
        let stdin = io::stdin();
        splitter.process(stdin.lock())?;
    } else {
        info!("reading {}", cli.input.display());
        let (reader, producer) = file_pipeline(&cli.input, pipe_capacity)?;
        let processed = splitter.process(reader);
        let produced = producer
            .join()
            .map_err(|_| Error::Config("dump reader thread panicked".to_string()))?;
        processed?;
        produced?;
    }

    let stats = splitter.finish()?;
    info!(
        "done: {} statements into {} files",
        stats.statements, stats.pool.opened
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = simple_logger::init_with_level(cli.log_level()) {
        eprintln!("cannot initialise logging: {}", e);
    }

    if let Err(e) = run(&cli) {
        error!("{}", e);
        process::exit(1);
    }
}
