mod glob_util;
mod load;
mod rewrite;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use sql_loader::config::LoaderConfig;
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sql-loader")]
#[command(author = "Helge Sverre <helge.sverre@gmail.com>")]
#[command(version)]
#[command(
    about = "Load legacy SQL dumps into DuckDB, rewriting the dialect on the fly",
    long_about = None
)]
pub struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn verbosity(&self) -> i8 {
        if self.quiet {
            -1
        } else {
            self.verbose.min(i8::MAX as u8) as i8
        }
    }
}

/// Flags shared by every command that rewrites statements
#[derive(Args, Debug, Clone, Default)]
pub struct RewriteFlags {
    /// Schema qualifier to replace (default: replace any qualifier)
    #[arg(long)]
    pub source_schema: Option<String>,

    /// Schema written into rewritten statements [default: public]
    #[arg(long)]
    pub target_schema: Option<String>,

    /// Table name prefix to strip (e.g. V_HIS_)
    #[arg(long)]
    pub strip_prefix: Option<String>,

    /// Encoding hint for source files (utf-8, gbk, big5, latin-1, ...)
    #[arg(short, long)]
    pub encoding: Option<String>,

    /// YAML config file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl RewriteFlags {
    /// Config file (or defaults) with these flags applied on top
    pub fn resolve_config(&self) -> anyhow::Result<LoaderConfig> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::load(path)?,
            None => LoaderConfig::default(),
        };
        if let Some(s) = &self.source_schema {
            config.source_schema = Some(s.clone());
        }
        if let Some(s) = &self.target_schema {
            config.target_schema = s.clone();
        }
        if let Some(p) = &self.strip_prefix {
            config.strip_table_prefix = Some(p.clone());
        }
        if let Some(e) = &self.encoding {
            config.encoding = e.clone();
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load SQL dump files into a DuckDB database
    Load {
        /// Input SQL file, glob pattern (e.g. dumps/*.sql) or directory
        /// Supports .gz, .bz2, .xz, .zst compression
        file: PathBuf,

        /// DuckDB database file to load into, created if missing
        /// (default: in-memory, useful as a dry run)
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// SQL file executed once before loading (e.g. CREATE TABLE statements)
        #[arg(long)]
        init_sql: Option<PathBuf>,

        #[command(flatten)]
        rewrite: RewriteFlags,

        /// Number of worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Statements per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Chunks allowed in flight [default: 2 x workers]
        #[arg(long)]
        queue_depth: Option<usize>,

        /// Per-statement timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Attempts per statement for retryable errors
        #[arg(long)]
        max_retries: Option<u32>,

        /// Stop the whole run on the first failed statement
        #[arg(long)]
        stop_on_error: bool,

        /// Encoding the target expects; unrepresentable statements fail
        #[arg(long)]
        target_encoding: Option<String>,

        /// Table name for a single input file (default: derived from file name)
        #[arg(short, long)]
        table: Option<String>,

        /// Show progress during loading
        #[arg(short, long)]
        progress: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rewrite a dump without executing it
    Rewrite {
        /// Input SQL file (supports .gz, .bz2, .xz, .zst compression)
        file: PathBuf,

        /// Output SQL file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        rewrite: RewriteFlags,

        /// Also copy non-data statements (DDL, session commands) through
        #[arg(long)]
        keep_other: bool,

        /// Output rule counts and warnings as JSON on stderr
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Load {
            file,
            database,
            init_sql,
            rewrite: flags,
            workers,
            chunk_size,
            queue_depth,
            timeout,
            max_retries,
            stop_on_error,
            target_encoding,
            table,
            progress,
            json,
        } => {
            let mut config = flags.resolve_config()?;
            if let Some(n) = workers {
                config.workers = n;
            }
            if let Some(n) = chunk_size {
                config.chunk_size = n;
            }
            if queue_depth.is_some() {
                config.queue_depth = queue_depth;
            }
            if let Some(secs) = timeout {
                config.statement_timeout_secs = secs;
            }
            if let Some(n) = max_retries {
                config.retry.max_attempts = n;
            }
            if stop_on_error {
                config.stop_on_error = true;
            }
            if let Some(e) = target_encoding {
                config.target_encoding = e;
            }
            load::run(load::LoadArgs {
                file,
                database,
                init_sql,
                config,
                table,
                progress,
                json,
            })
        }
        Commands::Rewrite {
            file,
            output,
            rewrite: flags,
            keep_other,
            json,
        } => {
            let config = flags.resolve_config()?;
            rewrite::run(file, output, config, keep_other, json)
        }
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "sql-loader", &mut io::stdout());
            Ok(())
        }
    }
}
