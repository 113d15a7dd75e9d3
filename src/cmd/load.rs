use super::glob_util::expand_file_pattern;
use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use sql_loader::config::LoaderConfig;
use sql_loader::pipeline::{ImportResult, ImportTask, Loader};
use sql_loader::progress::ProgressSnapshot;
use sql_loader::rewrite::RuleCount;
use sql_loader::store::{duckdb_pool, open_duckdb, use_schema};
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub struct LoadArgs {
    pub file: PathBuf,
    pub database: Option<PathBuf>,
    pub init_sql: Option<PathBuf>,
    pub config: LoaderConfig,
    pub table: Option<String>,
    pub progress: bool,
    pub json: bool,
}

/// JSON output for a load run
#[derive(Serialize)]
struct LoadJsonOutput {
    database: String,
    total_files: usize,
    succeeded: usize,
    failed: usize,
    elapsed_secs: f64,
    statements_processed: u64,
    statements_failed: u64,
    rules: Vec<RuleCount>,
    results: Vec<ImportResult>,
}

pub fn run(args: LoadArgs) -> anyhow::Result<()> {
    let expanded = expand_file_pattern(&args.file)?;
    if args.table.is_some() && expanded.files.len() > 1 {
        anyhow::bail!("--table can only be used with a single input file");
    }

    let config = args.config;
    let target = args
        .database
        .as_ref()
        .map_or_else(|| ":memory:".to_string(), |p| p.display().to_string());
    let conn = open_duckdb(args.database.as_deref())
        .with_context(|| format!("opening {}", target))?;
    use_schema(&conn, &config.target_schema)
        .with_context(|| format!("preparing schema {}", config.target_schema))?;

    if let Some(init) = &args.init_sql {
        let sql = std::fs::read_to_string(init)
            .with_context(|| format!("reading {}", init.display()))?;
        conn.execute_batch(&sql)
            .with_context(|| format!("running {}", init.display()))?;
    }

    let pool = duckdb_pool(conn, config.workers);
    let loader = Loader::new(config.clone(), pool)?;

    let tasks: Vec<ImportTask> = expanded
        .files
        .iter()
        .map(|path| {
            let mut task = ImportTask::for_file(path, &config.encoding, &config.target_encoding);
            if let Some(table) = &args.table {
                task.table_name = table.clone();
            }
            task
        })
        .collect();

    if !args.json {
        let what = if expanded.multiple {
            format!("{} file(s) from {}", tasks.len(), args.file.display())
        } else {
            args.file.display().to_string()
        };
        println!(
            "Loading {} into {} ({} workers, {} statements per chunk)",
            what, target, config.workers, config.chunk_size
        );
        println!();
    }

    let start_time = Instant::now();

    let results = if args.progress && !args.json {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}",
            )?
            .progress_chars("█▓▒░  ")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.enable_steady_tick(Duration::from_millis(100));

        let results = loader.load_all(&tasks, &mut |snap: &ProgressSnapshot| {
            pb.set_length(snap.chunks_total);
            pb.set_position(snap.chunks_completed);
            pb.set_message(format!(
                "{} ok, {} failed",
                snap.statements_processed, snap.statements_failed
            ));
        });
        pb.finish_and_clear();
        results
    } else {
        loader.load_all(&tasks, &mut |_| {})
    };

    let elapsed = start_time.elapsed();
    let failed = results.iter().filter(|r| !r.success).count();
    let rules: Vec<RuleCount> = loader
        .rewrite_stats()
        .snapshot()
        .into_iter()
        .filter(|r| r.count > 0)
        .collect();

    if args.json {
        let output = LoadJsonOutput {
            database: target,
            total_files: results.len(),
            succeeded: results.len() - failed,
            failed,
            elapsed_secs: elapsed.as_secs_f64(),
            statements_processed: results.iter().map(|r| r.processed).sum(),
            statements_failed: results.iter().map(|r| r.failed).sum(),
            rules,
            results,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_report(&results, &rules, elapsed);
    }

    if failed > 0 {
        anyhow::bail!("{} of {} file(s) failed", failed, tasks.len());
    }
    Ok(())
}

fn print_report(results: &[ImportResult], rules: &[RuleCount], elapsed: Duration) {
    for r in results {
        let mark = if r.success { "✓" } else { "✗" };
        println!(
            "{} {} -> {}: {} processed, {} failed, {} skipped ({:.2}s)",
            mark,
            r.file.display(),
            r.table_name,
            r.processed,
            r.failed,
            r.skipped,
            r.elapsed_secs
        );
        if let Some(enc) = &r.encoding {
            if r.degraded_encoding {
                println!(
                    "  encoding: {} (degraded, {} replacement characters)",
                    enc, r.replacements
                );
            }
        }
        if r.unattempted > 0 {
            println!("  {} statements not attempted", r.unattempted);
        }
        if let Some(err) = &r.error {
            println!("  error: {}", err);
        }
        for w in r.warnings.iter().take(5) {
            println!("  warning: {}", w);
        }
        if r.warnings.len() > 5 {
            println!("  ... {} more warnings (use --json for all)", r.warnings.len() - 5);
        }
    }

    if !rules.is_empty() {
        println!();
        println!("Rewrites:");
        for rule in rules {
            println!("  {:>8}  {}", rule.count, rule.rule);
        }
    }

    let processed: u64 = results.iter().map(|r| r.processed).sum();
    let secs = elapsed.as_secs_f64();
    println!();
    println!(
        "Loaded {} statements from {} file(s) in {:.3}s{}",
        processed,
        results.len(),
        secs,
        if secs > 0.0 {
            format!(" ({:.0} statements/s)", processed as f64 / secs)
        } else {
            String::new()
        }
    );
}
