use anyhow::Context;
use serde::Serialize;
use sql_loader::config::LoaderConfig;
use sql_loader::parser::{classify, strip_leading_noise, StatementScanner};
use sql_loader::rewrite::{DialectRewriter, RuleCount};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Serialize)]
struct RewriteJsonOutput {
    input_file: String,
    encoding: String,
    degraded_encoding: bool,
    statements_read: u64,
    statements_written: u64,
    statements_rewritten: u64,
    elapsed_secs: f64,
    rules: Vec<RuleCount>,
    warnings: Vec<String>,
}

/// Stream a dump through decoding, scanning and rewriting without executing.
pub fn run(
    file: PathBuf,
    output: Option<PathBuf>,
    config: LoaderConfig,
    keep_other: bool,
    json: bool,
) -> anyhow::Result<()> {
    config.validate()?;
    let start_time = Instant::now();

    let opened = config
        .encoding_resolver()
        .open(&file, &config.encoding)
        .with_context(|| format!("opening {}", file.display()))?;
    let resolved = opened.resolved;
    let replacements = opened.reader.replacement_counter();
    let scanner = StatementScanner::new(opened.reader);

    let rewriter = DialectRewriter::new(&config.rewrite_config());
    let stats = rewriter.new_stats();

    let mut writer: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut read = 0u64;
    let mut written = 0u64;
    let mut rewritten = 0u64;
    let mut warnings = Vec::new();

    for item in scanner {
        let stmt = item?;
        read += 1;

        if !classify(&stmt.text).is_data() {
            if keep_other {
                writeln!(writer, "{}", stmt.text)?;
                written += 1;
            }
            continue;
        }

        let out = rewriter.rewrite(strip_leading_noise(&stmt.text), &stats);
        if out.changed {
            rewritten += 1;
        }
        for w in out.warnings {
            warnings.push(format!("byte {}: {}", stmt.span.start, w));
        }
        writeln!(writer, "{}", out.sql)?;
        written += 1;
    }
    writer.flush()?;
    drop(writer);

    let replaced = replacements.load(std::sync::atomic::Ordering::Relaxed);
    let rules: Vec<RuleCount> = stats.snapshot().into_iter().filter(|r| r.count > 0).collect();

    if json {
        let report = RewriteJsonOutput {
            input_file: file.display().to_string(),
            encoding: resolved.name().to_string(),
            degraded_encoding: resolved.degraded || replaced > 0,
            statements_read: read,
            statements_written: written,
            statements_rewritten: rewritten,
            elapsed_secs: start_time.elapsed().as_secs_f64(),
            rules,
            warnings,
        };
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    eprintln!(
        "Rewrote {} of {} statements from {} ({}{})",
        rewritten,
        read,
        file.display(),
        resolved.name(),
        if replaced > 0 {
            format!(", {} replacement characters", replaced)
        } else {
            String::new()
        }
    );
    for rule in &rules {
        eprintln!("  {:>8}  {}", rule.count, rule.rule);
    }
    if !warnings.is_empty() {
        eprintln!("{} warnings:", warnings.len());
        for w in warnings.iter().take(20) {
            eprintln!("  {}", w);
        }
    }
    Ok(())
}
