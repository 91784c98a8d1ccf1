use anyhow::{bail, Context, Result};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use querylens::collector::{Collector, Payload, UnitKind, UnitOfWork};
use querylens::config::{self, Config};
use querylens::query::{Caller, DiagnosticRecord, N1Detector, QueryEvent};
use serde::Deserialize;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::info;

/// Longest pattern shown in the findings table
const MAX_PATTERN_WIDTH: usize = 80;

/// One line of the query log
#[derive(Debug, Deserialize)]
struct LoggedQuery {
    #[serde(flatten)]
    event: QueryEvent,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<u32>,
}

/// Execute the analyze command
pub async fn execute(
    config_path: Option<&Path>,
    file: PathBuf,
    threshold: Option<usize>,
    json: bool,
    send: bool,
) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    let threshold = threshold.unwrap_or(cfg.detector.threshold);
    if threshold == 0 {
        bail!("--threshold must be at least 1");
    }

    let queries = read_queries(&file)?;
    let total = queries.len();
    info!(file = %file.display(), queries = total, threshold, "Analyzing query log");

    let mut unit = UnitOfWork::new(
        UnitKind::Console,
        format!("analyze {}", file.display()),
        N1Detector::new(threshold),
    );
    for logged in queries {
        let caller = Caller {
            file: logged.file,
            line: logged.line,
        };
        let event = QueryEvent::new(logged.event.sql, logged.event.duration_ms)
            .with_bindings(logged.event.bindings);
        unit.log_query(event, caller);
    }
    let patterns = unit.ledger().pattern_counts().len();
    let payload = unit.finish();

    if json {
        match &payload {
            Some(payload) => println!("{}", serde_json::to_string_pretty(payload)?),
            None => println!("null"),
        }
    } else {
        print_findings(total, patterns, threshold, payload.as_ref());
    }

    if send {
        deliver(cfg, payload).await?;
    }

    Ok(())
}

fn read_queries(file: &Path) -> Result<Vec<LoggedQuery>> {
    let reader: Box<dyn BufRead> = if file == Path::new("-") {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let handle = std::fs::File::open(file)
            .with_context(|| format!("Failed to open query log {}", file.display()))?;
        Box::new(BufReader::new(handle))
    };
    parse_queries(reader)
}

/// Parse JSON lines; blank lines are skipped, anything else must be a query event.
fn parse_queries<R: BufRead>(reader: R) -> Result<Vec<LoggedQuery>> {
    let mut queries = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let query: LoggedQuery = serde_json::from_str(&line)
            .with_context(|| format!("Invalid query event on line {}", number + 1))?;
        queries.push(query);
    }
    Ok(queries)
}

async fn deliver(cfg: Config, payload: Option<Payload>) -> Result<()> {
    let Some(payload) = payload else {
        println!("{}", "Nothing to send".yellow());
        return Ok(());
    };

    let collector = Collector::new(cfg)?;
    if !collector.is_enabled() {
        bail!("Collection is disabled or no token is configured");
    }

    collector.send(&payload).await?;
    println!(
        "{} {}",
        "✓ Payload delivered, trace".green(),
        payload.trace_id.bold()
    );
    Ok(())
}

fn print_findings(total: usize, patterns: usize, threshold: usize, payload: Option<&Payload>) {
    println!(
        "{} {} queries, {} distinct patterns, threshold {}",
        "Analyzed".bold(),
        total,
        patterns,
        threshold
    );

    let findings = payload.map(|p| p.queries.as_slice()).unwrap_or_default();
    if findings.is_empty() {
        println!("{}", "✓ No N+1 patterns detected".green());
        return;
    }

    println!(
        "{}",
        format!("✗ {} N+1 pattern(s) detected", findings.len()).red().bold()
    );
    println!("{}", findings_table(findings));
}

fn findings_table(findings: &[DiagnosticRecord]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("#").fg(Color::Cyan),
        Cell::new("PATTERN").fg(Color::Cyan),
        Cell::new("COUNT").fg(Color::Cyan),
        Cell::new("TOTAL MS").fg(Color::Cyan),
        Cell::new("CALLER").fg(Color::Cyan),
    ]);

    for (i, record) in findings.iter().enumerate() {
        let offender = &record.span_evidence.offender;
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(truncate_pattern(&offender.sql)),
            Cell::new(offender.count),
            Cell::new(format!("{:.2}", offender.total_duration_ms)),
            Cell::new(format_caller(record)),
        ]);
    }

    table
}

fn truncate_pattern(sql: &str) -> String {
    if sql.chars().count() <= MAX_PATTERN_WIDTH {
        sql.to_string()
    } else {
        let cut: String = sql.chars().take(MAX_PATTERN_WIDTH - 3).collect();
        format!("{}...", cut)
    }
}

fn format_caller(record: &DiagnosticRecord) -> String {
    match (&record.caller_file, record.caller_line) {
        (Some(file), Some(line)) => format!("{}:{}", file, line),
        (Some(file), None) => file.clone(),
        _ => "-".to_string(),
    }
}
