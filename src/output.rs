//! Terminal rendering for query results and run summaries

use tabled::{Table, Tabled, settings::Style};

use crate::query::{CredentialFinding, ImpactRow, TableUsage};
use crate::scan::ScanStats;
use crate::storage::DbStats;

#[derive(Tabled)]
struct ImpactLine {
    #[tabled(rename = "Depth")]
    depth: u32,
    #[tabled(rename = "Program")]
    program: String,
}

pub fn impact_table(rows: &[ImpactRow]) -> String {
    let lines: Vec<ImpactLine> = rows
        .iter()
        .map(|row| ImpactLine {
            depth: row.depth,
            program: row.program_path.clone(),
        })
        .collect();
    render(&lines)
}

#[derive(Tabled)]
struct UsageLine {
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Program")]
    program: String,
    #[tabled(rename = "Engine")]
    engine: String,
    #[tabled(rename = "Line")]
    line: u32,
}

pub fn usage_table(rows: &[TableUsage]) -> String {
    let lines: Vec<UsageLine> = rows
        .iter()
        .map(|row| UsageLine {
            operation: row.operation.clone(),
            program: row.program_path.clone(),
            engine: row.engine.clone(),
            line: row.source_line,
        })
        .collect();
    render(&lines)
}

#[derive(Tabled)]
struct CredentialLine {
    #[tabled(rename = "Program")]
    program: String,
    #[tabled(rename = "Finding")]
    finding: String,
}

pub fn credential_table(rows: &[CredentialFinding]) -> String {
    let lines: Vec<CredentialLine> = rows
        .iter()
        .flat_map(|row| {
            row.findings.iter().map(|finding| CredentialLine {
                program: row.program_path.clone(),
                finding: finding.clone(),
            })
        })
        .collect();
    render(&lines)
}

#[derive(Tabled)]
struct MetricLine {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
}

pub fn scan_summary_table(stats: &ScanStats) -> String {
    metrics(&[
        ("Scanned", stats.scanned),
        ("Skipped (unchanged)", stats.skipped),
        ("Errors", stats.errors),
        ("Removed", stats.removed),
    ])
}

pub fn stats_table(stats: &DbStats) -> String {
    metrics(&[
        ("Programs", stats.programs),
        ("Table operations", stats.table_operations),
        ("Dependencies", stats.dependencies),
        ("Libname mappings", stats.libname_mappings),
        ("Programs with credential findings", stats.flagged_programs),
    ])
}

fn metrics(entries: &[(&str, usize)]) -> String {
    let lines: Vec<MetricLine> = entries
        .iter()
        .map(|(metric, value)| MetricLine {
            metric: metric.to_string(),
            value: value.to_string(),
        })
        .collect();
    render(&lines)
}

fn render<T: Tabled>(lines: &[T]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    Table::new(lines).with(Style::rounded()).to_string()
}
