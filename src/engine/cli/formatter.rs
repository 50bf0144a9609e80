//! CLI Output Formatting Module
//! Colorized terminal rendering of engine outcomes, import reports and store stats

use colored::Colorize;

use crate::engine::executor::{EngineOutcome, EngineStatus};
use crate::engine::import::{ImportReport, TargetImportReport};
use crate::engine::model::StoreStats;
use crate::engine::normalize::Record;

pub struct CliFormatter;

impl CliFormatter {
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.chars().count()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    pub fn table_header(columns: &[&str]) {
        let header = columns
            .iter()
            .map(|c| c.bright_white().bold().to_string())
            .collect::<Vec<_>>()
            .join(" │ ");
        println!("  {}", header);
        println!("  {}", "─".repeat(columns.iter().map(|c| c.len() + 3).sum()).bright_black());
    }

    pub fn table_row(values: &[String]) {
        println!("  {}", values.join(" │ "));
    }

    pub fn code_block(code: &str, language: &str) {
        println!("\n{}", format!("```{}", language).bright_black());
        for line in code.lines() {
            println!("  {}", line.bright_white());
        }
        println!("{}\n", "```".bright_black());
    }

    pub fn outcome(outcome: &EngineOutcome) {
        Self::header(&format!("{} engine", outcome.engine));
        match &outcome.status {
            EngineStatus::Ok { result } => {
                Self::kv(
                    "Page",
                    &format!(
                        "{}/{} ({} of {} total)",
                        result.page,
                        result.total_pages,
                        result.items.len(),
                        result.total_count
                    ),
                );
                Self::kv("Time", &format_millis(result.request_time_in_milliseconds));
                if let Some(first) = result.items.first() {
                    Self::table_header(&columns(first));
                    for record in &result.items {
                        Self::table_row(&cells(record));
                    }
                }
            }
            EngineStatus::Error { error } => {
                Self::error(&format!("{}: {}", error.kind, error.message));
            }
        }
    }

    pub fn import_report(report: &ImportReport) {
        for target in &report.targets {
            Self::target_report(target);
        }
    }

    fn target_report(target: &TargetImportReport) {
        Self::header(&format!("{} store import", target.engine));
        Self::kv("Elapsed", &format_millis(target.elapsed_ms));
        for entity in &target.entities {
            let line = format!(
                "{:?}: {} imported of {} ({} duplicates skipped)",
                entity.entity, entity.imported, entity.submitted, entity.duplicates_skipped
            );
            if entity.failures.is_empty() && entity.chunk_failures.is_empty() {
                Self::success(&line);
            } else {
                Self::warning(&line);
                for failure in &entity.failures {
                    println!(
                        "    {} row {} ({}): {:?} {}",
                        "•".bright_black(),
                        failure.row,
                        failure.id,
                        failure.kind,
                        failure.message
                    );
                }
                for failure in &entity.chunk_failures {
                    println!(
                        "    {} chunk {} ({} rows): {}",
                        "•".bright_black(),
                        failure.chunk,
                        failure.rows,
                        failure.message
                    );
                }
            }
        }
    }

    pub fn stats(label: &str, stats: &StoreStats) {
        Self::header(label);
        Self::kv("Articles", &stats.articles.to_string());
        Self::kv("Users", &stats.users.to_string());
        Self::kv("Follows", &stats.follows.to_string());
        Self::kv("Orders", &stats.orders.to_string());
    }
}

fn columns(record: &Record) -> Vec<&'static str> {
    match record {
        Record::Article(_) => vec!["Id", "Name", "Price"],
        Record::User(_) => vec!["Id", "UserName", "Email", "Followers", "Following"],
        Record::Order(_) => vec!["Id", "UserId", "ArticleId", "Quantity", "TotalPrice"],
    }
}

fn cells(record: &Record) -> Vec<String> {
    match record {
        Record::Article(a) => vec![a.id.to_string(), a.name.clone(), format!("{:.2}", a.price)],
        Record::User(u) => vec![
            u.id.to_string(),
            u.user_name.clone(),
            u.email.clone(),
            u.followers_count.to_string(),
            u.following_count.to_string(),
        ],
        Record::Order(o) => vec![
            o.id.to_string(),
            o.user_id.to_string(),
            o.article_id.to_string(),
            o.quantity.to_string(),
            format!("{:.2}", o.total_price),
        ],
    }
}

/// Format a millisecond duration in human-readable form
pub fn format_millis(ms: u64) -> String {
    if ms < 1000 {
        format!("{} ms", ms)
    } else if ms < 60_000 {
        format!("{:.2} s", ms as f64 / 1000.0)
    } else {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}
