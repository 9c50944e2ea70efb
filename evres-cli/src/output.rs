use std::collections::BTreeMap;
use std::io::Write;

use chrono::{DateTime, Utc};
#[cfg(feature = "colored-output")]
use colored::*;
use event_resolver::{CacheRecord, ResolvedStream, RunReport, WorkingSet};
use serde_json::json;
#[cfg(feature = "table-output")]
use tabled::{Table, Tabled, settings::Style};

use crate::{cli::OutputFormat, error::Result};

pub struct OutputManager {
    colored: bool,
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    pub fn format_report(&self, report: &RunReport, format: &OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Pretty => Ok(self.format_report_pretty(report)),
            OutputFormat::Json => self.format_report_json(report, true),
            OutputFormat::JsonCompact => self.format_report_json(report, false),
            #[cfg(feature = "table-output")]
            OutputFormat::Table => Ok(self.format_records_table(&report.working_set)),
            #[cfg(not(feature = "table-output"))]
            OutputFormat::Table => Ok(self.format_report_pretty(report)),
        }
    }

    pub fn format_stream(&self, stream: &ResolvedStream, format: &OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(stream)?),
            OutputFormat::JsonCompact => Ok(serde_json::to_string(stream)?),
            OutputFormat::Pretty | OutputFormat::Table => {
                let mut output = String::new();
                output.push_str(&self.colorize("Stream resolved:", &Color::Green, true));
                output.push('\n');
                output.push_str(&format!(
                    "  {}: {}\n",
                    self.colorize("URL", &Color::Yellow, false),
                    self.colorize(&stream.url, &Color::Blue, false)
                ));
                output.push_str(&format!(
                    "  {}: {}\n",
                    self.colorize("Via", &Color::Yellow, false),
                    self.colorize(&format!("{:?}", stream.via), &Color::Cyan, false)
                ));
                Ok(output)
            }
        }
    }

    pub fn format_records(&self, records: &WorkingSet, format: &OutputFormat) -> Result<String> {
        let sorted: BTreeMap<&String, &CacheRecord> = records.iter().collect();
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(&sorted)?),
            OutputFormat::JsonCompact => Ok(serde_json::to_string(&sorted)?),
            #[cfg(feature = "table-output")]
            OutputFormat::Table => Ok(self.format_records_table(records)),
            _ => {
                if sorted.is_empty() {
                    return Ok(format!("{}\n", self.colorize("Cache is empty", &Color::Yellow, false)));
                }
                let mut output = String::new();
                output.push_str(&self.colorize(
                    &format!("{} cached streams:", sorted.len()),
                    &Color::Green,
                    true,
                ));
                output.push('\n');
                for (key, record) in sorted {
                    output.push_str(&self.format_record_line(key, record));
                }
                Ok(output)
            }
        }
    }

    fn format_record_line(&self, key: &str, record: &CacheRecord) -> String {
        format!(
            "  {} {}\n    {} ({})\n",
            self.colorize("•", &Color::Green, false),
            self.colorize(key, &Color::Yellow, false),
            self.colorize(&record.resolved_url, &Color::Blue, false),
            format_time(&record.resolved_at)
        )
    }

    fn format_report_pretty(&self, report: &RunReport) -> String {
        let mut output = String::new();
        output.push_str(&self.colorize("Run summary:", &Color::Green, true));
        output.push('\n');

        let counts = [
            ("Discovered", report.discovered),
            ("Out of window", report.out_of_window.len()),
            ("Already cached", report.already_cached.len()),
            ("Attempted", report.attempted.len()),
            ("Resolved", report.resolved.len()),
            ("Failed", report.failures.len()),
            ("Cached total", report.working_set.len()),
        ];
        for (label, count) in counts {
            output.push_str(&format!(
                "  {}: {}\n",
                self.colorize(label, &Color::Yellow, false),
                self.colorize(&count.to_string(), &Color::Cyan, false)
            ));
        }

        if report.is_noop() {
            output.push_str(&format!(
                "\n{}\n",
                self.colorize("Nothing new to resolve", &Color::Green, false)
            ));
            return output;
        }

        if !report.resolved.is_empty() {
            output.push('\n');
            output.push_str(&self.colorize("Resolved:", &Color::Green, true));
            output.push('\n');
            for key in &report.resolved {
                if let Some(record) = report.working_set.get(key) {
                    output.push_str(&self.format_record_line(key, record));
                }
            }
        }

        if !report.failures.is_empty() {
            output.push('\n');
            output.push_str(&self.colorize("Unresolved:", &Color::Yellow, true));
            output.push('\n');
            for (key, reason) in &report.failures {
                output.push_str(&format!("  {}: {}\n", key, reason));
            }
        }
        output
    }

    fn format_report_json(&self, report: &RunReport, pretty: bool) -> Result<String> {
        let records: BTreeMap<&String, &CacheRecord> = report.working_set.iter().collect();
        let failures: Vec<_> = report
            .failures
            .iter()
            .map(|(key, reason)| json!({ "key": key, "reason": reason }))
            .collect();
        let value = json!({
            "status": "ok",
            "discovered": report.discovered,
            "out_of_window": report.out_of_window,
            "already_cached": report.already_cached,
            "attempted": report.attempted,
            "resolved": report.resolved,
            "failures": failures,
            "records": records,
        });

        if pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        }
        .map_err(Into::into)
    }

    #[cfg(feature = "table-output")]
    fn format_records_table(&self, records: &WorkingSet) -> String {
        #[derive(Tabled)]
        struct RecordRow<'a> {
            key: &'a str,
            url: &'a str,
            resolved_at: String,
        }

        let mut rows: Vec<RecordRow<'_>> = records
            .iter()
            .map(|(key, record)| RecordRow {
                key,
                url: &record.resolved_url,
                resolved_at: format_time(&record.resolved_at),
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(b.key));

        let mut table = Table::new(rows);
        table.with(Style::modern());
        format!("{table}\n")
    }

    fn colorize(&self, text: &str, color: &Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Blue => text.blue(),
                    Color::Cyan => text.cyan(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (self.colored, color, bold);
            text.to_string()
        }
    }
}

enum Color {
    Green,
    Yellow,
    Blue,
    Cyan,
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn write_output(content: &str, output_file: Option<&std::path::Path>) -> Result<()> {
    match output_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        None => {
            print!("{content}");
            std::io::stdout().flush()?;
        }
    }
    Ok(())
}
