//! Output formatting for CLI

use clap::ValueEnum;
use console::style;
use indicatif::HumanBytes;
use marquee_core::MovieEntry;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

/// One playlist entry as printed by `list`
#[derive(Debug, Serialize, Tabled)]
pub struct EntryRow {
    #[tabled(rename = "#")]
    pub index: usize,
    pub title: String,
    pub duration: String,
    pub poster: String,
    pub path: String,
    #[tabled(rename = "poster size", display_with = "display_size")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_bytes: Option<u64>,
}

impl EntryRow {
    pub fn new(index: usize, entry: &MovieEntry) -> Self {
        Self {
            index,
            title: entry.title.clone(),
            duration: entry.duration.clone(),
            poster: entry.poster.clone(),
            path: entry.path.clone(),
            poster_bytes: None,
        }
    }
}

fn display_size(bytes: &Option<u64>) -> String {
    bytes.map(|b| HumanBytes(b).to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn print_entries(rows: &[EntryRow], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Table => {
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        OutputFormat::Text => {
            for row in rows {
                println!("{:>3}. {} ({}) {}", row.index, row.title, row.duration, row.path);
            }
        }
    }
    Ok(())
}

pub fn success(message: &str) {
    eprintln!("{} {}", style("✓").green().bold(), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", style("!").yellow().bold(), message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_row() {
        let row = EntryRow::new(3, &MovieEntry::new("A", "1:00", "a.png", "a.m3u8"));
        assert_eq!(row.index, 3);
        assert_eq!(display_size(&row.poster_bytes), "-");
        assert_eq!(display_size(&Some(2048)), "2.00 KiB");

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["title"], "A");
        assert!(json.get("poster_bytes").is_none());
    }
}
